pub use pico_args::Error;
use pico_args::Arguments as Parser;
use std::{
	convert::TryFrom,
	fs::read_to_string,
	io::Error as IOError,
	path::PathBuf
};

pub static HELP: &str = "\
Space Lua Interpreter

SYNOPSIS:
	space-lua [OPTIONS] [SOURCE]

DESCRIPTION:
	space-lua runs Space Lua, a Lua 5.4 dialect with const and close locals, goto, and embedded queries (query[[from p = pages where p.size > 1 select p.name]]).

	After parsing the command line arguments, SOURCE is either evaluated directly, if -e is passed, otherwise the file named SOURCE is loaded and evaluated. If -i is passed, after evaluation, an interactive prompt sharing SOURCE's globals is started. If SOURCE is not provided, an interactive prompt always starts.

	Passing -v will log evaluation details to standard error.

EXIT STATUS:
	1 on a runtime error, 2 on a syntax error and 3 when SOURCE can't be read.

OPTIONS:
	-h, --help        Displays this and quits
	-V, --version     Displays version information
	-v, --verbose     Runs with verbose output
	-i, --interactive Runs in interactive mode, after running SOURCE
	-e, --evaluate    Treats source as direct source code, rather than a file
	-s, --ast         Shows the lowered syntax tree rather than executing
	-p, --tree        Shows the concrete parse tree rather than executing
	-t, --tokens      Shows tokens rather than executing";

#[derive(Debug)]
pub enum Arguments {
	ShowHelp,
	ShowVersion,
	Repl {
		verbose: bool
	},
	Run {
		source: Source,
		execution: ExecutionType,
		verbose: bool
	}
}

#[derive(Debug)]
pub enum Source {
	File(PathBuf),
	Code(String)
}

impl Source {
	/// The name diagnostics refer to the source by.
	pub fn reference(&self) -> String {
		match self {
			Self::File(path) => path.display().to_string(),
			Self::Code(_) => "(command line)".to_owned()
		}
	}
}

#[derive(Debug)]
pub enum ExecutionType {
	Run,
	RunInteractively,
	ShowSyntaxTree,
	ShowParseTree,
	ShowTokens
}

impl Arguments {
	pub fn from_env() -> Result<Self, Error> {
		Self::parse(Parser::from_env())
	}

	fn parse(mut parser: Parser) -> Result<Self, Error> {
		if parser.contains(["-h", "--help"]) {return Ok(Self::ShowHelp)}
		if parser.contains(["-V", "--version"]) {return Ok(Self::ShowVersion)}

		let verbose = parser.contains(["-v", "--verbose"]);
		let interactive = parser.contains(["-i", "--interactive"]);
		let syntax_tree = parser.contains(["-s", "--ast"]);
		let parse_tree = parser.contains(["-p", "--tree"]);
		let tokens = parser.contains(["-t", "--tokens"]);
		let evaluate = parser.contains(["-e", "--evaluate"]);

		let source = match parser.opt_free_from_str::<String>()? {
			Some(code) if evaluate => Source::Code(code),
			Some(path) => Source::File(PathBuf::from(path)),
			None if evaluate => return Err(Error::MissingArgument),
			None => return Ok(Self::Repl {verbose})
		};

		let execution = if interactive {
			ExecutionType::RunInteractively
		} else if syntax_tree {
			ExecutionType::ShowSyntaxTree
		} else if parse_tree {
			ExecutionType::ShowParseTree
		} else if tokens {
			ExecutionType::ShowTokens
		} else {
			ExecutionType::Run
		};
		Ok(Self::Run {source, execution, verbose})
	}
}

impl TryFrom<Source> for String {
	type Error = IOError;

	fn try_from(value: Source) -> Result<Self, IOError> {
		match value {
			Source::Code(code) => Ok(code),
			Source::File(file) => read_to_string(file)
		}
	}
}
