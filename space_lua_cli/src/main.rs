mod arguments;
mod repl;

use self::{
	arguments::{HELP, Arguments, ExecutionType, Error as ArgumentError},
	repl::repl
};
use log::{LevelFilter, Log, Metadata, Record};
use space_lua::{
	Runtime,
	ast::{self, lexer::Lexer, parser::{TokenIterator, parse_chunk}},
	error::LuaError
};
use std::{convert::TryFrom, future::Future, io::Error as IOError, process::exit};

pub static VERSION: &str = "\
Space Lua 0.1.0
Targeting Lua 5.4";

/// Writes log records to standard error.
struct StderrLogger;

impl Log for StderrLogger {
	fn enabled(&self, _: &Metadata) -> bool {
		true
	}

	fn log(&self, record: &Record) {
		if self.enabled(record.metadata()) {
			eprintln!("[{} {}] {}", record.level(), record.target(), record.args());
		}
	}

	fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logger(verbose: bool) {
	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(if verbose {LevelFilter::Debug} else {LevelFilter::Warn});
	}
}

fn main() {
	match Arguments::from_env() {
		Ok(Arguments::ShowHelp) => eprintln!("{}", HELP),
		Ok(Arguments::ShowVersion) => eprintln!("{}", VERSION),
		Ok(Arguments::Repl {verbose}) => {
			init_logger(verbose);
			repl(Runtime::new())
		},
		Ok(Arguments::Run {source, execution, verbose}) => {
			init_logger(verbose);
			let reference = source.reference();
			let code = handle_io(String::try_from(source));
			match execution {
				ExecutionType::Run => run_code(&code, &reference, false),
				ExecutionType::RunInteractively => run_code(&code, &reference, true),
				ExecutionType::ShowSyntaxTree => show_syntax_tree(&code, &reference),
				ExecutionType::ShowParseTree => show_parse_tree(&code),
				ExecutionType::ShowTokens => show_tokens(&code)
			}
		},
		Err(ArgumentError::MissingArgument) => {
			eprintln!("missing argument, -e needs source code\n\n{}", HELP);
			exit(2);
		},
		Err(error) => {
			eprintln!("{}\n\n{}", error, HELP);
			exit(2);
		}
	}
}

fn handle_io<T>(result: Result<T, IOError>) -> T {
	match result {
		Ok(value) => value,
		Err(error) => {
			eprintln!("io error: {}", error);
			exit(3);
		}
	}
}

/// Drives a future to completion on a single threaded runtime, so host
/// functions that sleep or time out work.
pub fn block_on<F: Future>(future: F) -> F::Output {
	let runtime = handle_io(tokio::runtime::Builder::new_current_thread()
		.enable_time()
		.build());
	runtime.block_on(future)
}

fn run_code(code: &str, reference: &str, interactive: bool) {
	let runtime = Runtime::new();
	match block_on(runtime.execute(code, Some(reference))) {
		Ok(_) => if interactive {repl(runtime)},
		Err(error @ LuaError::Syntax(_)) => {
			eprintln!("syntax error: {}", error.pretty_print(code));
			exit(2);
		},
		Err(error) => {
			eprintln!("{}", error.pretty_print(code));
			exit(1);
		}
	}
}

fn show_syntax_tree(code: &str, reference: &str) {
	match ast::parse(code, Some(reference)) {
		Ok(block) => println!("{}", block),
		Err(error) => {
			eprintln!("syntax error: {}", LuaError::from(error).pretty_print(code));
			exit(2);
		}
	}
}

fn show_parse_tree(code: &str) {
	let stripped = ast::strip_comments(code);
	let mut tokens = TokenIterator::new(Lexer::new(stripped.chars()));

	match parse_chunk(&mut tokens) {
		Ok(tree) => println!("{}", tree),
		Err(error) => {
			eprintln!("syntax error: {}", LuaError::from(error).pretty_print(code));
			exit(2);
		}
	}
}

fn show_tokens(code: &str) {
	let tokens: Vec<_> = Lexer::new(code.chars()).collect();

	println!("{:#?}", tokens)
}
