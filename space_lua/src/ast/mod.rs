//! Source text to typed syntax tree.
//!
//! Parsing happens in two stages. The [parser] produces a generic
//! [tree::ParseTree], which is the boundary any other concrete syntax
//! producer may target as well. [lower] then turns that tree into the typed
//! [syntax] nodes the evaluator runs, performing the static checks (attribute
//! names, `<close>` counts, unary plus) along the way, and [labels] validates
//! every `goto` against the labels it can see.
//!
//! Examples
//! --------
//! ```rust
//! use space_lua::ast::parse;
//!
//! let block = parse("local x <const> = 1 + 2", None).unwrap();
//! assert_eq!(block.statements.len(), 1);
//! assert!(parse("local x <shiny> = 1", None).is_err());
//! ```

pub mod labels;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod syntax;
pub mod tree;

use self::{
	lexer::{Error as LexerError, Lexer},
	lower::Error as LowerError,
	parser::{Error as ParserError, TokenIterator},
	syntax::Block
};
use std::{
	error::Error as STDError,
	fmt::{Display, Formatter, Result as FMTResult},
	result::Result as STDResult,
	sync::Arc
};

pub type Result<T> = STDResult<T, Error>;

/// Where a node came from, as byte offsets into the source text, plus an
/// optional human readable reference (usually a file or page name).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Context {
	pub from: usize,
	pub to: usize,
	pub reference: Option<Arc<str>>
}

impl Context {
	pub fn new(from: usize, to: usize) -> Self {
		Self {from, to, reference: None}
	}
}

#[derive(Clone, Debug)]
pub enum Error {
	Lexer(LexerError),
	Parser(ParserError),
	Lower(LowerError)
}

impl Error {
	/// The span of source the error refers to.
	pub fn context(&self) -> Context {
		match self {
			Self::Lexer(lexer) => Context::new(lexer.from, lexer.to),
			Self::Parser(parser) => parser.context(),
			Self::Lower(lower) => lower.context.clone()
		}
	}

	/// Whether the error was caused by the input ending early. The REPL uses
	/// this to ask for another line instead of reporting the error.
	pub fn is_end_of_file(&self) -> bool {
		match self {
			Self::Parser(parser) => parser.0.is_none(),
			Self::Lexer(lexer) => lexer.is_unfinished(),
			Self::Lower(_) => false
		}
	}
}

impl STDError for Error {}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::Lexer(lexer) => lexer.fmt(f),
			Self::Parser(parser) => parser.fmt(f),
			Self::Lower(lower) => lower.fmt(f)
		}
	}
}

impl From<LexerError> for Error {
	fn from(lexer: LexerError) -> Self {
		Self::Lexer(lexer)
	}
}

impl From<ParserError> for Error {
	fn from(parser: ParserError) -> Self {
		Self::Parser(parser)
	}
}

impl From<LowerError> for Error {
	fn from(lower: LowerError) -> Self {
		Self::Lower(lower)
	}
}

/// Parses and lowers a chunk of source text.
///
/// `reference` ends up in the [Context] of every node, and so in every
/// diagnostic raised while running the chunk.
pub fn parse(source: &str, reference: Option<&str>) -> Result<Arc<Block>> {
	let stripped = strip_comments(source);
	let tree = parser::parse_chunk(
		&mut TokenIterator::new(Lexer::new(stripped.chars())))?;
	let block = lower::lower_chunk(&tree, reference.map(Into::into))?;
	labels::validate(&block)?;
	Ok(block)
}

/// Parses a single expression, wrapped in a `return` so it can be run as a
/// chunk.
pub fn parse_expression(source: &str, reference: Option<&str>)
		-> Result<Arc<Block>> {
	let stripped = strip_comments(source);
	let mut tokens = TokenIterator::new(Lexer::new(stripped.chars()));
	let tree = parser::parse_expression_chunk(&mut tokens)?;
	let block = lower::lower_chunk(&tree, reference.map(Into::into))?;
	labels::validate(&block)?;
	Ok(block)
}

/// Replaces every comment in `source` with spaces, leaving byte offsets
/// intact. Short strings and long bracket strings are copied verbatim, even
/// when they contain something that looks like a comment.
pub fn strip_comments(source: &str) -> String {
	let bytes = source.as_bytes();
	let mut result = String::with_capacity(source.len());
	let mut index = 0;

	// Finds `[=*[` at `at`, returning its level and total length.
	let long_open = |at: usize| -> Option<(usize, usize)> {
		if bytes.get(at) != Some(&b'[') {return None}
		let mut cursor = at + 1;
		while bytes.get(cursor) == Some(&b'=') {cursor += 1}
		match bytes.get(cursor) {
			Some(b'[') => Some((cursor - at - 1, cursor - at + 1)),
			_ => None
		}
	};
	let long_close = |from: usize, level: usize| -> Option<usize> {
		let close = format!("]{}]", "=".repeat(level));
		source[from..].find(&close).map(|offset| from + offset + close.len())
	};

	while index < bytes.len() {
		match bytes[index] {
			b'[' => if let Some((level, open)) = long_open(index) {
				match long_close(index + open, level) {
					Some(end) => {
						result.push_str(&source[index..end]);
						index = end;
					},
					None => {
						result.push_str(&source[index..]);
						index = bytes.len();
					}
				}
			} else {
				result.push('[');
				index += 1;
			},

			quote @ (b'"' | b'\'') => {
				let start = index;
				index += 1;
				while index < bytes.len() && bytes[index] != quote {
					if bytes[index] == b'\\' {index += 1}
					index += 1;
				}
				index = (index + 1).min(bytes.len());
				result.push_str(&source[start..index]);
			},

			b'-' if bytes.get(index + 1) == Some(&b'-') => {
				let start = index;
				index += 2;
				let end = match long_open(index) {
					Some((level, open)) => long_close(index + open, level)
						.unwrap_or(bytes.len()),
					None => source[index..].find('\n')
						.map(|offset| index + offset).unwrap_or(bytes.len())
				};
				// Multi-byte characters become as many spaces as they had bytes.
				result.extend(source[start..end].chars()
					.flat_map(|character| {
						let blank = if character == '\n' {'\n'} else {' '};
						std::iter::repeat(blank).take(character.len_utf8())
					}));
				index = end;
			},

			_ => {
				let character = source[index..].chars().next().unwrap_or(' ');
				result.push(character);
				index += character.len_utf8();
			}
		}
	}

	result
}

#[cfg(test)]
mod tests {
	use super::{parse, strip_comments};

	#[test]
	fn test_strip_comments_keeps_offsets() {
		let source = "local a = 1 -- trailing\nprint(a) --[[ long\ncomment ]] x";
		let stripped = strip_comments(source);
		assert_eq!(stripped.len(), source.len());
		assert_eq!(stripped, format!("local a = 1 {}\nprint(a) {}\n{} x",
			" ".repeat(11), " ".repeat(9), " ".repeat(10)));
	}

	#[test]
	fn test_strip_comments_leaves_strings() {
		let source = "s = \"-- not a comment\" t = [==[ -- nor this ]==]";
		assert_eq!(strip_comments(source), source);
	}

	#[test]
	fn test_strip_comments_escaped_quote() {
		let source = "s = 'it\\'s -- fine' -- gone";
		assert_eq!(strip_comments(source),
			format!("s = 'it\\'s -- fine' {}", " ".repeat(7)));
	}

	#[test]
	fn test_parse_reports_reference() {
		let block = parse("x = 1", Some("page")).unwrap();
		assert_eq!(block.statements[0].context.reference.as_deref(), Some("page"));
	}
}
