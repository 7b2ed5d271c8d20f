use std::{
	error::Error as STDError,
	fmt::{Display, Formatter, Result as FMTResult},
	iter::Peekable,
	result::Result as STDResult
};

pub type Result<T> = STDResult<T, Error>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
	pub kind: ErrorKind,
	pub from: usize,
	pub to: usize
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
	UnexpectedCharacter(char),
	UnfinishedString,
	UnfinishedLongString,
	MalformedNumber(Box<str>)
}

impl Error {
	/// Whether more input could have made this error go away.
	pub fn is_unfinished(&self) -> bool {
		matches!(self.kind,
			ErrorKind::UnfinishedString | ErrorKind::UnfinishedLongString)
	}
}

impl STDError for Error {}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter<'_>) -> FMTResult {
		match &self.kind {
			ErrorKind::UnexpectedCharacter(character) =>
				write!(f, "unexpected symbol near '{}'", character),
			ErrorKind::UnfinishedString => write!(f, "unfinished string"),
			ErrorKind::UnfinishedLongString => write!(f, "unfinished long string"),
			ErrorKind::MalformedNumber(number) =>
				write!(f, "malformed number near '{}'", number)
		}
	}
}

/// A token along with the byte span it was read from.
#[derive(Clone, Debug, PartialEq)]
pub struct Lexeme {
	pub token: Token,
	pub from: usize,
	pub to: usize
}

/// Tokenizes Lua source text, character by character.
///
/// The Lexer wraps some [`Iterator`] of [`char`]s, T, and can be iterated over,
/// producing [`Lexeme`]s. String and number tokens keep their source text
/// as written; decoding them is left to [lowering](super::lower).
///
/// Examples
/// --------
/// ```rust
/// # use space_lua::ast::lexer::{Lexer, Token};
/// let mut lexer = Lexer::new("print('hello world!')".chars());
///
/// assert_eq!(lexer.next().unwrap().unwrap().token,
/// 	Token::Identifier("print".to_owned()));
/// assert_eq!(lexer.next().unwrap().unwrap().token, Token::OpenParen);
/// assert_eq!(lexer.next().unwrap().unwrap().token,
/// 	Token::String("'hello world!'".to_owned()));
/// assert_eq!(lexer.next().unwrap().unwrap().token, Token::CloseParen);
/// assert!(lexer.next().is_none());
/// ```
pub struct Lexer<T>
		where T: Iterator<Item = char> {
	pub source: Peekable<T>,
	position: usize,
	/// Set right after a `query` identifier, so that the `[[` that opens a
	/// query is read as two brackets rather than a long string.
	after_query: bool
}

impl<T> Lexer<T>
		where T: Iterator<Item = char> {
	pub fn new(source: T) -> Self {
		Self {source: source.peekable(), position: 0, after_query: false}
	}

	/// Eats a character, disposing of it.
	pub(crate) fn eat(&mut self) {
		self.peeked_next();
	}

	/// Returns the next character, if any, keeping track of the byte offset.
	#[must_use = "all characters should be consumed, if you already peeked this, you should use `eat`"]
	pub(crate) fn next_char(&mut self) -> Option<char> {
		let next = self.source.next();
		if let Some(character) = next {self.position += character.len_utf8()}
		next
	}

	/// Returns the next character, assuming that the character was already
	/// peeked, and did infact, exist. Yields a NUL if it didn't.
	pub(crate) fn peeked_next(&mut self) -> char {
		self.next_char().unwrap_or('\0')
	}

	/// Peeks the next character, if any.
	pub(crate) fn peek(&mut self) -> Option<char> {
		self.source.peek().copied()
	}

	fn error(&self, kind: ErrorKind, from: usize) -> Error {
		Error {kind, from, to: self.position.max(from + 1)}
	}

	/// Parses and discards all whitespace, and returns the last peeked non
	/// whitespace character.
	pub(crate) fn parse_whitespace(&mut self) -> Option<char> {
		loop {
			match self.peek()? {
				' ' | '\n' | '\r' | '\t' | '\x0B' | '\x0C' => self.eat(),
				character => break Some(character)
			}
		}
	}

	/// Parses an identifier or keyword into a token.
	pub(crate) fn parse_identifier(&mut self) -> Token {
		let mut identifier = String::new();

		while let Some('a'..='z' | 'A'..='Z' | '0'..='9' | '_') = self.peek()
			{identifier.push(self.peeked_next())}

		match &identifier as &str {
			"and" => Token::KeywordAnd,
			"true" => Token::LiteralTrue,
			"false" => Token::LiteralFalse,
			"nil" => Token::LiteralNil,
			"break" => Token::KeywordBreak,
			"do" => Token::KeywordDo,
			"else" => Token::KeywordElse,
			"elseif" => Token::KeywordElseIf,
			"end" => Token::KeywordEnd,
			"for" => Token::KeywordFor,
			"function" => Token::KeywordFunction,
			"goto" => Token::KeywordGoto,
			"if" => Token::KeywordIf,
			"in" => Token::KeywordIn,
			"local" => Token::KeywordLocal,
			"not" => Token::KeywordNot,
			"or" => Token::KeywordOr,
			"repeat" => Token::KeywordRepeat,
			"return" => Token::KeywordReturn,
			"then" => Token::KeywordThen,
			"until" => Token::KeywordUntil,
			"while" => Token::KeywordWhile,
			_ => Token::Identifier(identifier)
		}
	}

	/// Parses a quoted string into a token. Assumes the first quote character
	/// *was not* consumed. Escapes are skipped over, not decoded.
	pub(crate) fn parse_string(&mut self, from: usize) -> Result<Token> {
		let delimiter = self.peeked_next();
		let mut string = String::from(delimiter);

		loop {
			match self.peek() {
				None | Some('\n') =>
					break Err(self.error(ErrorKind::UnfinishedString, from)),
				Some('\\') => {
					string.push(self.peeked_next());
					match self.next_char() {
						Some(escaped) => string.push(escaped),
						None => break Err(self.error(ErrorKind::UnfinishedString, from))
					}
				},
				Some(character) if character == delimiter => {
					self.eat();
					string.push(delimiter);
					break Ok(Token::String(string))
				},
				Some(_) => string.push(self.peeked_next())
			}
		}
	}

	/// Parses a number into a token. Assumes the first character *was not*
	/// consumed.
	///
	/// Accepts decimal integers and floats with an optional exponent, and
	/// hexadecimal integers and floats with an optional binary exponent.
	pub(crate) fn parse_number(&mut self, from: usize) -> Result<Token> {
		let mut number = String::new();
		let mut hex = false;

		if self.peek() == Some('0') {
			number.push(self.peeked_next());
			if let Some('x' | 'X') = self.peek() {
				number.push(self.peeked_next());
				hex = true;
			}
		}

		loop {
			match self.peek() {
				Some('0'..='9' | '.') => number.push(self.peeked_next()),
				Some('a'..='f' | 'A'..='F') if hex => {
					let character = self.peeked_next();
					number.push(character);
				},
				Some('e' | 'E' | 'p' | 'P') => {
					number.push(self.peeked_next());
					if let Some('+' | '-') = self.peek() {number.push(self.peeked_next())}
				},
				Some('a'..='z' | 'A'..='Z' | '_') => {
					while let Some('a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.') =
						self.peek() {number.push(self.peeked_next())}
					break Err(self.error(
						ErrorKind::MalformedNumber(number.into_boxed_str()), from))
				},
				_ => break Ok(Token::Number(number))
			}
		}
	}

	/// Parses a comment into a token. Assumes the first characters were `--`,
	/// and *were* consumed.
	pub(crate) fn parse_comment(&mut self, from: usize) -> Result<Token> {
		if self.peek() == Some('[') {
			self.eat();
			if let Some('[' | '=') = self.peek() {
				return self.parse_bracketed(from).map(|(_, body)| Token::Comment(body))
			}
		}

		let mut comment = String::new();
		while let Some(character) = self.peek() {
			if character == '\n' {break}
			comment.push(self.peeked_next());
		}
		Ok(Token::Comment(comment))
	}

	/// Parses some bracketed item. Assumes the first character was a `[`, and
	/// *was* consumed. Returns the level and the text between the brackets.
	///
	/// This is internally used by both long strings and long comments.
	pub(crate) fn parse_bracketed(&mut self, from: usize)
			-> Result<(usize, String)> {
		let mut level = 0usize;
		loop {
			match self.peek() {
				Some('=') => {self.eat(); level += 1},
				Some('[') => {self.eat(); break},
				_ => return Err(self.error(ErrorKind::UnexpectedCharacter('['), from))
			}
		}

		let mut body = String::new();
		loop {
			match self.next_char() {
				None => break Err(self.error(ErrorKind::UnfinishedLongString, from)),
				Some(']') => {
					let mut equals = 0;
					while self.peek() == Some('=') {self.eat(); equals += 1}
					if equals == level && self.peek() == Some(']') {
						self.eat();
						break Ok((level, body))
					}
					body.push(']');
					body.extend(std::iter::repeat('=').take(equals));
				},
				Some(character) => body.push(character)
			}
		}
	}

	fn lex(&mut self) -> Option<Result<Token>> {
		let from = self.position;
		let after_query = std::mem::replace(&mut self.after_query, false);

		Some(Ok(match self.peek()? {
			// Complex

			// Single character token Minus (-)
			// OR Multiple character Comment (--[[]])
			'-' => match {self.eat(); self.peek()} {
				Some('-') => {self.eat(); return Some(self.parse_comment(from))},
				_ => Token::Minus
			},

			// Single character token OpenBracket ([)
			// OR Multiple character token String ([[]])
			'[' => match {self.eat(); self.peek()} {
				Some('[') if after_query => Token::OpenBracket,
				Some('=' | '[') => return Some(self.parse_bracketed(from)
					.map(|(level, body)| {
						let equals = "=".repeat(level);
						Token::String(format!("[{}[{}]{}]", equals, body, equals))
					})),
				_ => Token::OpenBracket
			},

			// Single character token Other Assign (=)
			// OR Double character token Relational Equal (==)
			'=' => match {self.eat(); self.peek()} {
				Some('=') => {self.eat(); Token::Equal},
				_ => Token::Assign
			},

			// Single character token Relational LessThan (<)
			// OR Double character token Relational LessThanOrEqual (<=)
			// OR Double character token Bitwise ShiftLeft (<<)
			'<' => match {self.eat(); self.peek()} {
				Some('=') => {self.eat(); Token::LessThanOrEqual},
				Some('<') => {self.eat(); Token::ShiftLeft},
				_ => Token::LessThan
			},

			// Single character token Relational GreaterThan (>)
			// OR Double character token Relational GreaterThanOrEqual (>=)
			// OR Double character token Bitwise ShiftRight (>>)
			'>' => match {self.eat(); self.peek()} {
				Some('=') => {self.eat(); Token::GreaterThanOrEqual},
				Some('>') => {self.eat(); Token::ShiftRight},
				_ => Token::GreaterThan
			},

			// Single character token Bitwise BitwiseNotOrXOr (~)
			// OR Double character token Relational NotEqual (~=)
			'~' => match {self.eat(); self.peek()} {
				Some('=') => {self.eat(); Token::NotEqual},
				_ => Token::BitwiseNotOrXOr
			},

			// Single character token Arithmetic Divide (/)
			// OR Double character token Arithmetic FloorDivide (//)
			'/' => match {self.eat(); self.peek()} {
				Some('/') => {self.eat(); Token::FloorDivide},
				_ => Token::Divide
			},

			// Single character token Other Period (.)
			// OR Double character token Other Concat (..)
			// OR Triple character token Other VarArgs (...)
			// OR Number (.5)
			'.' => match {self.eat(); self.peek()} {
				Some('.') => match {self.eat(); self.peek()} {
					Some('.') => {self.eat(); Token::VarArgs},
					_ => Token::Concat
				},
				Some('0'..='9') => return Some(self.parse_number(from)
					.map(|token| match token {
						Token::Number(number) => Token::Number(format!(".{}", number)),
						token => token
					})),
				_ => Token::Period
			},

			// Single character token Other Colon (:)
			// OR Double character token Other Label (::)
			':' => match {self.eat(); self.peek()} {
				Some(':') => {self.eat(); Token::DoubleColon},
				_ => Token::Colon
			},

			// Arithmetic
			'+' => {self.eat(); Token::Add},
			'*' => {self.eat(); Token::Multiply},
			'%' => {self.eat(); Token::Modulo},
			'^' => {self.eat(); Token::Exponent},

			// Bitwise
			'&' => {self.eat(); Token::BitwiseAnd},
			'|' => {self.eat(); Token::BitwiseOr},

			// Other
			',' => {self.eat(); Token::Comma},
			';' => {self.eat(); Token::SemiColon},
			'#' => {self.eat(); Token::Length},

			// Sectioning
			'(' => {self.eat(); Token::OpenParen},
			')' => {self.eat(); Token::CloseParen},
			'{' => {self.eat(); Token::OpenCurly},
			'}' => {self.eat(); Token::CloseCurly},
			']' => {self.eat(); Token::CloseBracket},

			// Literals
			'"' | '\'' => return Some(self.parse_string(from)),
			'0'..='9' => return Some(self.parse_number(from)),
			'a'..='z' | 'A'..='Z' | '_' => {
				let token = self.parse_identifier();
				if let Token::Identifier(identifier) = &token {
					if identifier == "query" && self.peek() == Some('[') {
						self.after_query = true;
					}
				}
				token
			},

			character => {
				self.eat();
				return Some(Err(self.error(ErrorKind::UnexpectedCharacter(character), from)))
			}
		}))
	}
}

/// The main interface to the Lexer.
impl<T> Iterator for Lexer<T>
		where T: Iterator<Item = char> {
	type Item = Result<Lexeme>;

	/// Parses a single token and returns it.
	fn next(&mut self) -> Option<Result<Lexeme>> {
		self.parse_whitespace()?;
		let from = self.position;
		let token = self.lex()?;
		Some(token.map(|token| Lexeme {token, from, to: self.position}))
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(0, self.source.size_hint().1)
	}
}

/// A single syntactical unit of Lua code.
///
/// Represents identifiers, punctuation, and everything in between.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
	// Comment

	/// A Lua comment. May or may not include new lines.
	///
	/// Example
	/// -------
	/// ```lua
	/// -- Hello world!
	/// --[[
	/// 	I am a multiline comment.
	/// ]]
	/// ```
	Comment(String),

	// Literals

	/// An identifier, excluding keywords. The query clause words (`from`,
	/// `where`, `select` and so on) are identifiers too; they only mean
	/// something inside `query[[ ]]`.
	Identifier(String),

	/// A number, exactly as written.
	Number(String),

	/// A string, exactly as written, delimiters included.
	///
	/// Example
	/// -------
	/// - `"\tescaped\n"`
	/// - `'single quoted'`
	/// - `[==[long ]] bracket]==]`
	String(String),

	// Literal Values

	/// The `true` keyword.
	LiteralTrue,

	/// The `false` keyword.
	LiteralFalse,

	/// The `nil` keyword.
	LiteralNil,

	// Arithmetic

	/// The `+` symbol.
	Add,

	/// The `-` symbol.
	Minus,

	/// The `*` symbol.
	Multiply,

	/// The `/` symbol.
	Divide,

	/// The `//` symbol.
	FloorDivide,

	/// The `%` symbol.
	Modulo,

	/// The `^` symbol.
	Exponent,

	// Bitwise

	/// The `&` symbol.
	BitwiseAnd,

	/// The `|` symbol.
	BitwiseOr,

	/// The `~` symbol.
	BitwiseNotOrXOr,

	/// The `<<` symbol.
	ShiftLeft,

	/// The `>>` symbol.
	ShiftRight,

	// Relational

	/// The `==` symbol.
	Equal,

	/// The `~=` symbol.
	NotEqual,

	/// The `<` symbol.
	LessThan,

	/// The `<=` symbol.
	LessThanOrEqual,

	/// The `>` symbol.
	GreaterThan,

	/// The `>=` symbol.
	GreaterThanOrEqual,

	// Other

	/// The `=` symbol.
	Assign,

	/// The `:` symbol.
	Colon,

	/// The `::` symbol.
	DoubleColon,

	/// The `,` symbol.
	Comma,

	/// The `.` symbol.
	Period,

	/// The `;` symbol.
	SemiColon,

	/// The `..` symbol.
	Concat,

	/// The `...` symbol.
	VarArgs,

	/// The `#` symbol.
	Length,

	// Sectioning

	/// The `(` symbol.
	OpenParen,

	/// The `)` symbol.
	CloseParen,

	/// The `{` symbol.
	OpenCurly,

	/// The `}` symbol.
	CloseCurly,

	/// The `[` symbol.
	OpenBracket,

	/// The `]` symbol.
	CloseBracket,

	// Keywords

	/// The `and` keyword.
	KeywordAnd,

	/// The `break` keyword.
	KeywordBreak,

	/// The `do` keyword.
	KeywordDo,

	/// The `else` keyword.
	KeywordElse,

	/// The `elseif` keyword.
	KeywordElseIf,

	/// The `end` keyword.
	KeywordEnd,

	/// The `for` keyword.
	KeywordFor,

	/// The `function` keyword.
	KeywordFunction,

	/// The `goto` keyword.
	KeywordGoto,

	/// The `if` keyword.
	KeywordIf,

	/// The `in` keyword.
	KeywordIn,

	/// The `local` keyword.
	KeywordLocal,

	/// The `not` keyword.
	KeywordNot,

	/// The `or` keyword.
	KeywordOr,

	/// The `repeat` keyword.
	KeywordRepeat,

	/// The `return` keyword.
	KeywordReturn,

	/// The `then` keyword.
	KeywordThen,

	/// The `until` keyword.
	KeywordUntil,

	/// The `while` keyword.
	KeywordWhile
}

impl Display for Token {
	fn fmt(&self, f: &mut Formatter<'_>) -> FMTResult {
		match self {
			// Comment
			Self::Comment(comment) => write!(f, "--[===[{}]===]", comment),

			// Literals
			Self::Identifier(identifier) => write!(f, "{}", identifier),
			Self::Number(number) => write!(f, "{}", number),
			Self::String(string) => write!(f, "{}", string),

			// Literal Values
			Self::LiteralTrue => write!(f, "true"),
			Self::LiteralFalse => write!(f, "false"),
			Self::LiteralNil => write!(f, "nil"),

			// Arithmetic
			Self::Add => write!(f, "+"),
			Self::Minus => write!(f, "-"),
			Self::Multiply => write!(f, "*"),
			Self::Divide => write!(f, "/"),
			Self::FloorDivide => write!(f, "//"),
			Self::Modulo => write!(f, "%"),
			Self::Exponent => write!(f, "^"),

			// Bitwise
			Self::BitwiseAnd => write!(f, "&"),
			Self::BitwiseOr => write!(f, "|"),
			Self::BitwiseNotOrXOr => write!(f, "~"),
			Self::ShiftLeft => write!(f, "<<"),
			Self::ShiftRight => write!(f, ">>"),

			// Relational
			Self::Equal => write!(f, "=="),
			Self::NotEqual => write!(f, "~="),
			Self::LessThan => write!(f, "<"),
			Self::LessThanOrEqual => write!(f, "<="),
			Self::GreaterThan => write!(f, ">"),
			Self::GreaterThanOrEqual => write!(f, ">="),

			// Other
			Self::Assign => write!(f, "="),
			Self::Colon => write!(f, ":"),
			Self::DoubleColon => write!(f, "::"),
			Self::Comma => write!(f, ","),
			Self::Period => write!(f, "."),
			Self::SemiColon => write!(f, ";"),
			Self::Concat => write!(f, ".."),
			Self::VarArgs => write!(f, "..."),
			Self::Length => write!(f, "#"),

			// Sectioning
			Self::OpenParen => write!(f, "("),
			Self::CloseParen => write!(f, ")"),
			Self::OpenCurly => write!(f, "{{"),
			Self::CloseCurly => write!(f, "}}"),
			Self::OpenBracket => write!(f, "["),
			Self::CloseBracket => write!(f, "]"),

			// Keywords
			Self::KeywordAnd => write!(f, "and"),
			Self::KeywordBreak => write!(f, "break"),
			Self::KeywordDo => write!(f, "do"),
			Self::KeywordElse => write!(f, "else"),
			Self::KeywordElseIf => write!(f, "elseif"),
			Self::KeywordEnd => write!(f, "end"),
			Self::KeywordFor => write!(f, "for"),
			Self::KeywordFunction => write!(f, "function"),
			Self::KeywordGoto => write!(f, "goto"),
			Self::KeywordIf => write!(f, "if"),
			Self::KeywordIn => write!(f, "in"),
			Self::KeywordLocal => write!(f, "local"),
			Self::KeywordNot => write!(f, "not"),
			Self::KeywordOr => write!(f, "or"),
			Self::KeywordRepeat => write!(f, "repeat"),
			Self::KeywordReturn => write!(f, "return"),
			Self::KeywordThen => write!(f, "then"),
			Self::KeywordUntil => write!(f, "until"),
			Self::KeywordWhile => write!(f, "while")
		}
	}
}
