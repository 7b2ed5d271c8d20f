use self::super::{
	Context, Error as ASTError, Result,
	lexer::{Lexeme, Result as LexerResult, Token},
	lower::Error as LowerError,
	tree::{Kind, ParseTree}
};
use crate::vm::grow;
use std::{
	collections::VecDeque,
	error::Error as STDError,
	fmt::{Display, Formatter, Result as FMTResult}
};

macro_rules! expression {
	($($(#[$($attrib:tt)*])* $name:ident($next:ident) {$($token:ident),*}),*) => {
		$(
			$(#[$($attrib)*])*
			fn $name<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
					where I: Iterator<Item = LexerResult<Lexeme>> {
				let mut expression = $next(iter)?;

				loop {
					match iter.peek().transpose()? {
						$(Some(Token::$token))|* => {
							let operator = iter.leaf(Kind::Operator);
							let right = $next(iter)?;
							expression = ParseTree::wrap(Kind::Binary,
								vec![expression, operator, right]);
						},
						_ => break Ok(expression)
					}
				}
			}
		)*
	}
}

macro_rules! expect {
	($iter:ident, $type:pat) => {
		match $iter.peek() {
			Some(Ok($type)) => $iter.eat(),
			_ => return Err($iter.unexpected())
		}
	}
}

/// How deeply blocks and expressions may nest inside each other.
pub const MAX_SYNTAX_LEVELS: usize = 200;

/// An unexpected token, or the end of input, along with the byte offset the
/// input ended at.
#[derive(Clone, Debug)]
pub struct Error(pub Option<Lexeme>, pub usize);

impl Error {
	pub fn context(&self) -> Context {
		match &self.0 {
			Some(lexeme) => Context::new(lexeme.from, lexeme.to),
			None => Context::new(self.1, self.1)
		}
	}
}

impl STDError for Error {}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match &self.0 {
			Some(lexeme) => write!(f, "unexpected symbol near '{}'", lexeme.token),
			None => write!(f, "unexpected symbol near <eof>")
		}
	}
}

/// A buffered iterator of tokens with specialized methods for parsing.
///
/// This is made for having a mutable reference to it be passed around between
/// parsing functions, and being peeked and consumed token by token via helper
/// methods. Comments are skipped, and up to a few tokens of lookahead are
/// available for the handful of places the grammar needs them.
pub struct TokenIterator<I>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	source: I,
	buffer: VecDeque<LexerResult<Lexeme>>,
	end: usize,
	levels: usize
}

impl<I> TokenIterator<I>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	pub fn new(source: I) -> Self {
		Self {source, buffer: VecDeque::new(), end: 0, levels: 0}
	}

	fn fill(&mut self, count: usize) {
		while self.buffer.len() < count {
			match self.source.next() {
				Some(Ok(Lexeme {token: Token::Comment(_), ..})) => (),
				Some(lexeme) => self.buffer.push_back(lexeme),
				None => break
			}
		}
	}

	/// Returns the next token, if any.
	#[allow(clippy::should_implement_trait)]
	pub fn next(&mut self) -> Option<LexerResult<Lexeme>> {
		self.fill(1);
		let next = self.buffer.pop_front();
		if let Some(Ok(lexeme)) = &next {self.end = lexeme.to}
		next
	}

	// Eats a token, disposing of it.
	fn eat(&mut self) {
		self.next();
	}

	/// Peeks the next token, if any.
	pub fn peek(&mut self) -> Option<LexerResult<Token>> {
		self.peek_nth(0)
	}

	fn peek_nth(&mut self, index: usize) -> Option<LexerResult<Token>> {
		self.fill(index + 1);
		self.buffer.get(index).cloned()
			.map(|lexeme| lexeme.map(|lexeme| lexeme.token))
	}

	fn check(&mut self, token: &Token) -> bool {
		matches!(self.peek(), Some(Ok(next)) if &next == token)
	}

	/// Whether the next token is the identifier `word`.
	fn keyword(&mut self, word: &str) -> bool {
		matches!(self.peek(), Some(Ok(Token::Identifier(next))) if next == word)
	}

	/// Where the next token starts, or where the input ended.
	fn position(&mut self) -> usize {
		self.fill(1);
		match self.buffer.front() {
			Some(Ok(lexeme)) => lexeme.from,
			_ => self.end
		}
	}

	/// Runs `parse` one syntax level deeper, failing once too many levels
	/// are open.
	fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
		if self.levels >= MAX_SYNTAX_LEVELS {
			let at = self.position();
			return Err(ASTError::Lower(LowerError::new(
				"chunk has too many syntax levels", Context::new(at, at))))
		}

		self.levels += 1;
		let result = grow(|| parse(self));
		self.levels -= 1;
		result
	}

	/// Consumes the next token and turns it into an error.
	fn unexpected(&mut self) -> ASTError {
		match self.next() {
			Some(Err(error)) => ASTError::Lexer(error),
			Some(Ok(lexeme)) => {
				let end = lexeme.to;
				ASTError::Parser(Error(Some(lexeme), end))
			},
			None => ASTError::Parser(Error(None, self.end))
		}
	}

	/// Consumes the next token as a leaf of the given kind, assuming it was
	/// already peeked.
	fn leaf(&mut self, kind: Kind) -> ParseTree {
		match self.next() {
			Some(Ok(Lexeme {token, from, to})) =>
				ParseTree::leaf(kind, token.to_string(), from, to),
			_ => ParseTree::new(kind, Vec::new(), self.end, self.end)
		}
	}

	/// Consumes an identifier as a leaf of the given kind.
	fn name_as(&mut self, kind: Kind) -> Result<ParseTree> {
		match self.peek() {
			Some(Ok(Token::Identifier(_))) => Ok(self.leaf(kind)),
			_ => Err(self.unexpected())
		}
	}

	fn name(&mut self) -> Result<ParseTree> {
		self.name_as(Kind::Name)
	}

	fn node(&self, kind: Kind, children: Vec<ParseTree>, from: usize)
			-> ParseTree {
		ParseTree::new(kind, children, from, self.end.max(from))
	}
}

/// Parses a whole chunk, which must consume every token.
pub fn parse_chunk<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let block = parse_block(iter)?;
	match iter.peek() {
		None => Ok(iter.node(Kind::Chunk, vec![block], 0)),
		Some(_) => Err(iter.unexpected())
	}
}

/// Parses a single expression into a chunk that returns it.
pub fn parse_expression_chunk<I>(iter: &mut TokenIterator<I>)
		-> Result<ParseTree> where I: Iterator<Item = LexerResult<Lexeme>> {
	let expression = parse_expression(iter)?;
	if iter.peek().is_some() {return Err(iter.unexpected())}

	let list = ParseTree::wrap(Kind::ExpressionList, vec![expression]);
	let r#return = ParseTree::wrap(Kind::Return, vec![list]);
	let block = ParseTree::wrap(Kind::Block, vec![r#return]);
	Ok(iter.node(Kind::Chunk, vec![block], 0))
}

/// Parses a block of Lua tokens.
pub fn parse_block<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	iter.nested(parse_statements)
}

fn parse_statements<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	let mut statements = Vec::new();

	loop {
		match iter.peek().transpose()? {
			None | Some(Token::KeywordEnd | Token::KeywordElse
				| Token::KeywordElseIf | Token::KeywordUntil) => break,

			// return must be the last statement of a block.
			Some(Token::KeywordReturn) => {
				statements.push(parse_return(iter)?);
				break
			},

			Some(_) => statements.push(parse_statement(iter)?)
		}
	}

	let to = statements.last().map(|statement| statement.to).unwrap_or(from);
	Ok(ParseTree::new(Kind::Block, statements, from, to))
}

fn parse_return<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	expect!(iter, Token::KeywordReturn);

	let values = match iter.peek().transpose()? {
		None | Some(Token::KeywordEnd | Token::KeywordElse
			| Token::KeywordElseIf | Token::KeywordUntil | Token::SemiColon) =>
				Vec::new(),
		Some(_) => vec![parse_expression_list(iter)?]
	};
	let node = iter.node(Kind::Return, values, from);
	if iter.check(&Token::SemiColon) {iter.eat()}
	Ok(node)
}

pub fn parse_statement<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();

	Ok(match iter.peek().transpose()? {
		// ;
		Some(Token::SemiColon) => iter.leaf(Kind::Semicolon),

		// ::label::
		Some(Token::DoubleColon) => {
			iter.eat();
			let name = iter.name()?;
			expect!(iter, Token::DoubleColon);
			iter.node(Kind::Label, vec![name], from)
		},

		// break
		Some(Token::KeywordBreak) => iter.leaf(Kind::Break),

		// goto label
		Some(Token::KeywordGoto) => {
			iter.eat();
			let name = iter.name()?;
			iter.node(Kind::Goto, vec![name], from)
		},

		// do end
		Some(Token::KeywordDo) => {
			iter.eat();
			let block = parse_block(iter)?;
			expect!(iter, Token::KeywordEnd);
			iter.node(Kind::Do, vec![block], from)
		},

		// while condition do end
		Some(Token::KeywordWhile) => {
			iter.eat();
			let condition = parse_expression(iter)?;
			expect!(iter, Token::KeywordDo);
			let block = parse_block(iter)?;
			expect!(iter, Token::KeywordEnd);
			iter.node(Kind::While, vec![condition, block], from)
		},

		// repeat until condition
		Some(Token::KeywordRepeat) => {
			iter.eat();
			let block = parse_block(iter)?;
			expect!(iter, Token::KeywordUntil);
			let condition = parse_expression(iter)?;
			iter.node(Kind::Repeat, vec![block, condition], from)
		},

		Some(Token::KeywordIf) => parse_if(iter)?,
		Some(Token::KeywordFor) => parse_for(iter)?,

		// function name.path:method() end
		Some(Token::KeywordFunction) => {
			iter.eat();
			let name_from = iter.position();
			let mut path = vec![iter.name()?];
			while iter.check(&Token::Period) {iter.eat(); path.push(iter.name()?)}
			if iter.check(&Token::Colon) {
				iter.eat();
				path.push(iter.name_as(Kind::MethodName)?);
			}
			let name = iter.node(Kind::FunctionName, path, name_from);
			let body = parse_function_body(iter)?;
			iter.node(Kind::FunctionStatement, vec![name, body], from)
		},

		Some(Token::KeywordLocal) => parse_local(iter)?,

		_ => parse_expression_statement(iter)?
	})
}

// A call, or an assignment.
fn parse_expression_statement<I>(iter: &mut TokenIterator<I>)
		-> Result<ParseTree> where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	let expression = parse_suffixed(iter)?;

	match expression.kind {
		Kind::Call | Kind::MethodCall
				if !matches!(iter.peek(), Some(Ok(Token::Comma | Token::Assign))) =>
			Ok(ParseTree::wrap(Kind::CallStatement, vec![expression])),
		_ => {
			let mut variables = vec![assignable(iter, expression)?];
			while iter.check(&Token::Comma) {
				iter.eat();
				let variable = parse_suffixed(iter)?;
				variables.push(assignable(iter, variable)?);
			}
			let variables = ParseTree::wrap(Kind::VarList, variables);

			expect!(iter, Token::Assign);
			let values = parse_expression_list(iter)?;
			Ok(iter.node(Kind::Assign, vec![variables, values], from))
		}
	}
}

fn assignable<I>(iter: &mut TokenIterator<I>, target: ParseTree)
		-> Result<ParseTree> where I: Iterator<Item = LexerResult<Lexeme>> {
	match target.kind {
		Kind::Name | Kind::Property | Kind::Index => Ok(target),
		_ => Err(iter.unexpected())
	}
}

fn parse_local<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	expect!(iter, Token::KeywordLocal);

	// local function name() end
	if iter.check(&Token::KeywordFunction) {
		iter.eat();
		let name = iter.name()?;
		let body = parse_function_body(iter)?;
		return Ok(iter.node(Kind::LocalFunction, vec![name, body], from))
	}

	// local name <attribute>, name = values
	let names_from = iter.position();
	let mut names = Vec::new();
	loop {
		let name_from = iter.position();
		let mut name = vec![iter.name()?];
		if iter.check(&Token::LessThan) {
			iter.eat();
			name.push(iter.name_as(Kind::Attribute)?);
			expect!(iter, Token::GreaterThan);
		}
		names.push(iter.node(Kind::AttributeName, name, name_from));

		if !iter.check(&Token::Comma) {break}
		iter.eat();
	}
	let mut children = vec![iter.node(Kind::AttributeNames, names, names_from)];

	if iter.check(&Token::Assign) {
		iter.eat();
		children.push(parse_expression_list(iter)?);
	}

	Ok(iter.node(Kind::Local, children, from))
}

pub fn parse_if<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	expect!(iter, Token::KeywordIf);

	let mut branches = Vec::new();
	loop {
		let branch_from = iter.position();
		let condition = parse_expression(iter)?;
		expect!(iter, Token::KeywordThen);
		let block = parse_block(iter)?;
		branches.push(iter.node(Kind::Condition, vec![condition, block], branch_from));

		match iter.peek().transpose()? {
			Some(Token::KeywordElseIf) => iter.eat(),
			Some(Token::KeywordElse) => {
				let else_from = iter.position();
				iter.eat();
				let block = parse_block(iter)?;
				branches.push(iter.node(Kind::Else, vec![block], else_from));
				expect!(iter, Token::KeywordEnd);
				break
			},
			Some(Token::KeywordEnd) => {iter.eat(); break},
			_ => return Err(iter.unexpected())
		}
	}

	Ok(iter.node(Kind::If, branches, from))
}

pub fn parse_for<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	expect!(iter, Token::KeywordFor);
	let variable = iter.name()?;

	match iter.peek().transpose()? {
		// for i = 1, 10, 2 do
		Some(Token::Assign) => {
			iter.eat();
			let mut children = vec![variable, parse_expression(iter)?];
			expect!(iter, Token::Comma);
			children.push(parse_expression(iter)?);
			if iter.check(&Token::Comma) {
				iter.eat();
				children.push(parse_expression(iter)?);
			}
			expect!(iter, Token::KeywordDo);
			children.push(parse_block(iter)?);
			expect!(iter, Token::KeywordEnd);
			Ok(iter.node(Kind::NumericFor, children, from))
		},

		// for key, value in pairs(t) do
		Some(Token::Comma | Token::KeywordIn) => {
			let mut names = vec![variable];
			while iter.check(&Token::Comma) {iter.eat(); names.push(iter.name()?)}
			let names = ParseTree::wrap(Kind::NameList, names);
			expect!(iter, Token::KeywordIn);
			let values = parse_expression_list(iter)?;
			expect!(iter, Token::KeywordDo);
			let block = parse_block(iter)?;
			expect!(iter, Token::KeywordEnd);
			Ok(iter.node(Kind::GenericFor, vec![names, values, block], from))
		},

		_ => Err(iter.unexpected())
	}
}

/// Parses `(parameters) block end`.
pub fn parse_function_body<I>(iter: &mut TokenIterator<I>)
		-> Result<ParseTree> where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	expect!(iter, Token::OpenParen);

	let mut parameters = Vec::new();
	if !iter.check(&Token::CloseParen) {
		loop {
			match iter.peek().transpose()? {
				Some(Token::VarArgs) => {parameters.push(iter.leaf(Kind::VarArgs)); break},
				Some(Token::Identifier(_)) => parameters.push(iter.name()?),
				_ => return Err(iter.unexpected())
			}
			if !iter.check(&Token::Comma) {break}
			iter.eat();
		}
	}
	let parameters = iter.node(Kind::Parameters, parameters, from);
	expect!(iter, Token::CloseParen);

	let block = parse_block(iter)?;
	expect!(iter, Token::KeywordEnd);
	Ok(iter.node(Kind::FunctionBody, vec![parameters, block], from))
}

pub fn parse_expression_list<I>(iter: &mut TokenIterator<I>)
		-> Result<ParseTree> where I: Iterator<Item = LexerResult<Lexeme>> {
	let mut expressions = vec![parse_expression(iter)?];
	while iter.check(&Token::Comma) {
		iter.eat();
		expressions.push(parse_expression(iter)?);
	}
	Ok(ParseTree::wrap(Kind::ExpressionList, expressions))
}

/*
	Operator Precedence

	or
	and
	< > <= >= ~= ==
	|
	~
	&
	<< >>
	..
	+ -
	* / // %
	not # - ~ +
	^
*/

pub fn parse_expression<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	iter.nested(parse_expression_logical_or)
}

expression! {
	parse_expression_logical_or(parse_expression_logical_and) {KeywordOr},
	parse_expression_logical_and(parse_expression_comparison) {KeywordAnd},
	parse_expression_comparison(parse_expression_bitwise_or) {
		Equal, NotEqual, LessThan, GreaterThan, LessThanOrEqual,
		GreaterThanOrEqual
	},
	parse_expression_bitwise_or(parse_expression_bitwise_xor) {BitwiseOr},
	parse_expression_bitwise_xor(parse_expression_bitwise_and) {BitwiseNotOrXOr},
	parse_expression_bitwise_and(parse_expression_bitwise_shift) {BitwiseAnd},
	parse_expression_bitwise_shift(parse_expression_concat) {ShiftLeft, ShiftRight},
	parse_expression_term(parse_expression_factor) {Add, Minus},
	parse_expression_factor(parse_expression_unary) {
		Multiply, Divide, FloorDivide, Modulo
	}
}

// Note the right associativity.
fn parse_expression_concat<I>(iter: &mut TokenIterator<I>)
		-> Result<ParseTree> where I: Iterator<Item = LexerResult<Lexeme>> {
	let left = parse_expression_term(iter)?;

	if iter.check(&Token::Concat) {
		let operator = iter.leaf(Kind::Operator);
		let right = iter.nested(parse_expression_concat)?;
		Ok(ParseTree::wrap(Kind::Binary, vec![left, operator, right]))
	} else {Ok(left)}
}

// Uses recursion over loops.
fn parse_expression_unary<I>(iter: &mut TokenIterator<I>)
		-> Result<ParseTree> where I: Iterator<Item = LexerResult<Lexeme>> {
	match iter.peek().transpose()? {
		Some(Token::KeywordNot | Token::Length | Token::Minus
				| Token::BitwiseNotOrXOr | Token::Add) => {
			let operator = iter.leaf(Kind::Operator);
			let operand = iter.nested(parse_expression_unary)?;
			Ok(ParseTree::wrap(Kind::Unary, vec![operator, operand]))
		},
		_ => parse_expression_exponent(iter)
	}
}

// Again, note the right associativity. The exponent may itself be negated.
fn parse_expression_exponent<I>(iter: &mut TokenIterator<I>)
		-> Result<ParseTree> where I: Iterator<Item = LexerResult<Lexeme>> {
	let base = parse_expression_simple(iter)?;

	if iter.check(&Token::Exponent) {
		let operator = iter.leaf(Kind::Operator);
		let exponent = iter.nested(parse_expression_unary)?;
		Ok(ParseTree::wrap(Kind::Binary, vec![base, operator, exponent]))
	} else {Ok(base)}
}

fn parse_expression_simple<I>(iter: &mut TokenIterator<I>)
		-> Result<ParseTree> where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();

	Ok(match iter.peek().transpose()? {
		// Simple literals
		Some(Token::LiteralNil) => iter.leaf(Kind::Nil),
		Some(Token::LiteralTrue) => iter.leaf(Kind::True),
		Some(Token::LiteralFalse) => iter.leaf(Kind::False),
		Some(Token::VarArgs) => iter.leaf(Kind::VarArgs),
		Some(Token::Number(_)) => iter.leaf(Kind::Number),
		Some(Token::String(_)) => iter.leaf(Kind::String),

		// Complex literals
		Some(Token::OpenCurly) => parse_table(iter)?,
		Some(Token::KeywordFunction) => {
			iter.eat();
			let body = parse_function_body(iter)?;
			iter.node(Kind::FunctionDefinition, vec![body], from)
		},

		// query[[ ]]
		Some(Token::Identifier(identifier)) if identifier == "query"
				&& matches!(iter.peek_nth(1), Some(Ok(Token::OpenBracket)))
				&& matches!(iter.peek_nth(2), Some(Ok(Token::OpenBracket))) =>
			parse_query(iter)?,

		_ => parse_suffixed(iter)?
	})
}

/// Parses a name or parenthesized expression, followed by any number of
/// property accesses, indexes and calls.
pub fn parse_suffixed<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	let mut expression = match iter.peek().transpose()? {
		Some(Token::Identifier(_)) => iter.name()?,
		Some(Token::OpenParen) => {
			iter.eat();
			let inner = parse_expression(iter)?;
			expect!(iter, Token::CloseParen);
			iter.node(Kind::Parens, vec![inner], from)
		},
		_ => return Err(iter.unexpected())
	};

	loop {
		expression = match iter.peek().transpose()? {
			// actor.name
			Some(Token::Period) => {
				iter.eat();
				let name = iter.name()?;
				iter.node(Kind::Property, vec![expression, name], from)
			},

			// actor[index]
			Some(Token::OpenBracket) => {
				iter.eat();
				let index = parse_expression(iter)?;
				expect!(iter, Token::CloseBracket);
				iter.node(Kind::Index, vec![expression, index], from)
			},

			// actor:method()
			Some(Token::Colon) => {
				iter.eat();
				let name = iter.name()?;
				let arguments = parse_arguments(iter)?;
				iter.node(Kind::MethodCall, vec![expression, name, arguments], from)
			},

			// actor() actor "string" actor {table}
			Some(Token::OpenParen | Token::String(_) | Token::OpenCurly) => {
				let arguments = parse_arguments(iter)?;
				iter.node(Kind::Call, vec![expression, arguments], from)
			},

			_ => break Ok(expression)
		}
	}
}

fn parse_arguments<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();

	let arguments = match iter.peek().transpose()? {
		Some(Token::String(_)) => vec![iter.leaf(Kind::String)],
		Some(Token::OpenCurly) => vec![parse_table(iter)?],
		Some(Token::OpenParen) => {
			iter.eat();
			if iter.check(&Token::CloseParen) {
				iter.eat();
				Vec::new()
			} else {
				let list = parse_expression_list(iter)?;
				expect!(iter, Token::CloseParen);
				list.children
			}
		},
		_ => return Err(iter.unexpected())
	};

	Ok(iter.node(Kind::Arguments, arguments, from))
}

pub fn parse_table<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	expect!(iter, Token::OpenCurly);

	let mut fields = Vec::new();
	loop {
		let field_from = iter.position();
		match iter.peek().transpose()? {
			// }
			Some(Token::CloseCurly) => {iter.eat(); break},

			// [key] = value
			Some(Token::OpenBracket) => {
				iter.eat();
				let key = parse_expression(iter)?;
				expect!(iter, Token::CloseBracket);
				expect!(iter, Token::Assign);
				let value = parse_expression(iter)?;
				fields.push(iter.node(Kind::KeyedField, vec![key, value], field_from));
			},

			// name = value
			Some(Token::Identifier(_))
					if matches!(iter.peek_nth(1), Some(Ok(Token::Assign))) => {
				let name = iter.name()?;
				iter.eat();
				let value = parse_expression(iter)?;
				fields.push(iter.node(Kind::NamedField, vec![name, value], field_from));
			},

			// value
			_ => {
				let value = parse_expression(iter)?;
				fields.push(ParseTree::wrap(Kind::PositionalField, vec![value]));
			}
		}

		match iter.peek().transpose()? {
			Some(Token::Comma | Token::SemiColon) => iter.eat(),
			Some(Token::CloseCurly) => {iter.eat(); break},
			_ => return Err(iter.unexpected())
		}
	}

	Ok(iter.node(Kind::Table, fields, from))
}

/// Parses `query[[ clause... ]]`. The clause keywords are ordinary
/// identifiers everywhere else.
pub fn parse_query<I>(iter: &mut TokenIterator<I>) -> Result<ParseTree>
		where I: Iterator<Item = LexerResult<Lexeme>> {
	let from = iter.position();
	iter.eat();
	expect!(iter, Token::OpenBracket);
	expect!(iter, Token::OpenBracket);

	let mut clauses = Vec::new();
	loop {
		let clause_from = iter.position();
		let clause = match iter.peek().transpose()? {
			Some(Token::CloseBracket) => break,
			Some(Token::Identifier(clause)) => clause,
			_ => return Err(iter.unexpected())
		};

		let node = match &clause as &str {
			"from" => {
				iter.eat();
				let mut children = Vec::new();
				if let (Some(Ok(Token::Identifier(_))), Some(Ok(Token::Assign))) =
						(iter.peek(), iter.peek_nth(1)) {
					children.push(iter.name()?);
					iter.eat();
				}
				children.push(parse_expression(iter)?);
				iter.node(Kind::From, children, clause_from)
			},
			"where" => {
				iter.eat();
				let condition = parse_expression(iter)?;
				iter.node(Kind::Where, vec![condition], clause_from)
			},
			"group" => {
				iter.eat();
				if !iter.keyword("by") {return Err(iter.unexpected())}
				iter.eat();
				let keys = parse_expression_list(iter)?;
				iter.node(Kind::GroupBy, keys.children, clause_from)
			},
			"having" => {
				iter.eat();
				let condition = parse_expression(iter)?;
				iter.node(Kind::Having, vec![condition], clause_from)
			},
			"order" => {
				iter.eat();
				if !iter.keyword("by") {return Err(iter.unexpected())}
				iter.eat();
				let mut keys = Vec::new();
				loop {
					let key_from = iter.position();
					let mut key = vec![parse_expression(iter)?];
					if iter.keyword("asc") || iter.keyword("desc") {
						key.push(iter.leaf(Kind::Direction));
					}
					keys.push(iter.node(Kind::OrderKey, key, key_from));
					if !iter.check(&Token::Comma) {break}
					iter.eat();
				}
				iter.node(Kind::OrderBy, keys, clause_from)
			},
			"select" => {
				iter.eat();
				let projection = parse_expression(iter)?;
				iter.node(Kind::Select, vec![projection], clause_from)
			},
			"limit" => {
				iter.eat();
				let mut children = vec![parse_expression(iter)?];
				if iter.check(&Token::Comma) {
					iter.eat();
					children.push(parse_expression(iter)?);
				}
				iter.node(Kind::Limit, children, clause_from)
			},
			_ => return Err(iter.unexpected())
		};
		clauses.push(node);
	}

	expect!(iter, Token::CloseBracket);
	expect!(iter, Token::CloseBracket);
	Ok(iter.node(Kind::Query, clauses, from))
}

#[cfg(test)]
mod tests {
	use super::{parse_chunk, TokenIterator};
	use crate::ast::{Error, lexer::Lexer, tree::{Kind, ParseTree}};

	fn parse(source: &str) -> Result<ParseTree, Error> {
		parse_chunk(&mut TokenIterator::new(Lexer::new(source.chars())))
	}

	fn statement(source: &str) -> ParseTree {
		let chunk = parse(source).unwrap();
		chunk.children[0].children[0].clone()
	}

	fn kinds(tree: &ParseTree) -> Vec<Kind> {
		tree.children.iter().map(|child| child.kind).collect()
	}

	#[test]
	fn test_precedence() {
		// 1 + (2 * 3)
		let assign = statement("x = 1 + 2 * 3");
		let value = &assign.children[1].children[0];
		assert_eq!(value.kind, Kind::Binary);
		assert_eq!(value.children[1].text(), "+");
		assert_eq!(value.children[2].children[1].text(), "*");

		// -(2 ^ 2)
		let assign = statement("x = -2 ^ 2");
		let value = &assign.children[1].children[0];
		assert_eq!(value.kind, Kind::Unary);
		assert_eq!(value.children[1].kind, Kind::Binary);
	}

	#[test]
	fn test_concat_right_associative() {
		let assign = statement("x = a .. b .. c");
		let value = &assign.children[1].children[0];
		assert_eq!(value.children[0].kind, Kind::Name);
		assert_eq!(value.children[2].kind, Kind::Binary);
	}

	#[test]
	fn test_local_attributes() {
		let local = statement("local a <const>, b <close> = 1, nil");
		assert_eq!(kinds(&local), vec![Kind::AttributeNames, Kind::ExpressionList]);
		let names = &local.children[0];
		assert_eq!(names.children[0].children[1].text(), "const");
		assert_eq!(names.children[1].children[1].text(), "close");
	}

	#[test]
	fn test_method_function_name() {
		let function = statement("function a.b:c(x, ...) end");
		let name = &function.children[0];
		assert_eq!(kinds(name), vec![Kind::Name, Kind::Name, Kind::MethodName]);
		let parameters = &function.children[1].children[0];
		assert_eq!(kinds(parameters), vec![Kind::Name, Kind::VarArgs]);
	}

	#[test]
	fn test_call_statement_and_labels() {
		let chunk = parse("::top:: print 'hi' goto top").unwrap();
		assert_eq!(kinds(&chunk.children[0]),
			vec![Kind::Label, Kind::CallStatement, Kind::Goto]);
	}

	#[test]
	fn test_query() {
		let assign = statement(
			"r = query[[from p = pages where p.size > 1 order by p.name desc, p.size select p.name limit 3, 1]]");
		let query = &assign.children[1].children[0];
		assert_eq!(query.kind, Kind::Query);
		assert_eq!(kinds(query),
			vec![Kind::From, Kind::Where, Kind::OrderBy, Kind::Select, Kind::Limit]);
		assert_eq!(query.children[0].children[0].text(), "p");
		let order = &query.children[2];
		assert_eq!(order.children[0].children[1].text(), "desc");
		assert_eq!(order.children[1].children.len(), 1);
		assert_eq!(query.children[4].children.len(), 2);
	}

	#[test]
	fn test_query_is_still_a_name() {
		let assign = statement("x = query[1]");
		assert_eq!(assign.children[1].children[0].kind, Kind::Index);
	}

	#[test]
	fn test_nesting_is_bounded() {
		let deep = format!("x = {}1{}", "(".repeat(3000), ")".repeat(3000));
		let error = parse(&deep).unwrap_err();
		assert_eq!(error.to_string(), "chunk has too many syntax levels");
		assert!(!error.is_end_of_file());

		let blocks = format!("{}{}", "do ".repeat(500), "end ".repeat(500));
		let error = parse(&blocks).unwrap_err();
		assert_eq!(error.to_string(), "chunk has too many syntax levels");

		let unary = format!("x = {}1", "- ".repeat(1000));
		assert!(parse(&unary).is_err());

		let shallow = format!("x = {}1{}", "(".repeat(50), ")".repeat(50));
		assert!(parse(&shallow).is_ok());
	}

	#[test]
	fn test_errors() {
		let error = parse("x = = 1").unwrap_err();
		assert_eq!(error.to_string(), "unexpected symbol near '='");
		assert!(!error.is_end_of_file());

		let error = parse("if x then").unwrap_err();
		assert!(error.is_end_of_file());

		let error = parse("f() = 1").unwrap_err();
		assert_eq!(error.to_string(), "unexpected symbol near '='");
	}
}
