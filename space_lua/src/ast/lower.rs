//! Lowering of the generic [ParseTree] into typed [syntax](super::syntax)
//! nodes.

use self::super::{
	Context,
	syntax::{
		Attribute, AttributeName, BinaryOperator, Block, Expression,
		ExpressionKind, FunctionBody, FunctionName, OrderKey, QueryClause,
		Statement, StatementKind, TableField, UnaryOperator
	},
	tree::{Kind, ParseTree}
};
use hashbrown::HashMap;
use std::{
	error::Error as STDError,
	fmt::{Display, Formatter, Result as FMTResult},
	result::Result as STDResult,
	sync::Arc
};

pub type Result<T> = STDResult<T, Error>;

/// A static error found while lowering, or while validating gotos.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
	pub message: String,
	pub context: Context
}

impl Error {
	pub fn new(message: impl Into<String>, context: Context) -> Self {
		Self {message: message.into(), context}
	}
}

impl STDError for Error {}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		write!(f, "{}", self.message)
	}
}

/// Lowers a [Kind::Chunk] (or bare [Kind::Block]) tree.
pub fn lower_chunk(tree: &ParseTree, reference: Option<Arc<str>>)
		-> Result<Arc<Block>> {
	let lowerer = Lowerer {reference};
	match tree.kind {
		Kind::Chunk => match tree.children.first() {
			Some(block) => lowerer.block(block),
			None => Ok(Arc::new(Block {
				context: lowerer.context(tree), ..Block::default()
			}))
		},
		_ => lowerer.block(tree)
	}
}

struct Lowerer {
	reference: Option<Arc<str>>
}

impl Lowerer {
	fn context(&self, node: &ParseTree) -> Context {
		Context {from: node.from, to: node.to, reference: self.reference.clone()}
	}

	fn error(&self, message: impl Into<String>, node: &ParseTree) -> Error {
		Error::new(message, self.context(node))
	}

	fn child<'a>(&self, node: &'a ParseTree, index: usize) -> Result<&'a ParseTree> {
		node.children.get(index).ok_or_else(||
			self.error(format!("malformed {:?} node", node.kind), node))
	}

	fn expect<'a>(&self, node: &'a ParseTree, kind: Kind) -> Result<&'a ParseTree> {
		match node.kind == kind {
			true => Ok(node),
			false => Err(self.error(
				format!("expected {:?}, found {:?}", kind, node.kind), node))
		}
	}

	fn name(&self, node: &ParseTree) -> Result<String> {
		Ok(self.expect(node, Kind::Name)?.text().to_owned())
	}

	fn block(&self, node: &ParseTree) -> Result<Arc<Block>> {
		self.expect(node, Kind::Block)?;

		let statements: Vec<Statement> = node.children.iter()
			.map(|child| self.statement(child))
			.collect::<Result<_>>()?;

		let mut labels = HashMap::new();
		let mut has_close = false;
		let mut has_goto = false;
		for (index, statement) in statements.iter().enumerate() {
			match &statement.kind {
				StatementKind::Label(name) => {labels.entry(name.clone()).or_insert(index);},
				StatementKind::Goto(_) => has_goto = true,
				StatementKind::Local {names, ..} => has_close |= names.iter()
					.any(|name| name.attribute == Some(Attribute::Close)),
				_ => ()
			}
			has_goto |= nested_blocks(statement).any(|block| block.has_goto);
		}

		Ok(Arc::new(Block {
			has_label: !labels.is_empty(),
			has_goto,
			has_close,
			labels,
			statements,
			context: self.context(node)
		}))
	}

	fn statement(&self, node: &ParseTree) -> Result<Statement> {
		let kind = match node.kind {
			Kind::Semicolon => StatementKind::Semicolon,
			Kind::Label => StatementKind::Label(self.name(self.child(node, 0)?)?),
			Kind::Goto => StatementKind::Goto(self.name(self.child(node, 0)?)?),
			Kind::Break => StatementKind::Break,
			Kind::Do => StatementKind::Do(self.block(self.child(node, 0)?)?),

			Kind::While => StatementKind::While {
				condition: self.expression(self.child(node, 0)?)?,
				block: self.block(self.child(node, 1)?)?
			},

			Kind::Repeat => StatementKind::Repeat {
				block: self.block(self.child(node, 0)?)?,
				condition: self.expression(self.child(node, 1)?)?
			},

			Kind::If => {
				let mut conditions = Vec::new();
				let mut r#else = None;
				for branch in &node.children {
					match branch.kind {
						Kind::Condition => conditions.push((
							self.expression(self.child(branch, 0)?)?,
							self.block(self.child(branch, 1)?)?
						)),
						Kind::Else => r#else = Some(self.block(self.child(branch, 0)?)?),
						_ => return Err(self.error("malformed if statement", branch))
					}
				}
				StatementKind::If {conditions, r#else}
			},

			Kind::NumericFor => {
				let (step, block) = match node.children.len() {
					4 => (None, self.child(node, 3)?),
					_ => (Some(self.expression(self.child(node, 3)?)?),
						self.child(node, 4)?)
				};
				StatementKind::NumericFor {
					variable: self.name(self.child(node, 0)?)?,
					start: self.expression(self.child(node, 1)?)?,
					end: self.expression(self.child(node, 2)?)?,
					step,
					block: self.block(block)?
				}
			},

			Kind::GenericFor => StatementKind::GenericFor {
				names: self.child(node, 0)?.children.iter()
					.map(|name| self.name(name))
					.collect::<Result<_>>()?,
				expressions: self.expressions(self.child(node, 1)?)?,
				block: self.block(self.child(node, 2)?)?
			},

			Kind::FunctionStatement => {
				let name = self.expect(self.child(node, 0)?, Kind::FunctionName)?;
				let mut path = Vec::new();
				let mut method = None;
				for part in &name.children {
					match part.kind {
						Kind::MethodName => method = Some(part.text().to_owned()),
						_ => path.push(self.name(part)?)
					}
				}
				let mut body = self.function_body(self.child(node, 1)?)?;
				if method.is_some() {
					Arc::make_mut(&mut body).parameters.insert(0, "self".to_owned());
				}
				StatementKind::Function {name: FunctionName {path, method}, body}
			},

			Kind::LocalFunction => StatementKind::LocalFunction {
				name: self.name(self.child(node, 0)?)?,
				body: self.function_body(self.child(node, 1)?)?
			},

			Kind::CallStatement =>
				StatementKind::Call(self.expression(self.child(node, 0)?)?),

			Kind::Assign => StatementKind::Assign {
				variables: self.expressions(self.child(node, 0)?)?,
				expressions: self.expressions(self.child(node, 1)?)?
			},

			Kind::Local => {
				let names_node = self.expect(self.child(node, 0)?, Kind::AttributeNames)?;
				let names = names_node.children.iter()
					.map(|name| self.attribute_name(name))
					.collect::<Result<Vec<_>>>()?;
				let closes = names.iter()
					.filter(|name| name.attribute == Some(Attribute::Close))
					.count();
				if closes > 1 {
					return Err(self.error("multiple <close> variables in local list", node))
				}
				let expressions = match node.children.get(1) {
					Some(list) => self.expressions(list)?,
					None => Vec::new()
				};
				StatementKind::Local {names, expressions}
			},

			Kind::Return => StatementKind::Return(match node.children.first() {
				Some(list) => self.expressions(list)?,
				None => Vec::new()
			}),

			kind => return Err(self.error(format!("unexpected {:?} statement", kind), node))
		};

		Ok(Statement {kind, context: self.context(node)})
	}

	fn attribute_name(&self, node: &ParseTree) -> Result<AttributeName> {
		self.expect(node, Kind::AttributeName)?;
		let name = self.name(self.child(node, 0)?)?;
		let attribute = match node.children.get(1) {
			None => None,
			Some(attribute) => Some(match attribute.text() {
				"const" => Attribute::Const,
				"close" => Attribute::Close,
				other => return Err(self.error(
					format!("unknown attribute '{}'", other), attribute))
			})
		};
		Ok(AttributeName {name, attribute})
	}

	fn function_body(&self, node: &ParseTree) -> Result<Arc<FunctionBody>> {
		self.expect(node, Kind::FunctionBody)?;
		let mut parameters = Vec::new();
		let mut varargs = false;
		for parameter in &self.child(node, 0)?.children {
			match parameter.kind {
				Kind::VarArgs => varargs = true,
				_ => parameters.push(self.name(parameter)?)
			}
		}

		Ok(Arc::new(FunctionBody {
			parameters,
			varargs,
			block: self.block(self.child(node, 1)?)?,
			context: self.context(node)
		}))
	}

	fn expressions(&self, node: &ParseTree) -> Result<Vec<Expression>> {
		node.children.iter().map(|child| self.expression(child)).collect()
	}

	fn shared(&self, node: &ParseTree) -> Result<Arc<Expression>> {
		self.expression(node).map(Arc::new)
	}

	fn expression(&self, node: &ParseTree) -> Result<Expression> {
		let kind = match node.kind {
			Kind::Nil => ExpressionKind::Nil,
			Kind::True => ExpressionKind::Boolean(true),
			Kind::False => ExpressionKind::Boolean(false),
			Kind::VarArgs => ExpressionKind::VarArgs,
			Kind::Number => self.number(node)?,
			Kind::String => ExpressionKind::String(self.string(node)?.into()),
			Kind::Name => ExpressionKind::Variable(node.text().to_owned()),

			Kind::Binary => {
				let operator = self.child(node, 1)?;
				ExpressionKind::Binary {
					left: self.shared(self.child(node, 0)?)?,
					operator: BinaryOperator::from_symbol(operator.text())
						.ok_or_else(|| self.error(format!("unexpected symbol near '{}'",
							operator.text()), operator))?,
					right: self.shared(self.child(node, 2)?)?
				}
			},

			Kind::Unary => {
				let operator = self.child(node, 0)?;
				ExpressionKind::Unary {
					operator: UnaryOperator::from_symbol(operator.text())
						.ok_or_else(|| self.error(format!("unexpected symbol near '{}'",
							operator.text()), operator))?,
					operand: self.shared(self.child(node, 1)?)?
				}
			},

			Kind::Parens =>
				ExpressionKind::Parenthesized(self.shared(self.child(node, 0)?)?),

			Kind::Property => ExpressionKind::PropertyAccess {
				object: self.shared(self.child(node, 0)?)?,
				property: self.name(self.child(node, 1)?)?.into()
			},

			Kind::Index => ExpressionKind::TableAccess {
				object: self.shared(self.child(node, 0)?)?,
				key: self.shared(self.child(node, 1)?)?
			},

			Kind::Call => ExpressionKind::Call {
				prefix: self.shared(self.child(node, 0)?)?,
				arguments: self.expressions(self.child(node, 1)?)?
			},

			Kind::MethodCall => ExpressionKind::MethodCall {
				prefix: self.shared(self.child(node, 0)?)?,
				name: self.name(self.child(node, 1)?)?.into(),
				arguments: self.expressions(self.child(node, 2)?)?
			},

			Kind::FunctionDefinition =>
				ExpressionKind::Function(self.function_body(self.child(node, 0)?)?),

			Kind::Table => ExpressionKind::Table(node.children.iter()
				.map(|field| self.table_field(field))
				.collect::<Result<_>>()?),

			Kind::Query => ExpressionKind::Query(node.children.iter()
				.map(|clause| self.query_clause(clause))
				.collect::<Result<_>>()?),

			kind => return Err(self.error(format!("unexpected {:?} expression", kind), node))
		};

		Ok(Expression {kind, context: self.context(node)})
	}

	fn table_field(&self, node: &ParseTree) -> Result<TableField> {
		Ok(match node.kind {
			Kind::PositionalField =>
				TableField::Positional(self.expression(self.child(node, 0)?)?),
			Kind::NamedField => TableField::Named(
				self.name(self.child(node, 0)?)?.into(),
				self.expression(self.child(node, 1)?)?
			),
			Kind::KeyedField => TableField::Keyed(
				self.expression(self.child(node, 0)?)?,
				self.expression(self.child(node, 1)?)?
			),
			kind => return Err(self.error(format!("unexpected {:?} field", kind), node))
		})
	}

	fn query_clause(&self, node: &ParseTree) -> Result<QueryClause> {
		Ok(match node.kind {
			Kind::From => match node.children.len() {
				1 => QueryClause::From {
					name: None,
					expression: self.expression(self.child(node, 0)?)?
				},
				_ => QueryClause::From {
					name: Some(self.name(self.child(node, 0)?)?),
					expression: self.expression(self.child(node, 1)?)?
				}
			},
			Kind::Where => QueryClause::Where(self.shared(self.child(node, 0)?)?),
			Kind::GroupBy => QueryClause::GroupBy(node.children.iter()
				.map(|key| self.shared(key))
				.collect::<Result<_>>()?),
			Kind::Having => QueryClause::Having(self.shared(self.child(node, 0)?)?),
			Kind::OrderBy => QueryClause::OrderBy(node.children.iter()
				.map(|key| Ok(OrderKey {
					expression: self.shared(self.child(key, 0)?)?,
					descending: key.children.get(1)
						.map_or(false, |direction| direction.text() == "desc")
				}))
				.collect::<Result<_>>()?),
			Kind::Select => QueryClause::Select(self.shared(self.child(node, 0)?)?),
			Kind::Limit => QueryClause::Limit {
				limit: self.expression(self.child(node, 0)?)?,
				offset: node.children.get(1)
					.map(|offset| self.expression(offset))
					.transpose()?
			},
			kind => return Err(self.error(format!("unexpected {:?} clause", kind), node))
		})
	}

	fn number(&self, node: &ParseTree) -> Result<ExpressionKind> {
		parse_number(node.text()).ok_or_else(|| self.error(
			format!("malformed number near '{}'", node.text()), node))
	}

	fn string(&self, node: &ParseTree) -> Result<String> {
		decode_string(node.text())
			.map_err(|message| self.error(message, node))
	}
}

/// The blocks nested in a statement that belong to the same function.
pub(crate) fn nested_blocks(statement: &Statement)
		-> Box<dyn Iterator<Item = &Arc<Block>> + '_> {
	match &statement.kind {
		StatementKind::Do(block)
			| StatementKind::While {block, ..}
			| StatementKind::Repeat {block, ..}
			| StatementKind::NumericFor {block, ..}
			| StatementKind::GenericFor {block, ..} => Box::new(std::iter::once(block)),
		StatementKind::If {conditions, r#else} => Box::new(conditions.iter()
			.map(|(_, block)| block)
			.chain(r#else.iter())),
		_ => Box::new(std::iter::empty())
	}
}

/// Parses a numeric literal, tagging it integer or float by how it was
/// written. Decimal integers too large for an integer become floats, while
/// hexadecimal integers wrap around.
pub fn parse_number(text: &str) -> Option<ExpressionKind> {
	let text = text.trim();
	if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
		if hex.contains(['.', 'p', 'P']) {
			return parse_hex_float(hex).map(ExpressionKind::Float)
		}
		if hex.is_empty() {return None}
		return hex.chars().try_fold(0i64, |number, digit| Some(number
			.wrapping_mul(16).wrapping_add(digit.to_digit(16)? as i64)))
			.map(ExpressionKind::Integer)
	}

	if text.contains(['.', 'e', 'E', 'n', 'N', 'i', 'I']) {
		// Rust accepts "inf" and "nan", Lua doesn't.
		if text.contains(['n', 'N', 'i', 'I']) {return None}
		return text.parse().ok().map(ExpressionKind::Float)
	}

	match text.parse::<i64>() {
		Ok(integer) => Some(ExpressionKind::Integer(integer)),
		Err(_) if !text.is_empty() && text.bytes().all(|byte| byte.is_ascii_digit()) =>
			text.parse().ok().map(ExpressionKind::Float),
		Err(_) => None
	}
}

fn parse_hex_float(hex: &str) -> Option<f64> {
	let (mantissa, exponent) = match hex.find(['p', 'P']) {
		Some(index) => (&hex[..index], hex[index + 1..].parse::<i32>().ok()?),
		None => (hex, 0)
	};
	let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
	if whole.is_empty() && fraction.is_empty() {return None}

	let mut value = 0f64;
	for digit in whole.chars() {value = value * 16.0 + digit.to_digit(16)? as f64}
	let mut scale = 1.0 / 16.0;
	for digit in fraction.chars() {
		value += digit.to_digit(16)? as f64 * scale;
		scale /= 16.0;
	}
	Some(value * 2f64.powi(exponent))
}

/// Decodes a string literal as written, quotes or long brackets included.
pub fn decode_string(text: &str) -> STDResult<String, String> {
	if text.starts_with('[') {
		let level = text[1..].chars().take_while(|&character| character == '=').count();
		let open = level + 2;
		let close = level + 2;
		if text.len() < open + close {return Err("unfinished long string".to_owned())}
		let body = &text[open..text.len() - close];
		let body = body.strip_prefix("\r\n")
			.or_else(|| body.strip_prefix('\n'))
			.unwrap_or(body);
		return Ok(body.to_owned())
	}

	let inner = text.get(1..text.len().saturating_sub(1))
		.ok_or_else(|| "unfinished string".to_owned())?;
	let mut bytes = Vec::with_capacity(inner.len());
	let mut characters = inner.chars().peekable();

	while let Some(character) = characters.next() {
		if character != '\\' {
			let mut buffer = [0; 4];
			bytes.extend_from_slice(character.encode_utf8(&mut buffer).as_bytes());
			continue
		}

		match characters.next() {
			Some('n') => bytes.push(b'\n'),
			Some('t') => bytes.push(b'\t'),
			Some('r') => bytes.push(b'\r'),
			Some('a') => bytes.push(0x07),
			Some('b') => bytes.push(0x08),
			Some('f') => bytes.push(0x0C),
			Some('v') => bytes.push(0x0B),
			Some('\\') => bytes.push(b'\\'),
			Some('"') => bytes.push(b'"'),
			Some('\'') => bytes.push(b'\''),
			Some('\n') => bytes.push(b'\n'),
			Some('x') => {
				let digits: String = (0..2).filter_map(|_| characters.next()).collect();
				let byte = u8::from_str_radix(&digits, 16)
					.map_err(|_| format!("hexadecimal digit expected near '\\x{}'", digits))?;
				bytes.push(byte);
			},
			Some('z') => while let Some(' ' | '\n' | '\r' | '\t' | '\x0B' | '\x0C') =
				characters.peek() {characters.next();},
			Some('u') => {
				if characters.next() != Some('{') {
					return Err("missing '{' in \\u{xxxx}".to_owned())
				}
				let digits: String = characters.by_ref()
					.take_while(|&character| character != '}').collect();
				let code = u32::from_str_radix(&digits, 16)
					.map_err(|_| format!("hexadecimal digit expected near '\\u{{{}'", digits))?;
				let character = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
				let mut buffer = [0; 4];
				bytes.extend_from_slice(character.encode_utf8(&mut buffer).as_bytes());
			},
			Some(digit @ '0'..='9') => {
				let mut code = digit.to_digit(10).unwrap_or(0);
				for _ in 0..2 {
					match characters.peek().and_then(|next| next.to_digit(10)) {
						Some(next) => {code = code * 10 + next; characters.next();},
						None => break
					}
				}
				let byte = u8::try_from(code)
					.map_err(|_| format!("decimal escape too large near '\\{}'", code))?;
				bytes.push(byte);
			},
			Some(other) => return Err(format!("invalid escape sequence '\\{}'", other)),
			None => return Err("unfinished string".to_owned())
		}
	}

	Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
	use super::{decode_string, parse_number};
	use crate::ast::{parse, syntax::{ExpressionKind, StatementKind}};

	#[test]
	fn test_number_tags() {
		assert!(matches!(parse_number("10"), Some(ExpressionKind::Integer(10))));
		assert!(matches!(parse_number("0xff"), Some(ExpressionKind::Integer(255))));
		assert!(matches!(parse_number("1.0"), Some(ExpressionKind::Float(float)) if float == 1.0));
		assert!(matches!(parse_number("1e2"), Some(ExpressionKind::Float(float)) if float == 100.0));
		assert!(matches!(parse_number("0x1p4"), Some(ExpressionKind::Float(float)) if float == 16.0));
		assert!(matches!(parse_number("0xffffffffffffffff"), Some(ExpressionKind::Integer(-1))));
		assert!(matches!(parse_number("9223372036854775808"), Some(ExpressionKind::Float(_))));
		assert!(parse_number("inf").is_none());
	}

	#[test]
	fn test_string_escapes() {
		assert_eq!(decode_string(r#""a\tb\n""#).unwrap(), "a\tb\n");
		assert_eq!(decode_string(r#"'\65\x42\u{43}'"#).unwrap(), "ABC");
		assert_eq!(decode_string("'a\\z   \n  b'").unwrap(), "ab");
		assert!(decode_string(r#"'\q'"#).is_err());
	}

	#[test]
	fn test_long_string_drops_first_newline() {
		assert_eq!(decode_string("[[\nline -- kept]]").unwrap(), "line -- kept");
		assert_eq!(decode_string("[==[\n\nx]==]").unwrap(), "\nx");
	}

	#[test]
	fn test_unary_plus_rejected() {
		let error = parse("x = +1", None).unwrap_err();
		assert_eq!(error.to_string(), "unexpected symbol near '+'");
	}

	#[test]
	fn test_attributes() {
		let error = parse("local x <shiny> = 1", None).unwrap_err();
		assert_eq!(error.to_string(), "unknown attribute 'shiny'");

		let error = parse("local a <close>, b <close> = nil, nil", None).unwrap_err();
		assert_eq!(error.to_string(), "multiple <close> variables in local list");

		assert!(parse("local a <const>, b <close> = 1, nil", None).is_ok());
	}

	#[test]
	fn test_block_flags() {
		let block = parse("do local x <close> = nil end ::a:: goto a", None).unwrap();
		assert!(block.has_label && block.has_goto && !block.has_close);
		assert_eq!(block.labels.get("a"), Some(&1));
		match &block.statements[0].kind {
			StatementKind::Do(inner) => assert!(inner.has_close && !inner.needs_label_marks()),
			_ => panic!("expected do block")
		}
		assert!(!block.needs_label_marks());

		let block = parse("::top:: local x <close> = nil do goto top end", None).unwrap();
		assert!(block.has_goto && block.needs_label_marks());
		let block = parse("::top:: local x <close> = nil", None).unwrap();
		assert!(!block.has_goto && !block.needs_label_marks());
	}
}
