//! The typed syntax tree the evaluator runs.
//!
//! Every node is immutable once lowered and carries the [Context] it came
//! from. Nodes are shared with [Arc] so closures and queries can hold onto
//! the parts of the tree they need without copying.

use super::Context;
use hashbrown::HashMap;
use std::{
	fmt::{Display, Formatter, Result as FMTResult},
	sync::Arc
};

#[derive(Clone, Debug, Default)]
pub struct Block {
	pub statements: Vec<Statement>,
	pub context: Context,

	/// A label is declared directly in this block.
	pub has_label: bool,

	/// A goto appears somewhere in this block, nested blocks of the same
	/// function included.
	pub has_goto: bool,

	/// A `<close>` local is declared directly in this block.
	pub has_close: bool,

	/// Labels declared directly in this block, by statement index.
	pub labels: HashMap<String, usize>
}

impl Block {
	/// Whether running this block needs a close stack mark.
	pub fn needs_close_mark(&self) -> bool {
		self.has_close
	}

	/// Whether a goto may jump back to one of this block's labels past a
	/// `<close>` local, so the close stack height has to be recorded at each
	/// label.
	pub fn needs_label_marks(&self) -> bool {
		self.has_label && self.has_goto && self.has_close
	}
}

impl Display for Block {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		self.statements.iter().try_for_each(|statement| writeln!(f, "{}", statement))
	}
}

#[derive(Clone, Debug)]
pub struct Statement {
	pub kind: StatementKind,
	pub context: Context
}

#[derive(Clone, Debug)]
pub enum StatementKind {
	/// A lone `;`.
	Semicolon,

	/// A `::label::`.
	Label(String),

	Goto(String),

	Break,

	/// A `do ... end` block.
	Do(Arc<Block>),

	While {
		condition: Expression,
		block: Arc<Block>
	},

	/// A repeat loop. The condition can see the block's locals.
	Repeat {
		block: Arc<Block>,
		condition: Expression
	},

	If {
		/// Every `if` and `elseif` branch, in order.
		conditions: Vec<(Expression, Arc<Block>)>,
		r#else: Option<Arc<Block>>
	},

	NumericFor {
		variable: String,
		start: Expression,
		end: Expression,
		step: Option<Expression>,
		block: Arc<Block>
	},

	GenericFor {
		names: Vec<String>,
		expressions: Vec<Expression>,
		block: Arc<Block>
	},

	/// `function a.b:c() end`
	Function {
		name: FunctionName,
		body: Arc<FunctionBody>
	},

	LocalFunction {
		name: String,
		body: Arc<FunctionBody>
	},

	/// A call whose results are discarded.
	Call(Expression),

	Assign {
		/// Variables, property accesses and table accesses only.
		variables: Vec<Expression>,
		expressions: Vec<Expression>
	},

	Local {
		names: Vec<AttributeName>,
		expressions: Vec<Expression>
	},

	Return(Vec<Expression>)
}

impl Display for Statement {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match &self.kind {
			StatementKind::Semicolon => write!(f, ";"),
			StatementKind::Label(name) => write!(f, "::{}::", name),
			StatementKind::Goto(name) => write!(f, "goto {}", name),
			StatementKind::Break => write!(f, "break"),
			StatementKind::Do(block) => write!(f, "do\n{}end", block),
			StatementKind::While {condition, block} =>
				write!(f, "while {} do\n{}end", condition, block),
			StatementKind::Repeat {block, condition} =>
				write!(f, "repeat\n{}until {}", block, condition),

			StatementKind::If {conditions, r#else} => {
				for (index, (condition, block)) in conditions.iter().enumerate() {
					let keyword = if index == 0 {"if"} else {"elseif"};
					write!(f, "{} {} then\n{}", keyword, condition, block)?;
				}
				if let Some(block) = r#else {write!(f, "else\n{}", block)?}
				write!(f, "end")
			},

			StatementKind::NumericFor {variable, start, end, step, block} => {
				write!(f, "for {} = {}, {}", variable, start, end)?;
				if let Some(step) = step {write!(f, ", {}", step)?}
				write!(f, " do\n{}end", block)
			},

			StatementKind::GenericFor {names, expressions, block} =>
				write!(f, "for {} in {} do\n{}end", names.join(", "),
					List(expressions), block),

			StatementKind::Function {name, body} =>
				write!(f, "function {}{}", name, body),
			StatementKind::LocalFunction {name, body} =>
				write!(f, "local function {}{}", name, body),

			StatementKind::Call(call) => write!(f, "{}", call),

			StatementKind::Assign {variables, expressions} =>
				write!(f, "{} = {}", List(variables), List(expressions)),

			StatementKind::Local {names, expressions} => {
				write!(f, "local {}", List(names))?;
				if !expressions.is_empty() {write!(f, " = {}", List(expressions))?}
				Ok(())
			},

			StatementKind::Return(values) if values.is_empty() => write!(f, "return"),
			StatementKind::Return(values) => write!(f, "return {}", List(values))
		}
	}
}

/// Comma separated display of a slice.
struct List<'a, T>(&'a [T]);

impl<T> Display for List<'_, T>
		where T: Display {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		self.0.iter().enumerate().try_for_each(|(index, item)|
			if index == 0 {write!(f, "{}", item)} else {write!(f, ", {}", item)})
	}
}

#[derive(Clone, Debug)]
pub struct FunctionBody {
	pub parameters: Vec<String>,
	pub varargs: bool,
	pub block: Arc<Block>,
	pub context: Context
}

impl FunctionBody {
	/// The parameter list as written, `...` included.
	pub fn signature(&self) -> String {
		let mut parameters = self.parameters.clone();
		if self.varargs {parameters.push("...".to_owned())}
		parameters.join(", ")
	}
}

impl Display for FunctionBody {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		write!(f, "({})\n{}end", self.signature(), self.block)
	}
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionName {
	pub path: Vec<String>,
	pub method: Option<String>
}

impl Display for FunctionName {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		write!(f, "{}", self.path.join("."))?;
		if let Some(method) = &self.method {write!(f, ":{}", method)?}
		Ok(())
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Attribute {
	Const,
	Close
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeName {
	pub name: String,
	pub attribute: Option<Attribute>
}

impl Display for AttributeName {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self.attribute {
			Some(Attribute::Const) => write!(f, "{} <const>", self.name),
			Some(Attribute::Close) => write!(f, "{} <close>", self.name),
			None => write!(f, "{}", self.name)
		}
	}
}

#[derive(Clone, Debug)]
pub struct Expression {
	pub kind: ExpressionKind,
	pub context: Context
}

impl Expression {
	/// Whether this expression can produce more than one value, and so is
	/// expanded when it is last in a list.
	pub fn is_multiple(&self) -> bool {
		matches!(self.kind, ExpressionKind::Call {..}
			| ExpressionKind::MethodCall {..} | ExpressionKind::VarArgs)
	}
}

#[derive(Clone, Debug)]
pub enum ExpressionKind {
	// Singleton literals
	Nil,
	Boolean(bool),
	VarArgs,

	// Literals

	/// A numeric literal written without a decimal point or exponent.
	Integer(i64),

	/// Any other numeric literal.
	Float(f64),

	/// A string literal, escapes already decoded.
	String(Arc<str>),

	/// A reference to a local or global.
	Variable(String),

	// Operations
	Binary {
		left: Arc<Expression>,
		operator: BinaryOperator,
		right: Arc<Expression>
	},

	Unary {
		operator: UnaryOperator,
		operand: Arc<Expression>
	},

	/// Parenthesis, which truncate multiple results to one.
	Parenthesized(Arc<Expression>),

	/// `object.property`
	PropertyAccess {
		object: Arc<Expression>,
		property: Arc<str>
	},

	/// `object[key]`
	TableAccess {
		object: Arc<Expression>,
		key: Arc<Expression>
	},

	Call {
		prefix: Arc<Expression>,
		arguments: Vec<Expression>
	},

	MethodCall {
		prefix: Arc<Expression>,
		name: Arc<str>,
		arguments: Vec<Expression>
	},

	// Complex literals
	Function(Arc<FunctionBody>),
	Table(Vec<TableField>),

	/// A `query[[ ]]` expression.
	Query(Vec<QueryClause>)
}

impl Display for Expression {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match &self.kind {
			ExpressionKind::Nil => write!(f, "nil"),
			ExpressionKind::Boolean(boolean) => write!(f, "{}", boolean),
			ExpressionKind::VarArgs => write!(f, "..."),
			ExpressionKind::Integer(integer) => write!(f, "{}", integer),
			ExpressionKind::Float(float) => write!(f, "{:?}", float),
			ExpressionKind::String(string) => write!(f, "{:?}", string),
			ExpressionKind::Variable(name) => write!(f, "{}", name),

			ExpressionKind::Binary {left, operator, right} =>
				write!(f, "{} {} {}", left, operator, right),
			ExpressionKind::Unary {operator: UnaryOperator::LogicalNot, operand} =>
				write!(f, "not {}", operand),
			ExpressionKind::Unary {operator, operand} =>
				write!(f, "{}{}", operator, operand),
			ExpressionKind::Parenthesized(inner) => write!(f, "({})", inner),

			ExpressionKind::PropertyAccess {object, property} =>
				write!(f, "{}.{}", object, property),
			ExpressionKind::TableAccess {object, key} =>
				write!(f, "{}[{}]", object, key),
			ExpressionKind::Call {prefix, arguments} =>
				write!(f, "{}({})", prefix, List(arguments)),
			ExpressionKind::MethodCall {prefix, name, arguments} =>
				write!(f, "{}:{}({})", prefix, name, List(arguments)),

			ExpressionKind::Function(body) => write!(f, "function{}", body),
			ExpressionKind::Table(fields) => write!(f, "{{{}}}", List(fields)),

			ExpressionKind::Query(clauses) => {
				write!(f, "query[[")?;
				clauses.iter().try_for_each(|clause| write!(f, " {}", clause))?;
				write!(f, " ]]")
			}
		}
	}
}

#[derive(Clone, Debug)]
pub enum TableField {
	/// `value`
	Positional(Expression),

	/// `name = value`
	Named(Arc<str>, Expression),

	/// `[key] = value`
	Keyed(Expression, Expression)
}

impl Display for TableField {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::Positional(value) => write!(f, "{}", value),
			Self::Named(name, value) => write!(f, "{} = {}", name, value),
			Self::Keyed(key, value) => write!(f, "[{}] = {}", key, value)
		}
	}
}

#[derive(Clone, Debug)]
pub struct OrderKey {
	pub expression: Arc<Expression>,
	pub descending: bool
}

#[derive(Clone, Debug)]
pub enum QueryClause {
	From {
		/// The name each item is bound to, if given.
		name: Option<String>,
		expression: Expression
	},
	Where(Arc<Expression>),
	GroupBy(Vec<Arc<Expression>>),
	Having(Arc<Expression>),
	OrderBy(Vec<OrderKey>),
	Select(Arc<Expression>),
	Limit {
		limit: Expression,
		offset: Option<Expression>
	}
}

impl Display for QueryClause {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::From {name: Some(name), expression} =>
				write!(f, "from {} = {}", name, expression),
			Self::From {name: None, expression} => write!(f, "from {}", expression),
			Self::Where(condition) => write!(f, "where {}", condition),
			Self::GroupBy(keys) => write!(f, "group by {}", List(keys)),
			Self::Having(condition) => write!(f, "having {}", condition),
			Self::OrderBy(keys) => {
				write!(f, "order by ")?;
				keys.iter().enumerate().try_for_each(|(index, key)| {
					if index != 0 {write!(f, ", ")?}
					write!(f, "{}", key.expression)?;
					if key.descending {write!(f, " desc")?}
					Ok(())
				})
			},
			Self::Select(projection) => write!(f, "select {}", projection),
			Self::Limit {limit, offset: Some(offset)} =>
				write!(f, "limit {}, {}", limit, offset),
			Self::Limit {limit, offset: None} => write!(f, "limit {}", limit)
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinaryOperator {
	// Arithmetic
	Add,
	Subtract,
	Multiply,
	Divide,
	FloorDivide,
	Modulo,
	Exponent,

	// Bitwise
	BitwiseAnd,
	BitwiseOr,
	BitwiseXOr,
	ShiftLeft,
	ShiftRight,

	// Relational
	Equal,
	NotEqual,
	LessThan,
	LessThanOrEqual,
	GreaterThan,
	GreaterThanOrEqual,

	// Logical
	LogicalAnd,
	LogicalOr,

	// Other
	Concat
}

impl BinaryOperator {
	/// Maps an operator as written to the operator.
	pub fn from_symbol(symbol: &str) -> Option<Self> {
		Some(match symbol {
			"+" => Self::Add,
			"-" => Self::Subtract,
			"*" => Self::Multiply,
			"/" => Self::Divide,
			"//" => Self::FloorDivide,
			"%" => Self::Modulo,
			"^" => Self::Exponent,
			"&" => Self::BitwiseAnd,
			"|" => Self::BitwiseOr,
			"~" => Self::BitwiseXOr,
			"<<" => Self::ShiftLeft,
			">>" => Self::ShiftRight,
			"==" => Self::Equal,
			"~=" => Self::NotEqual,
			"<" => Self::LessThan,
			"<=" => Self::LessThanOrEqual,
			">" => Self::GreaterThan,
			">=" => Self::GreaterThanOrEqual,
			"and" => Self::LogicalAnd,
			"or" => Self::LogicalOr,
			".." => Self::Concat,
			_ => return None
		})
	}

	/// The metamethod this operator dispatches to, if it has one.
	pub fn metamethod(self) -> Option<&'static str> {
		Some(match self {
			Self::Add => "__add",
			Self::Subtract => "__sub",
			Self::Multiply => "__mul",
			Self::Divide => "__div",
			Self::FloorDivide => "__idiv",
			Self::Modulo => "__mod",
			Self::Exponent => "__pow",
			Self::BitwiseAnd => "__band",
			Self::BitwiseOr => "__bor",
			Self::BitwiseXOr => "__bxor",
			Self::ShiftLeft => "__shl",
			Self::ShiftRight => "__shr",
			Self::Equal | Self::NotEqual => "__eq",
			Self::LessThan | Self::GreaterThan => "__lt",
			Self::LessThanOrEqual | Self::GreaterThanOrEqual => "__le",
			Self::Concat => "__concat",
			Self::LogicalAnd | Self::LogicalOr => return None
		})
	}
}

impl Display for BinaryOperator {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			// Arithmetic
			Self::Add => write!(f, "+"),
			Self::Subtract => write!(f, "-"),
			Self::Multiply => write!(f, "*"),
			Self::Divide => write!(f, "/"),
			Self::FloorDivide => write!(f, "//"),
			Self::Modulo => write!(f, "%"),
			Self::Exponent => write!(f, "^"),

			// Bitwise
			Self::BitwiseAnd => write!(f, "&"),
			Self::BitwiseOr => write!(f, "|"),
			Self::BitwiseXOr => write!(f, "~"),
			Self::ShiftLeft => write!(f, "<<"),
			Self::ShiftRight => write!(f, ">>"),

			// Relational
			Self::Equal => write!(f, "=="),
			Self::NotEqual => write!(f, "~="),
			Self::LessThan => write!(f, "<"),
			Self::LessThanOrEqual => write!(f, "<="),
			Self::GreaterThan => write!(f, ">"),
			Self::GreaterThanOrEqual => write!(f, ">="),

			// Logical
			Self::LogicalAnd => write!(f, "and"),
			Self::LogicalOr => write!(f, "or"),

			// Other
			Self::Concat => write!(f, "..")
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UnaryOperator {
	// Arithmetic
	Negate,

	// Bitwise
	BitwiseNot,

	// Logical
	LogicalNot,

	// Other
	Length
}

impl UnaryOperator {
	pub fn from_symbol(symbol: &str) -> Option<Self> {
		Some(match symbol {
			"-" => Self::Negate,
			"~" => Self::BitwiseNot,
			"not" => Self::LogicalNot,
			"#" => Self::Length,
			_ => return None
		})
	}
}

impl Display for UnaryOperator {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			// Arithmetic
			Self::Negate => write!(f, "-"),

			// Bitwise
			Self::BitwiseNot => write!(f, "~"),

			// Logical
			Self::LogicalNot => write!(f, "not"),

			// Other
			Self::Length => write!(f, "#")
		}
	}
}
