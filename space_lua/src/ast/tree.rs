//! The generic concrete parse tree.
//!
//! Any parser can produce these; [lower](super::lower) only ever consumes
//! this shape, never tokens. Each node is a [Kind] tag, its children in
//! source order, and for leaves the text they were read from.

use std::fmt::{Display, Formatter, Result as FMTResult};

/// The type of a [ParseTree] node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
	// Structure
	Chunk,
	Block,

	// Statements
	Semicolon,
	Label,
	Break,
	Goto,
	Do,
	While,
	Repeat,
	If,
	Condition,
	Else,
	NumericFor,
	GenericFor,
	FunctionStatement,
	FunctionName,
	MethodName,
	LocalFunction,
	CallStatement,
	Assign,
	Local,
	AttributeNames,
	AttributeName,
	Attribute,
	Return,

	// Lists
	NameList,
	VarList,
	ExpressionList,
	Arguments,
	Parameters,
	FunctionBody,

	// Expressions
	Nil,
	True,
	False,
	VarArgs,
	Number,
	String,
	Name,
	Binary,
	Unary,
	Operator,
	Parens,
	Property,
	Index,
	Call,
	MethodCall,
	FunctionDefinition,
	Table,
	PositionalField,
	NamedField,
	KeyedField,

	// Queries
	Query,
	From,
	Where,
	GroupBy,
	Having,
	OrderBy,
	OrderKey,
	Direction,
	Select,
	Limit
}

/// A node of the concrete parse tree.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseTree {
	pub kind: Kind,
	pub children: Vec<ParseTree>,
	/// Source text, for leaves that carry some.
	pub text: Option<String>,
	pub from: usize,
	pub to: usize
}

impl ParseTree {
	pub fn new(kind: Kind, children: Vec<ParseTree>, from: usize, to: usize)
			-> Self {
		Self {kind, children, text: None, from, to}
	}

	pub fn leaf(kind: Kind, text: impl Into<String>, from: usize, to: usize)
			-> Self {
		Self {kind, children: Vec::new(), text: Some(text.into()), from, to}
	}

	/// A node spanning from its first child to its last.
	pub fn wrap(kind: Kind, children: Vec<ParseTree>) -> Self {
		let from = children.first().map(|child| child.from).unwrap_or(0);
		let to = children.last().map(|child| child.to).unwrap_or(from);
		Self::new(kind, children, from, to)
	}

	pub fn text(&self) -> &str {
		self.text.as_deref().unwrap_or("")
	}

	/// The first child of the given kind, if any.
	pub fn child(&self, kind: Kind) -> Option<&ParseTree> {
		self.children.iter().find(|child| child.kind == kind)
	}

	fn write_indented(&self, f: &mut Formatter, depth: usize) -> FMTResult {
		write!(f, "{}{:?}", "\t".repeat(depth), self.kind)?;
		if let Some(text) = &self.text {write!(f, " {:?}", text)?}
		writeln!(f, " @{}..{}", self.from, self.to)?;
		self.children.iter()
			.try_for_each(|child| child.write_indented(f, depth + 1))
	}
}

impl Display for ParseTree {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		self.write_indented(f, 0)
	}
}

#[cfg(test)]
mod tests {
	use super::{Kind, ParseTree};

	#[test]
	fn test_wrap_spans_children() {
		let tree = ParseTree::wrap(Kind::Binary, vec![
			ParseTree::leaf(Kind::Number, "1", 0, 1),
			ParseTree::leaf(Kind::Operator, "+", 2, 3),
			ParseTree::leaf(Kind::Number, "2", 4, 5)
		]);
		assert_eq!((tree.from, tree.to), (0, 5));
		assert_eq!(tree.child(Kind::Operator).map(ParseTree::text), Some("+"));
	}

	#[test]
	fn test_display() {
		let tree = ParseTree::wrap(Kind::Parens, vec![
			ParseTree::leaf(Kind::Name, "x", 1, 2)
		]);
		assert_eq!(tree.to_string(), "Parens @1..2\n\tName \"x\" @1..2\n");
	}
}
