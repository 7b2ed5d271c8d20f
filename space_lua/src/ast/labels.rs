//! Static validation of labels and gotos.
//!
//! Each function body is checked on its own: labels must be unique among
//! the labels visible where they are declared, every goto must see its
//! label in its own block or an enclosing one, and a goto may not jump
//! forward into the scope of a local unless the label ends its block.

use self::super::{
	Context,
	lower::{Error, Result, nested_blocks},
	syntax::{
		Block, Expression, ExpressionKind, FunctionBody, QueryClause, Statement,
		StatementKind, TableField
	}
};
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;

/// Validates every function in a chunk, the chunk itself included.
pub fn validate(block: &Block) -> Result<()> {
	let mut pending = vec![block];
	while let Some(root) = pending.pop() {
		let mut function = Function::default();
		function.block(root, None, false, HashSet::new(), HashSet::new())?;
		function.check()?;
		pending.extend(function.nested.into_iter().map(|body| &*body.block));
	}
	Ok(())
}

struct Scope<'a> {
	block: &'a Block,
	parent: Option<usize>,
	repeat: bool,
	/// Each label's statement index, and the locals active at it.
	labels: HashMap<&'a str, (usize, HashSet<usize>)>
}

struct GotoSite<'a> {
	name: &'a str,
	context: &'a Context,
	scope: usize,
	active: HashSet<usize>
}

#[derive(Default)]
struct Function<'a> {
	scopes: Vec<Scope<'a>>,
	gotos: Vec<GotoSite<'a>>,
	nested: Vec<&'a Arc<FunctionBody>>,
	next_local: usize
}

impl<'a> Function<'a> {
	fn local(&mut self, active: &mut HashSet<usize>) {
		active.insert(self.next_local);
		self.next_local += 1;
	}

	fn block(&mut self, block: &'a Block, parent: Option<usize>, repeat: bool,
			mut active: HashSet<usize>, mut visible: HashSet<&'a str>)
				-> Result<()> {
		let scope = self.scopes.len();
		self.scopes.push(Scope {block, parent, repeat, labels: HashMap::new()});

		for (index, statement) in block.statements.iter().enumerate() {
			self.functions(statement);

			match &statement.kind {
				StatementKind::Label(name) => {
					if !visible.insert(name.as_str()) {
						return Err(Error::new(format!("label '{}' already defined", name),
							statement.context.clone()))
					}
					self.scopes[scope].labels.insert(name.as_str(), (index, active.clone()));
				},

				StatementKind::Goto(name) => self.gotos.push(GotoSite {
					name: name.as_str(), context: &statement.context, scope,
					active: active.clone()
				}),

				StatementKind::Local {names, ..} =>
					names.iter().for_each(|_| self.local(&mut active)),
				StatementKind::LocalFunction {..} => self.local(&mut active),

				StatementKind::NumericFor {block, ..} => {
					let mut inner = active.clone();
					self.local(&mut inner);
					self.block(block, Some(scope), false, inner, visible.clone())?;
				},

				StatementKind::GenericFor {names, block, ..} => {
					let mut inner = active.clone();
					names.iter().for_each(|_| self.local(&mut inner));
					self.block(block, Some(scope), false, inner, visible.clone())?;
				},

				StatementKind::Repeat {block, ..} =>
					self.block(block, Some(scope), true, active.clone(), visible.clone())?,

				_ => for nested in nested_blocks(statement) {
					self.block(nested, Some(scope), false, active.clone(), visible.clone())?;
				}
			}
		}

		Ok(())
	}

	fn check(&self) -> Result<()> {
		for goto in &self.gotos {
			let mut search = Some(goto.scope);
			let target = loop {
				match search {
					Some(scope) => match self.scopes[scope].labels.get(goto.name) {
						Some(label) => break Some((scope, label)),
						None => search = self.scopes[scope].parent
					},
					None => break None
				}
			};

			let (scope, (index, active)) = target.ok_or_else(|| Error::new(
				format!("no visible label '{}' for goto", goto.name),
				goto.context.clone()))?;

			let enters_scope = active.iter().any(|local| !goto.active.contains(local));
			if enters_scope && !self.ends_block(scope, *index) {
				return Err(Error::new(
					format!("goto '{}' jumps into the scope of a local variable", goto.name),
					goto.context.clone()))
			}
		}
		Ok(())
	}

	/// Whether only labels and semicolons follow the label, outside of a
	/// repeat loop (whose condition still sees the block's locals).
	fn ends_block(&self, scope: usize, index: usize) -> bool {
		let scope = &self.scopes[scope];
		!scope.repeat && scope.block.statements[index + 1..].iter()
			.all(|statement| matches!(statement.kind,
				StatementKind::Label(_) | StatementKind::Semicolon))
	}

	/// Collects the function bodies defined directly by a statement.
	fn functions(&mut self, statement: &'a Statement) {
		match &statement.kind {
			StatementKind::Function {body, ..}
				| StatementKind::LocalFunction {body, ..} => self.nested.push(body),
			_ => ()
		}
		statement_expressions(statement)
			.for_each(|expression| collect_functions(expression, &mut self.nested));
	}
}

fn statement_expressions(statement: &Statement)
		-> Box<dyn Iterator<Item = &Expression> + '_> {
	match &statement.kind {
		StatementKind::While {condition, ..}
			| StatementKind::Repeat {condition, ..} => Box::new(std::iter::once(condition)),
		StatementKind::If {conditions, ..} =>
			Box::new(conditions.iter().map(|(condition, _)| condition)),
		StatementKind::NumericFor {start, end, step, ..} =>
			Box::new([start, end].into_iter().chain(step.iter())),
		StatementKind::GenericFor {expressions, ..}
			| StatementKind::Local {expressions, ..}
			| StatementKind::Return(expressions) => Box::new(expressions.iter()),
		StatementKind::Assign {variables, expressions} =>
			Box::new(variables.iter().chain(expressions.iter())),
		StatementKind::Call(call) => Box::new(std::iter::once(call)),
		_ => Box::new(std::iter::empty())
	}
}

fn collect_functions<'a>(expression: &'a Expression,
		out: &mut Vec<&'a Arc<FunctionBody>>) {
	match &expression.kind {
		ExpressionKind::Function(body) => out.push(body),
		ExpressionKind::Binary {left, right, ..} => {
			collect_functions(left, out);
			collect_functions(right, out);
		},
		ExpressionKind::Unary {operand: inner, ..}
			| ExpressionKind::Parenthesized(inner) => collect_functions(inner, out),
		ExpressionKind::PropertyAccess {object, ..} => collect_functions(object, out),
		ExpressionKind::TableAccess {object, key} => {
			collect_functions(object, out);
			collect_functions(key, out);
		},
		ExpressionKind::Call {prefix, arguments}
				| ExpressionKind::MethodCall {prefix, arguments, ..} => {
			collect_functions(prefix, out);
			arguments.iter().for_each(|argument| collect_functions(argument, out));
		},
		ExpressionKind::Table(fields) => for field in fields {
			match field {
				TableField::Positional(value) | TableField::Named(_, value) =>
					collect_functions(value, out),
				TableField::Keyed(key, value) => {
					collect_functions(key, out);
					collect_functions(value, out);
				}
			}
		},
		ExpressionKind::Query(clauses) => for clause in clauses {
			match clause {
				QueryClause::From {expression, ..} => collect_functions(expression, out),
				QueryClause::Where(inner) | QueryClause::Having(inner)
					| QueryClause::Select(inner) => collect_functions(inner, out),
				QueryClause::GroupBy(keys) =>
					keys.iter().for_each(|key| collect_functions(key, out)),
				QueryClause::OrderBy(keys) =>
					keys.iter().for_each(|key| collect_functions(&key.expression, out)),
				QueryClause::Limit {limit, offset} => {
					collect_functions(limit, out);
					offset.iter().for_each(|offset| collect_functions(offset, out));
				}
			}
		},
		_ => ()
	}
}
