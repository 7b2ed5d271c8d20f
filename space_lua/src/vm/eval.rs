//! The tree walking evaluator.
//!
//! Every function here returns a [Deferred] borrowing the syntax tree. Work
//! runs synchronously until something suspends, and only the remainder of
//! the construct that suspended is turned into a future. Loops and blocks are
//! written as small state machines so that they can pick up where they left
//! off without recursing once per suspension.

use self::super::{
	deferred::{Deferred, sequence},
	env::Env,
	frame::{MAX_CALL_DEPTH, StackFrame},
	grow,
	number::{self, Number},
	operators,
	table::Table,
	value::{Closure, Function, Value}
};
use crate::{
	ast::syntax::{
		Attribute, AttributeName, BinaryOperator, Block, Expression, ExpressionKind,
		FunctionBody, FunctionName, Statement, StatementKind, TableField
	},
	error::{LuaError, Result},
	query
};
use hashbrown::HashMap;
use std::sync::Arc;

/// How a statement finished.
#[derive(Clone, Debug, PartialEq)]
pub enum Flow {
	Normal,
	Return(Vec<Value>),
	Break,
	Goto(String)
}

/// What a loop does after its body finished with `flow`: `None` to keep
/// going, otherwise the flow the loop itself finishes with.
fn loop_flow(flow: Flow) -> Option<Flow> {
	match flow {
		Flow::Normal => None,
		Flow::Break => Some(Flow::Normal),
		other => Some(other)
	}
}

/// Calls a Lua function.
///
/// The call runs until it finishes or first suspends; in the latter case the
/// partially run call is returned to be resumed by the caller.
pub fn call_closure(frame: &StackFrame, closure: &Arc<Closure>, arguments: Vec<Value>)
		-> Result<Deferred<'static, Vec<Value>>> {
	if frame.depth() > MAX_CALL_DEPTH {
		return Err(LuaError::runtime("stack overflow", frame))
	}

	let (closure, frame) = (closure.clone(), frame.clone());
	Deferred::poll_once(async move {
		let body = &closure.body;
		let env = closure.env.child();
		env.set_local("_CTX", Value::Table(frame.thread_local().clone()));

		let mut arguments = arguments.into_iter();
		for parameter in &body.parameters {
			env.set_local(parameter.as_str(), arguments.next().unwrap_or_default());
		}
		if body.varargs {
			env.set_varargs(arguments.collect());
		}

		Ok(match exec_block(&body.block, &env, &frame)?.resolve().await? {
			Flow::Return(values) => values,
			_ => Vec::new()
		})
	})
}

/// Wraps a chunk as a vararg function without parameters.
pub fn chunk(block: Arc<Block>, env: Env) -> Function {
	let context = block.context.clone();
	let body = FunctionBody {parameters: Vec::new(), varargs: true, block, context};
	Function::Closure(Arc::new(Closure {body: Arc::new(body), env}))
}

fn closure(body: &Arc<FunctionBody>, env: &Env) -> Value {
	Value::Function(Function::Closure(Arc::new(Closure {body: body.clone(), env: env.clone()})))
}

/// Evaluates an expression. Calls and `...` produce a
/// [MultiResult](Value::MultiResult).
pub fn eval<'a>(expression: &'a Expression, env: &Env, frame: &StackFrame)
		-> Result<Deferred<'a, Value>> {
	Ok(Deferred::Ready(match &expression.kind {
		ExpressionKind::Nil => Value::Nil,
		ExpressionKind::Boolean(boolean) => Value::Boolean(*boolean),
		ExpressionKind::Integer(integer) => Value::Integer(*integer),
		ExpressionKind::Float(float) => Value::Float(*float),
		ExpressionKind::String(string) => Value::String(string.clone()),
		ExpressionKind::VarArgs => match env.get("...") {
			values @ Value::MultiResult(_) => values,
			_ => Value::MultiResult(Vec::new())
		},
		ExpressionKind::Variable(name) => env.get(name),
		ExpressionKind::Function(body) => closure(body, env),

		ExpressionKind::Parenthesized(inner) => return eval_single(inner, env, frame),

		ExpressionKind::Binary {left, operator, right} =>
			return eval_binary(expression, left, *operator, right, env, frame),

		ExpressionKind::Unary {operator, operand} => {
			let (operator, at) = (*operator, frame.with_context(&expression.context));
			return eval_single(operand, env, frame)?
				.then(move |value| operators::unary(&at, operator, value))
		},

		ExpressionKind::PropertyAccess {object, property} => {
			let at = frame.with_context(&expression.context);
			let key = Value::String(property.clone());
			return eval_single(object, env, frame)?
				.then(move |object| operators::index(&at, &object, key))
		},

		ExpressionKind::TableAccess {object, key} => {
			let (env, frame) = (env.clone(), frame.clone());
			let at = frame.with_context(&expression.context);
			return eval_single(object, &env, &frame)?.then(move |object| {
				eval_single(key, &env, &frame)?
					.then(move |key| operators::index(&at, &object, key))
			})
		},

		ExpressionKind::Call {prefix, arguments} => {
			let (env, frame) = (env.clone(), frame.clone());
			let at = frame.with_context(&expression.context);
			return eval_single(prefix, &env, &frame)?.then(move |callee| {
				eval_list(arguments, &env, &frame)?.then(move |arguments| {
					call_value(&at, callee, arguments, || describe(prefix, &env))
				})
			})
		},

		ExpressionKind::MethodCall {prefix, name, arguments} => {
			let (env, frame) = (env.clone(), frame.clone());
			let at = frame.with_context(&expression.context);
			return eval_single(prefix, &env, &frame)?.then(move |object| {
				let method = operators::index(&at, &object, Value::String(name.clone()))?;
				method.shorten().then(move |method| {
					eval_list(arguments, &env, &frame)?.then(move |mut arguments| {
						arguments.insert(0, object);
						call_value(&at, method, arguments, || format!(" (method '{}')", name))
					})
				})
			})
		},

		ExpressionKind::Table(fields) => return eval_table(expression, fields, env, frame),

		ExpressionKind::Query(clauses) =>
			return query::evaluate(clauses, env, &frame.with_context(&expression.context))
	}))
}

/// Evaluates an expression, keeping only the first value of a multiple
/// result.
pub fn eval_single<'a>(expression: &'a Expression, env: &Env, frame: &StackFrame)
		-> Result<Deferred<'a, Value>> {
	let value = grow(|| eval(expression, env, frame))?;
	Ok(if expression.is_multiple() {value.map(Value::single)} else {value})
}

/// Evaluates an expression list left to right. Only the last expression may
/// contribute more than one value.
pub fn eval_list<'a>(expressions: &'a [Expression], env: &Env, frame: &StackFrame)
		-> Result<Deferred<'a, Vec<Value>>> {
	let (env, frame) = (env.clone(), frame.clone());
	let steps = expressions.iter().map(move |expression| {
		let (env, frame) = (env.clone(), frame.clone());
		move || eval(expression, &env, &frame)
	});

	Ok(sequence(steps)?.map(|mut values| {
		let last = values.pop();
		let mut values: Vec<_> = values.into_iter().map(Value::single).collect();
		match last {
			Some(Value::MultiResult(last)) => values.extend(last),
			Some(last) => values.push(last),
			None => ()
		}
		values
	}))
}

fn eval_binary<'a>(expression: &'a Expression, left: &'a Expression,
		operator: BinaryOperator, right: &'a Expression, env: &Env, frame: &StackFrame)
			-> Result<Deferred<'a, Value>> {
	let (env, frame) = (env.clone(), frame.clone());
	eval_single(left, &env, &frame)?.then(move |left| match operator {
		// Short circuits, the right operand isn't evaluated at all.
		BinaryOperator::LogicalAnd if !left.coerce_to_bool() => Ok(Deferred::Ready(left)),
		BinaryOperator::LogicalOr if left.coerce_to_bool() => Ok(Deferred::Ready(left)),
		BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr =>
			eval_single(right, &env, &frame),

		operator => {
			let at = frame.with_context(&expression.context);
			eval_single(right, &env, &frame)?
				.then(move |right| operators::binary(&at, operator, left, right))
		}
	})
}

/// How a call site names what it calls, for error messages.
fn describe(prefix: &Expression, env: &Env) -> String {
	match &prefix.kind {
		ExpressionKind::Variable(name) if env.get_local(name).is_some() =>
			format!(" (local '{}')", name),
		ExpressionKind::Variable(name) => format!(" (global '{}')", name),
		ExpressionKind::PropertyAccess {property, ..} => format!(" (field '{}')", property),
		_ => String::new()
	}
}

fn call_value(at: &StackFrame, callee: Value, arguments: Vec<Value>,
		describe: impl FnOnce() -> String) -> Result<Deferred<'static, Value>> {
	if !operators::callable(&callee) {
		return Err(LuaError::runtime(format!("attempt to call a {} value{}",
			callee.type_name(), describe()), at))
	}
	Ok(operators::call(at, &callee, arguments)?.map(Value::MultiResult))
}

enum Field {
	Positional(Vec<Value>),
	Keyed(Value, Value)
}

fn eval_table<'a>(expression: &'a Expression, fields: &'a [TableField], env: &Env,
		frame: &StackFrame) -> Result<Deferred<'a, Value>> {
	let (env, frame) = (env.clone(), frame.clone());
	let at = frame.with_context(&expression.context);
	let count = fields.len();

	let steps = fields.iter().enumerate().map(move |(index, field)| {
		let (env, frame) = (env.clone(), frame.clone());
		move || -> Result<Deferred<'a, Field>> {
			match field {
				// A call or `...` last in the constructor contributes all its values.
				TableField::Positional(value) if index + 1 == count && value.is_multiple() =>
					Ok(eval(value, &env, &frame)?
						.map(|value| Field::Positional(value.into_values()))),
				TableField::Positional(value) => Ok(eval_single(value, &env, &frame)?
					.map(|value| Field::Positional(vec![value]))),
				TableField::Named(name, value) => Ok(eval_single(value, &env, &frame)?
					.map(move |value| Field::Keyed(Value::String(name.clone()), value))),
				TableField::Keyed(key, value) => eval_single(key, &env, &frame)?
					.then(move |key| Ok(eval_single(value, &env, &frame)?
						.map(move |value| Field::Keyed(key, value))))
			}
		}
	});

	sequence(steps)?.then(move |fields| {
		let table = Table::new();
		let mut positional = Vec::new();
		for field in fields {
			match field {
				Field::Positional(values) => positional.extend(values),
				Field::Keyed(key, value) => table.set(key, value)
					.map_err(|message| LuaError::runtime(message, &at))?
			}
		}
		// Positional fields win over explicit keys for the same index.
		for (index, value) in positional.into_iter().enumerate() {
			table.set(Value::from(index + 1), value)
				.map_err(|message| LuaError::runtime(message, &at))?;
		}
		Ok(Deferred::Ready(Value::Table(table.arc())))
	})
}

/// Runs a block in a fresh scope, closing its `<close>` variables on exit.
pub fn exec_block<'a>(block: &'a Block, env: &Env, frame: &StackFrame)
		-> Result<Deferred<'a, Flow>> {
	let runner = Runner::new(block, env.child(), frame.clone());
	grow(|| if block.needs_close_mark() {
		let mark = frame.close_mark();
		frame.close_scope(mark, runner.run())
	} else {
		runner.run()
	})
}

/// Runs the statements of one block, resolving gotos to its labels.
struct Runner<'a> {
	block: &'a Block,
	env: Env,
	frame: StackFrame,
	index: usize,
	/// The close stack height when each label was last passed, if any goto
	/// needs it.
	label_marks: Option<HashMap<usize, usize>>
}

enum Step<'a> {
	Next,
	Done(Flow),
	/// A backward jump that first has to close values declared since the
	/// label.
	Jump(Deferred<'a, ()>)
}

impl<'a> Runner<'a> {
	fn new(block: &'a Block, env: Env, frame: StackFrame) -> Self {
		let label_marks = block.needs_label_marks().then(HashMap::new);
		Self {block, env, frame, index: 0, label_marks}
	}

	fn next_statement(&mut self) -> Option<&'a Statement> {
		let statement = self.block.statements.get(self.index)?;
		if let Some(marks) = &mut self.label_marks {
			if matches!(statement.kind, StatementKind::Label(_)) {
				marks.insert(self.index, self.frame.close_mark());
			}
		}
		self.index += 1;
		Some(statement)
	}

	fn advance(&mut self, flow: Flow) -> Result<Step<'a>> {
		match flow {
			Flow::Normal => Ok(Step::Next),
			Flow::Goto(label) if self.block.has_label => match self.block.labels.get(label.as_str()) {
				Some(&target) => {
					self.index = target;
					match self.label_marks.as_ref().and_then(|marks| marks.get(&target)) {
						Some(&mark) => match self.frame.close_from(mark, Ok(()))? {
							Deferred::Ready(()) => Ok(Step::Next),
							closing => Ok(Step::Jump(closing))
						},
						None => Ok(Step::Next)
					}
				},
				None => Ok(Step::Done(Flow::Goto(label)))
			},
			flow => Ok(Step::Done(flow))
		}
	}

	fn run(mut self) -> Result<Deferred<'a, Flow>> {
		while let Some(statement) = self.next_statement() {
			match exec_statement(statement, &self.env, &self.frame)? {
				Deferred::Ready(flow) => match self.advance(flow)? {
					Step::Next => (),
					Step::Done(flow) => return Ok(Deferred::Ready(flow)),
					Step::Jump(closing) => return Ok(Deferred::pending(async move {
						closing.resolve().await?;
						self.resume(Flow::Normal).await
					}))
				},
				Deferred::Pending(future) => return Ok(Deferred::pending(async move {
					let flow = future.await?;
					self.resume(flow).await
				}))
			}
		}
		Ok(Deferred::Ready(Flow::Normal))
	}

	async fn resume(mut self, mut flow: Flow) -> Result<Flow> {
		loop {
			match self.advance(flow)? {
				Step::Next => (),
				Step::Done(flow) => return Ok(flow),
				Step::Jump(closing) => closing.resolve().await?
			}
			let Some(statement) = self.next_statement() else {return Ok(Flow::Normal)};
			flow = exec_statement(statement, &self.env, &self.frame)?.resolve().await?;
		}
	}
}

fn exec_statement<'a>(statement: &'a Statement, env: &Env, frame: &StackFrame)
		-> Result<Deferred<'a, Flow>> {
	match &statement.kind {
		StatementKind::Semicolon | StatementKind::Label(_) => Ok(Deferred::Ready(Flow::Normal)),
		StatementKind::Goto(label) => Ok(Deferred::Ready(Flow::Goto(label.clone()))),
		StatementKind::Break => Ok(Deferred::Ready(Flow::Break)),
		StatementKind::Do(block) => exec_block(block, env, frame),

		StatementKind::While {condition, block} => exec_while(condition, block, env, frame),
		StatementKind::Repeat {block, condition} => exec_repeat(block, condition, env, frame),
		StatementKind::If {conditions, r#else} =>
			exec_if(conditions, r#else.as_deref(), env, frame),

		StatementKind::NumericFor {variable, start, end, step, block} => {
			let (env, frame) = (env.clone(), frame.clone());
			let at = frame.with_context(&statement.context);
			let bounds = {
				let (env, frame) = (env.clone(), frame.clone());
				[Some(start), Some(end), step.as_ref()].into_iter().flatten()
					.map(move |expression| {
						let (env, frame) = (env.clone(), frame.clone());
						move || eval_single(expression, &env, &frame)
					})
			};
			sequence(bounds)?.then(move |bounds| {
				let counter = Counter::new(&bounds, &at)?;
				numeric_loop(variable, block, counter, frame, env)
			})
		},

		StatementKind::GenericFor {names, expressions, block} => {
			let (env, frame) = (env.clone(), frame.clone());
			eval_list(expressions, &env, &frame)?.then(move |values| {
				let mut values = values.into_iter();
				let iterator = match values.next().unwrap_or_default() {
					Value::Table(table) if table.metatable()
						.map_or(true, |metatable| metatable.get_str("__call").is_nil()) =>
							Source::Array {table, position: 0},
					function => Source::Function(function)
				};
				let state = values.next().unwrap_or_default();
				let control = values.next().unwrap_or_default();
				let closing = values.next().unwrap_or_default();

				let mark = frame.close_mark();
				frame.mark_to_be_closed(closing, "(for state)", &statement.context)?;
				let at = frame.with_context(&statement.context);
				let looping = GenericLoop {
					names, block, iterator, state, control, env, frame: frame.clone(), at
				};
				frame.close_scope(mark, looping.run())
			})
		},

		StatementKind::Function {name, body} =>
			exec_function(statement, name, closure(body, env), env, frame),

		StatementKind::LocalFunction {name, body} => {
			// Declared before the closure exists, so the body can refer to it.
			env.set_local(name.as_str(), Value::Nil);
			env.set_local(name.as_str(), closure(body, env));
			Ok(Deferred::Ready(Flow::Normal))
		},

		StatementKind::Call(call) => Ok(eval(call, env, frame)?.map(|_| Flow::Normal)),

		StatementKind::Assign {variables, expressions} => {
			let (env, frame) = (env.clone(), frame.clone());
			eval_list(expressions, &env, &frame)?.then(move |values| {
				let mut values = values.into_iter();
				let targets: Vec<_> = variables.iter()
					.map(|variable| (variable, values.next().unwrap_or_default()))
					.collect();
				let steps = targets.into_iter().map(move |(variable, value)| {
					let (env, frame) = (env.clone(), frame.clone());
					move || assign(variable, value, &env, &frame)
				});
				Ok(sequence(steps)?.map(|_| Flow::Normal))
			})
		},

		StatementKind::Local {names, expressions} =>
			exec_local(statement, names, expressions, env, frame),

		StatementKind::Return(expressions) =>
			Ok(eval_list(expressions, env, frame)?.map(Flow::Return))
	}
}

fn exec_if<'a>(conditions: &'a [(Expression, Arc<Block>)], r#else: Option<&'a Block>,
		env: &Env, frame: &StackFrame) -> Result<Deferred<'a, Flow>> {
	match conditions.split_first() {
		None => match r#else {
			Some(block) => exec_block(block, env, frame),
			None => Ok(Deferred::Ready(Flow::Normal))
		},
		Some(((condition, block), rest)) => {
			let (env, frame) = (env.clone(), frame.clone());
			eval_single(condition, &env, &frame)?.then(move |value| match value.coerce_to_bool() {
				true => exec_block(block, &env, &frame),
				false => exec_if(rest, r#else, &env, &frame)
			})
		}
	}
}

/// Where a suspended loop picks up again.
enum Resume<'a> {
	Condition(Deferred<'a, Value>),
	Body(Deferred<'a, Flow>)
}

fn exec_while<'a>(condition: &'a Expression, block: &'a Block, env: &Env,
		frame: &StackFrame) -> Result<Deferred<'a, Flow>> {
	let mut state = Resume::Condition(eval_single(condition, env, frame)?);
	loop {
		state = match state {
			Resume::Condition(Deferred::Ready(value)) => match value.coerce_to_bool() {
				true => Resume::Body(exec_block(block, env, frame)?),
				false => return Ok(Deferred::Ready(Flow::Normal))
			},
			Resume::Body(Deferred::Ready(flow)) => match loop_flow(flow) {
				Some(flow) => return Ok(Deferred::Ready(flow)),
				None => Resume::Condition(eval_single(condition, env, frame)?)
			},
			suspended => return Ok(Deferred::pending(
				resume_while(condition, block, env.clone(), frame.clone(), suspended)))
		}
	}
}

async fn resume_while<'a>(condition: &'a Expression, block: &'a Block, env: Env,
		frame: StackFrame, mut state: Resume<'a>) -> Result<Flow> {
	loop {
		state = match state {
			Resume::Condition(value) => match value.resolve().await?.coerce_to_bool() {
				true => Resume::Body(exec_block(block, &env, &frame)?),
				false => return Ok(Flow::Normal)
			},
			Resume::Body(flow) => match loop_flow(flow.resolve().await?) {
				Some(flow) => return Ok(flow),
				None => Resume::Condition(eval_single(condition, &env, &frame)?)
			}
		}
	}
}

/// One pass of a repeat loop: `Some` once the loop is over. The condition is
/// evaluated in the body's scope, before its `<close>` variables are closed.
fn repeat_iteration<'a>(block: &'a Block, condition: &'a Expression, env: &Env,
		frame: &StackFrame) -> Result<Deferred<'a, Option<Flow>>> {
	let scope = env.child();
	let mark = frame.close_mark();
	let owned = frame.clone();

	let pass = Runner::new(block, scope.clone(), frame.clone()).run()
		.and_then(|body| body.then(move |flow| match loop_flow(flow) {
			Some(flow) => Ok(Deferred::Ready(Some(flow))),
			None => Ok(eval_single(condition, &scope, &owned)?
				.map(|value| value.coerce_to_bool().then_some(Flow::Normal)))
		}));

	if block.needs_close_mark() {frame.close_scope(mark, pass)} else {pass}
}

fn exec_repeat<'a>(block: &'a Block, condition: &'a Expression, env: &Env,
		frame: &StackFrame) -> Result<Deferred<'a, Flow>> {
	loop {
		match repeat_iteration(block, condition, env, frame)? {
			Deferred::Ready(Some(flow)) => return Ok(Deferred::Ready(flow)),
			Deferred::Ready(None) => (),
			Deferred::Pending(future) => {
				let (env, frame) = (env.clone(), frame.clone());
				return Ok(Deferred::pending(async move {
					let mut outcome = future.await?;
					loop {
						if let Some(flow) = outcome {return Ok(flow)}
						outcome = repeat_iteration(block, condition, &env, &frame)?
							.resolve().await?;
					}
				}))
			}
		}
	}
}

/// The values of a numeric for loop.
enum Counter {
	Integer {next: i64, step: i64, remaining: u64},
	Float {next: f64, limit: f64, step: f64}
}

impl Counter {
	fn new(bounds: &[Value], frame: &StackFrame) -> Result<Self> {
		let bound = |index: usize, what: &str| -> Result<Number> {
			bounds.get(index).and_then(number::coerce).ok_or_else(|| LuaError::runtime(
				format!("'for' {} must be a number", what), frame))
		};
		let start = bound(0, "initial value")?;
		let limit = bound(1, "limit")?;
		let step = match bounds.get(2) {
			Some(_) => bound(2, "step")?,
			None => Number::Integer(1)
		};
		if step.float() == 0.0 {
			return Err(LuaError::runtime("'for' step is zero", frame))
		}

		Ok(match (start, step) {
			(Number::Integer(start), Number::Integer(step)) => {
				let limit = match limit {
					Number::Integer(limit) => limit,
					Number::Float(limit) if limit.is_nan() =>
						return Ok(Self::Integer {next: start, step, remaining: 0}),
					Number::Float(limit) => {
						let limit = if step > 0 {limit.floor()} else {limit.ceil()};
						limit.clamp(i64::MIN as f64, i64::MAX as f64) as i64
					}
				};
				let remaining = if (step > 0 && start > limit) || (step < 0 && start < limit) {
					0
				} else {
					((limit as i128 - start as i128) / step as i128) as u64 + 1
				};
				Self::Integer {next: start, step, remaining}
			},
			(start, step) =>
				Self::Float {next: start.float(), limit: limit.float(), step: step.float()}
		})
	}

	fn next(&mut self) -> Option<Value> {
		match self {
			Self::Integer {remaining: 0, ..} => None,
			Self::Integer {next, step, remaining} => {
				let value = *next;
				*next = next.wrapping_add(*step);
				*remaining -= 1;
				Some(Value::Integer(value))
			},
			Self::Float {next, limit, step} => {
				let value = *next;
				let within = if *step > 0.0 {value <= *limit} else {value >= *limit};
				*next += *step;
				within.then_some(Value::Float(value))
			}
		}
	}
}

fn numeric_loop<'a>(variable: &'a str, block: &'a Block, mut counter: Counter,
		frame: StackFrame, env: Env) -> Result<Deferred<'a, Flow>> {
	while let Some(value) = counter.next() {
		let scope = env.child();
		scope.set_local(variable, value);
		match exec_block(block, &scope, &frame)? {
			Deferred::Ready(flow) => if let Some(flow) = loop_flow(flow) {
				return Ok(Deferred::Ready(flow))
			},
			Deferred::Pending(future) => return Ok(Deferred::pending(async move {
				let mut flow = future.await?;
				loop {
					if let Some(flow) = loop_flow(flow) {return Ok(flow)}
					let Some(value) = counter.next() else {return Ok(Flow::Normal)};
					let scope = env.child();
					scope.set_local(variable, value);
					flow = exec_block(block, &scope, &frame)?.resolve().await?;
				}
			}))
		}
	}
	Ok(Deferred::Ready(Flow::Normal))
}

enum Source {
	/// A plain table iterates its array values.
	Array {table: Arc<Table>, position: usize},
	Function(Value)
}

struct GenericLoop<'a> {
	names: &'a [String],
	block: &'a Block,
	iterator: Source,
	state: Value,
	control: Value,
	env: Env,
	frame: StackFrame,
	/// The frame iterator functions are called from.
	at: StackFrame
}

enum ForStep<'a> {
	Call(Deferred<'static, Vec<Value>>),
	Body(Deferred<'a, Flow>)
}

impl<'a> GenericLoop<'a> {
	fn call(&mut self) -> Result<Deferred<'static, Vec<Value>>> {
		match &mut self.iterator {
			Source::Array {table, position} => {
				*position += 1;
				Ok(Deferred::Ready(vec![table.get(&Value::from(*position))]))
			},
			Source::Function(function) => operators::call(&self.at, function,
				vec![self.state.clone(), self.control.clone()])
		}
	}

	/// Binds the loop variables for the next iteration, unless the iterator
	/// is exhausted.
	fn bind(&mut self, values: Vec<Value>) -> Option<Env> {
		let control = values.first().cloned().unwrap_or_default();
		if control.is_nil() {return None}
		self.control = control;

		let scope = self.env.child();
		let mut values = values.into_iter();
		for name in self.names {
			scope.set_local(name.as_str(), values.next().unwrap_or_default());
		}
		Some(scope)
	}

	fn run(mut self) -> Result<Deferred<'a, Flow>> {
		let mut step = ForStep::Call(self.call()?);
		loop {
			step = match step {
				ForStep::Call(Deferred::Ready(values)) => match self.bind(values) {
					Some(scope) => ForStep::Body(exec_block(self.block, &scope, &self.frame)?),
					None => return Ok(Deferred::Ready(Flow::Normal))
				},
				ForStep::Body(Deferred::Ready(flow)) => match loop_flow(flow) {
					Some(flow) => return Ok(Deferred::Ready(flow)),
					None => ForStep::Call(self.call()?)
				},
				suspended => return Ok(Deferred::pending(self.resume(suspended)))
			}
		}
	}

	async fn resume(mut self, mut step: ForStep<'a>) -> Result<Flow> {
		loop {
			step = match step {
				ForStep::Call(values) => match self.bind(values.resolve().await?) {
					Some(scope) => ForStep::Body(exec_block(self.block, &scope, &self.frame)?),
					None => return Ok(Flow::Normal)
				},
				ForStep::Body(flow) => match loop_flow(flow.resolve().await?) {
					Some(flow) => return Ok(flow),
					None => ForStep::Call(self.call()?)
				}
			}
		}
	}
}

fn exec_function<'a>(statement: &'a Statement, name: &'a FunctionName, function: Value,
		env: &Env, frame: &StackFrame) -> Result<Deferred<'a, Flow>> {
	let at = frame.with_context(&statement.context);
	let Some((root, path)) = name.path.split_first() else {
		return Ok(Deferred::Ready(Flow::Normal))
	};

	let mut keys: Vec<Arc<str>> = path.iter().map(|key| key.as_str().into()).collect();
	keys.extend(name.method.as_deref().map(Into::into));
	let Some(last) = keys.pop() else {
		env.assign(root, function).map_err(|message| LuaError::runtime(message, &at))?;
		return Ok(Deferred::Ready(Flow::Normal))
	};

	let owner = index_path(&at, env.get(root), keys)?;
	let assigned = owner.then(move |owner|
		operators::set_index(&at, &owner, Value::String(last), function))?;
	Ok(assigned.map(|_| Flow::Normal).shorten())
}

/// Follows `keys` from `object`, one index at a time.
fn index_path(frame: &StackFrame, object: Value, keys: Vec<Arc<str>>)
		-> Result<Deferred<'static, Value>> {
	let mut object = object;
	let mut keys = keys.into_iter();
	while let Some(key) = keys.next() {
		match operators::index(frame, &object, Value::String(key))? {
			Deferred::Ready(value) => object = value,
			Deferred::Pending(future) => {
				let frame = frame.clone();
				return Ok(Deferred::pending(async move {
					let mut object = future.await?;
					for key in keys {
						object = operators::index(&frame, &object, Value::String(key))?
							.resolve().await?;
					}
					Ok(object)
				}))
			}
		}
	}
	Ok(Deferred::Ready(object))
}

fn assign<'a>(variable: &'a Expression, value: Value, env: &Env, frame: &StackFrame)
		-> Result<Deferred<'a, ()>> {
	let at = frame.with_context(&variable.context);
	match &variable.kind {
		ExpressionKind::Variable(name) => {
			env.assign(name, value).map_err(|message| LuaError::runtime(message, &at))?;
			Ok(Deferred::Ready(()))
		},
		ExpressionKind::PropertyAccess {object, property} => {
			let key = Value::String(property.clone());
			eval_single(object, env, frame)?
				.then(move |object| operators::set_index(&at, &object, key, value))
		},
		ExpressionKind::TableAccess {object, key} => {
			let (env, frame) = (env.clone(), frame.clone());
			eval_single(object, &env, &frame)?.then(move |object| {
				eval_single(key, &env, &frame)?
					.then(move |key| operators::set_index(&at, &object, key, value))
			})
		},
		_ => Err(LuaError::runtime("cannot assign to this expression", &at))
	}
}

fn exec_local<'a>(statement: &'a Statement, names: &'a [AttributeName],
		expressions: &'a [Expression], env: &Env, frame: &StackFrame)
			-> Result<Deferred<'a, Flow>> {
	if expressions.is_empty() {
		if let Some(name) = names.iter().find(|name| name.attribute == Some(Attribute::Const)) {
			return Err(LuaError::runtime(
				format!("const variable '{}' must be initialized", name.name),
				&frame.with_context(&statement.context)))
		}
	}

	let (env, frame) = (env.clone(), frame.clone());
	eval_list(expressions, &env, &frame)?.then(move |values| {
		let mut values = values.into_iter();
		for name in names {
			let value = values.next().unwrap_or_default();
			match name.attribute {
				None => env.set_local(name.name.as_str(), value),
				Some(Attribute::Const) => env.set_local_const(name.name.as_str(), value),
				Some(Attribute::Close) => {
					env.set_local_const(name.name.as_str(), value.clone());
					frame.mark_to_be_closed(value, &name.name, &statement.context)?;
				}
			}
		}
		Ok(Deferred::Ready(Flow::Normal))
	})
}
