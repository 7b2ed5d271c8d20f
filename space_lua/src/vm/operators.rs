//! Operators, indexing and calls, with metamethod dispatch.
//!
//! Every operation first tries the primitive implementation and only then
//! looks for a metamethod, in the left operand's metatable before the
//! right's. Metamethods may be Lua functions that call suspending host
//! functions, so everything here returns a [Deferred].

use self::super::{
	convert,
	deferred::Deferred,
	eval,
	frame::StackFrame,
	number,
	value::{Function, Value}
};
use crate::{
	ast::syntax::{BinaryOperator, UnaryOperator},
	error::{LuaError, Result}
};
use std::cmp::Ordering;

/// How many `__index`, `__newindex` or `__call` hops are followed before
/// giving up.
pub const MAX_CHAIN: usize = 200;

type Outcome<T> = Result<Deferred<'static, T>>;

/// The first of a list of results.
pub fn first(values: Vec<Value>) -> Value {
	values.into_iter().next().map(Value::single).unwrap_or_default()
}

/// Attributes errors of a builtin or host call to the frame that called it.
fn attribute<T: 'static>(result: Outcome<T>, frame: &StackFrame) -> Outcome<T> {
	match result {
		Ok(Deferred::Pending(future)) => {
			let frame = frame.clone();
			Ok(Deferred::pending(async move {
				future.await.map_err(|error| error.within(&frame))
			}))
		},
		Ok(ready) => Ok(ready),
		Err(error) => Err(error.within(frame))
	}
}

pub fn call_function(frame: &StackFrame, function: &Function, arguments: Vec<Value>)
		-> Outcome<Vec<Value>> {
	match function {
		Function::Closure(closure) => eval::call_closure(frame, closure, arguments),
		Function::Builtin(builtin) => attribute((builtin.function)(frame, arguments), frame),
		Function::Host(host) => attribute(convert::call_host(host, frame, arguments), frame)
	}
}

/// Whether calling `value` could succeed.
pub fn callable(value: &Value) -> bool {
	matches!(value, Value::Function(_)) || value.metamethod("__call").is_some()
}

/// Calls any value, following `__call`.
pub fn call(frame: &StackFrame, callee: &Value, mut arguments: Vec<Value>)
		-> Outcome<Vec<Value>> {
	let mut callee = callee.clone().single();
	for _ in 0..MAX_CHAIN {
		callee = match callee {
			Value::Function(function) => return call_function(frame, &function, arguments),
			other => match other.metamethod("__call") {
				Some(handler) => {
					arguments.insert(0, other);
					handler
				},
				None => return Err(LuaError::runtime(
					format!("attempt to call a {} value", other.type_name()), frame))
			}
		}
	}
	Err(LuaError::runtime("'__call' chain too long; possible loop", frame))
}

/// Calls a metamethod and keeps its first result.
fn call_first(frame: &StackFrame, handler: &Value, arguments: Vec<Value>) -> Outcome<Value> {
	Ok(call(frame, handler, arguments)?.map(first))
}

/// `object[key]`.
pub fn index(frame: &StackFrame, object: &Value, key: Value) -> Outcome<Value> {
	let mut object = object.clone().single();
	for _ in 0..MAX_CHAIN {
		let handler = match &object {
			Value::Table(table) => {
				let value = table.get(&key);
				if !value.is_nil() {return Ok(Deferred::Ready(value))}
				match object.metamethod("__index") {
					Some(handler) => handler,
					None => return Ok(Deferred::Ready(Value::Nil))
				}
			},
			// Strings index the string library.
			Value::String(_) => return Ok(Deferred::Ready(match frame.globals().get_str("string") {
				Value::Table(library) => library.get(&key),
				_ => Value::Nil
			})),
			other => match other.metamethod("__index") {
				Some(handler) => handler,
				None => return Err(LuaError::runtime(
					format!("attempt to index a {} value", other.type_name()), frame))
			}
		};

		object = match handler {
			Value::Function(function) => return Ok(
				call_function(frame, &function, vec![object, key])?.map(first)),
			next => next
		};
	}
	Err(LuaError::runtime("'__index' chain too long; possible loop", frame))
}

/// `object[key] = value`.
pub fn set_index(frame: &StackFrame, object: &Value, key: Value, value: Value) -> Outcome<()> {
	let mut object = object.clone().single();
	for _ in 0..MAX_CHAIN {
		let handler = match &object {
			Value::Table(table) => match object.metamethod("__newindex") {
				Some(handler) if table.get(&key).is_nil() => handler,
				_ => {
					table.set(key, value).map_err(|message| LuaError::runtime(message, frame))?;
					return Ok(Deferred::Ready(()))
				}
			},
			other => match other.metamethod("__newindex") {
				Some(handler) => handler,
				None => return Err(LuaError::runtime(
					format!("attempt to index a {} value", other.type_name()), frame))
			}
		};

		object = match handler {
			Value::Function(function) => return Ok(
				call_function(frame, &function, vec![object, key, value])?.map(|_| ())),
			next => next
		};
	}
	Err(LuaError::runtime("'__newindex' chain too long; possible loop", frame))
}

/// Looks `event` up on either operand and calls it with both.
fn binary_metamethod(frame: &StackFrame, event: &str, left: &Value, right: &Value)
		-> Result<Option<Deferred<'static, Value>>> {
	match left.metamethod(event).or_else(|| right.metamethod(event)) {
		Some(handler) => call_first(frame, &handler,
			vec![left.clone(), right.clone()]).map(Some),
		None => Ok(None)
	}
}

pub fn binary(frame: &StackFrame, operator: BinaryOperator, left: Value, right: Value)
		-> Outcome<Value> {
	match operator {
		BinaryOperator::Add | BinaryOperator::Subtract | BinaryOperator::Multiply
			| BinaryOperator::Divide | BinaryOperator::FloorDivide
			| BinaryOperator::Modulo | BinaryOperator::Exponent =>
				arithmetic(frame, operator, left, right),

		BinaryOperator::BitwiseAnd | BinaryOperator::BitwiseOr
			| BinaryOperator::BitwiseXOr | BinaryOperator::ShiftLeft
			| BinaryOperator::ShiftRight => bitwise(frame, operator, left, right),

		BinaryOperator::Equal => Ok(equals(frame, left, right)?.map(Value::Boolean)),
		BinaryOperator::NotEqual =>
			Ok(equals(frame, left, right)?.map(|equal| Value::Boolean(!equal))),
		BinaryOperator::LessThan => Ok(less_than(frame, left, right)?.map(Value::Boolean)),
		BinaryOperator::GreaterThan => Ok(less_than(frame, right, left)?.map(Value::Boolean)),
		BinaryOperator::LessThanOrEqual =>
			Ok(less_equal(frame, left, right)?.map(Value::Boolean)),
		BinaryOperator::GreaterThanOrEqual =>
			Ok(less_equal(frame, right, left)?.map(Value::Boolean)),

		BinaryOperator::Concat => concat(frame, left, right),

		// Both operands are already evaluated by now.
		BinaryOperator::LogicalAnd =>
			Ok(Deferred::Ready(if left.coerce_to_bool() {right} else {left})),
		BinaryOperator::LogicalOr =>
			Ok(Deferred::Ready(if left.coerce_to_bool() {left} else {right}))
	}
}

pub fn arithmetic(frame: &StackFrame, operator: BinaryOperator, left: Value, right: Value)
		-> Outcome<Value> {
	match number::arithmetic(operator, &left, &right) {
		Some(Ok(value)) => return Ok(Deferred::Ready(value)),
		Some(Err(message)) => return Err(LuaError::runtime(message, frame)),
		None => ()
	}

	let event = operator.metamethod().unwrap_or_default();
	if let Some(result) = binary_metamethod(frame, event, &left, &right)? {
		return Ok(result)
	}

	let message = if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
		format!("attempt to {} a '{}' with a '{}'", event.trim_start_matches("__"),
			left.type_name(), right.type_name())
	} else {
		let culprit = if number::coerce(&left).is_none() {&left} else {&right};
		format!("attempt to perform arithmetic on a {} value", culprit.type_name())
	};
	Err(LuaError::runtime(message, frame))
}

fn bitwise_error(left: &Value, right: &Value) -> String {
	match [left, right].into_iter().find(|operand| number::coerce(operand).is_none()) {
		Some(Value::String(string)) => format!(
			"attempt to perform bitwise operation on a string value (constant '{}')", string),
		Some(other) => format!("attempt to perform bitwise operation on a {} value",
			other.type_name()),
		None => "number has no integer representation".to_owned()
	}
}

pub fn bitwise(frame: &StackFrame, operator: BinaryOperator, left: Value, right: Value)
		-> Outcome<Value> {
	if let (Ok(a), Ok(b)) = (number::bitwise_operand(&left), number::bitwise_operand(&right)) {
		if let Some(result) = number::bitwise(operator, a, b) {
			return Ok(Deferred::Ready(Value::Integer(result)))
		}
	}

	let event = operator.metamethod().unwrap_or_default();
	match binary_metamethod(frame, event, &left, &right)? {
		Some(result) => Ok(result),
		None => Err(LuaError::runtime(bitwise_error(&left, &right), frame))
	}
}

pub fn unary(frame: &StackFrame, operator: UnaryOperator, operand: Value) -> Outcome<Value> {
	match operator {
		UnaryOperator::LogicalNot =>
			Ok(Deferred::Ready(Value::Boolean(!operand.coerce_to_bool()))),

		UnaryOperator::Negate => match number::coerce(&operand) {
			Some(number::Number::Integer(integer)) =>
				Ok(Deferred::Ready(Value::Integer(integer.wrapping_neg()))),
			Some(number::Number::Float(float)) => Ok(Deferred::Ready(Value::Float(-float))),
			None => match operand.metamethod("__unm") {
				Some(handler) => call_first(frame, &handler, vec![operand.clone(), operand]),
				None => Err(LuaError::runtime(match operand {
					Value::String(_) => "attempt to unm a 'string' with a 'string'".to_owned(),
					other => format!("attempt to perform arithmetic on a {} value",
						other.type_name())
				}, frame))
			}
		},

		UnaryOperator::BitwiseNot => match number::bitwise_operand(&operand) {
			Ok(integer) => Ok(Deferred::Ready(Value::Integer(!integer))),
			Err(_) => match operand.metamethod("__bnot") {
				Some(handler) => call_first(frame, &handler, vec![operand.clone(), operand]),
				None => Err(LuaError::runtime(bitwise_error(&operand, &operand), frame))
			}
		},

		UnaryOperator::Length => length(frame, operand)
	}
}

/// The `#` operator.
pub fn length(frame: &StackFrame, operand: Value) -> Outcome<Value> {
	if let Value::String(string) = &operand {
		return Ok(Deferred::Ready(Value::from(string.len())))
	}
	if let Some(handler) = operand.metamethod("__len") {
		return call_first(frame, &handler, vec![operand])
	}
	match &operand {
		Value::Table(table) => Ok(Deferred::Ready(Value::from(table.length()))),
		other => Err(LuaError::runtime(
			format!("attempt to get length of a {} value", other.type_name()), frame))
	}
}

/// `==`, consulting `__eq` only for two distinct tables.
pub fn equals(frame: &StackFrame, left: Value, right: Value) -> Outcome<bool> {
	if left == right {return Ok(Deferred::Ready(true))}
	if !matches!((&left, &right), (Value::Table(_), Value::Table(_))) {
		return Ok(Deferred::Ready(false))
	}

	match left.metamethod("__eq").or_else(|| right.metamethod("__eq")) {
		Some(handler) => Ok(call(frame, &handler, vec![left, right])?
			.map(|values| first(values).coerce_to_bool())),
		None => Ok(Deferred::Ready(false))
	}
}

fn primitive_order(left: &Value, right: &Value) -> Option<Option<Ordering>> {
	Some(match (left, right) {
		(Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
		(Value::String(a), Value::String(b)) => a.partial_cmp(b),
		(a, b) => a.number()?.partial_cmp(&b.number()?)
	})
}

fn compare(frame: &StackFrame, left: Value, right: Value, event: &str,
		accept: fn(Ordering) -> bool) -> Outcome<bool> {
	if let Some(order) = primitive_order(&left, &right) {
		return Ok(Deferred::Ready(order.is_some_and(accept)))
	}

	match left.metamethod(event).or_else(|| right.metamethod(event)) {
		Some(handler) => Ok(call(frame, &handler, vec![left, right])?
			.map(|values| first(values).coerce_to_bool())),
		None => Err(LuaError::runtime(format!("attempt to compare {} with {}",
			left.type_name(), right.type_name()), frame))
	}
}

pub fn less_than(frame: &StackFrame, left: Value, right: Value) -> Outcome<bool> {
	compare(frame, left, right, "__lt", |order| order == Ordering::Less)
}

/// `<=`, which never falls back to `__lt`.
pub fn less_equal(frame: &StackFrame, left: Value, right: Value) -> Outcome<bool> {
	compare(frame, left, right, "__le", |order| order != Ordering::Greater)
}

pub fn concat(frame: &StackFrame, left: Value, right: Value) -> Outcome<Value> {
	if let (Some(a), Some(b)) = (left.coerce_to_string(), right.coerce_to_string()) {
		return Ok(Deferred::Ready(Value::from(a + &b)))
	}

	match binary_metamethod(frame, "__concat", &left, &right)? {
		Some(result) => Ok(result),
		None => {
			let culprit = if left.coerce_to_string().is_none() {&left} else {&right};
			Err(LuaError::runtime(
				format!("attempt to concatenate a {} value", culprit.type_name()), frame))
		}
	}
}

/// `tostring`, honoring `__tostring`.
pub fn to_string(frame: &StackFrame, value: Value) -> Outcome<String> {
	match value.metamethod("__tostring") {
		Some(handler) => {
			let owned = frame.clone();
			call(frame, &handler, vec![value])?.then(move |values| {
				match first(values) {
					Value::String(string) => Ok(Deferred::Ready(string.to_string())),
					other => other.coerce_to_string().map(Deferred::Ready).ok_or_else(||
						LuaError::runtime("'__tostring' must return a string", &owned))
				}
			})
		},
		None => Ok(Deferred::Ready(value.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::{binary, call, index, less_equal, to_string, unary};
	use crate::{
		ast::{Context, syntax::{BinaryOperator, UnaryOperator}},
		vm::{deferred::Deferred, frame::StackFrame, table::Table, value::{Function, Value}}
	};

	fn ready<T>(outcome: super::Outcome<T>) -> T {
		match outcome.unwrap() {
			Deferred::Ready(value) => value,
			Deferred::Pending(_) => panic!("unexpectedly pending")
		}
	}

	fn error<T>(outcome: super::Outcome<T>) -> String {
		match outcome {
			Err(error) => error.to_string(),
			Ok(_) => panic!("expected an error")
		}
	}

	fn frame() -> StackFrame {
		StackFrame::detached(Context::default())
	}

	fn with_metatable(name: &str, value: Value) -> Value {
		let metatable = Table::new();
		metatable.set_str(name, value);
		let table = Table::new();
		table.set_metatable(Some(metatable.arc()));
		Value::Table(table.arc())
	}

	#[test]
	fn test_arithmetic_errors() {
		let frame = frame();
		assert_eq!(error(binary(&frame, BinaryOperator::Add, Value::from("a"), Value::Integer(1))),
			"attempt to add a 'string' with a 'number'");
		assert_eq!(error(binary(&frame, BinaryOperator::Multiply, Value::Nil, Value::Integer(1))),
			"attempt to perform arithmetic on a nil value");
		assert_eq!(error(unary(&frame, UnaryOperator::Negate, Value::from("x"))),
			"attempt to unm a 'string' with a 'string'");
	}

	#[test]
	fn test_bitwise_errors() {
		let frame = frame();
		assert_eq!(error(binary(&frame, BinaryOperator::BitwiseAnd, Value::Float(1.5),
			Value::Integer(1))), "number has no integer representation");
		assert_eq!(error(binary(&frame, BinaryOperator::BitwiseOr, Value::from("x"),
			Value::Integer(1))),
			"attempt to perform bitwise operation on a string value (constant 'x')");
		assert_eq!(ready(binary(&frame, BinaryOperator::ShiftLeft, Value::from("1"),
			Value::Integer(4))), Value::Integer(16));
	}

	#[test]
	fn test_comparison() {
		let frame = frame();
		assert_eq!(ready(binary(&frame, BinaryOperator::LessThan, Value::Integer(1),
			Value::Float(1.5))), Value::Boolean(true));
		assert_eq!(ready(binary(&frame, BinaryOperator::GreaterThanOrEqual, Value::from("b"),
			Value::from("a"))), Value::Boolean(true));
		assert_eq!(error(binary(&frame, BinaryOperator::LessThan, Value::Integer(1),
			Value::from("2"))), "attempt to compare number with string");
	}

	#[test]
	fn test_less_equal_ignores_lt() {
		let frame = frame();
		let lt = Value::Function(Function::sync("lt", |_, _| Ok(vec![Value::Boolean(true)])));
		let object = with_metatable("__lt", lt);
		assert_eq!(ready(binary(&frame, BinaryOperator::LessThan, object.clone(),
			object.clone())), Value::Boolean(true));
		assert!(less_equal(&frame, object.clone(), object).is_err());
	}

	#[test]
	fn test_index_chain_too_long() {
		let frame = frame();
		let table = Table::new().arc();
		let metatable = Table::new().arc();
		metatable.set_str("__index", Value::Table(table.clone()));
		table.set_metatable(Some(metatable));

		let message = error(index(&frame, &Value::Table(table), Value::from("missing")));
		assert!(message.contains("chain too long"), "{}", message);
	}

	#[test]
	fn test_index_function() {
		let frame = frame();
		let object = with_metatable("__index", Value::Function(Function::sync("index",
			|_, arguments| Ok(vec![arguments[1].clone()]))));
		assert_eq!(ready(index(&frame, &object, Value::from("key"))), Value::from("key"));
		assert_eq!(error(index(&frame, &Value::Nil, Value::from("key"))),
			"attempt to index a nil value");
	}

	#[test]
	fn test_call_metamethod() {
		let frame = frame();
		let object = with_metatable("__call", Value::Function(Function::sync("call",
			|_, arguments| Ok(vec![Value::from(arguments.len())]))));
		assert_eq!(ready(call(&frame, &object, vec![Value::Integer(1)])),
			vec![Value::Integer(2)]);

		let broken = with_metatable("__call", Value::Integer(5));
		assert_eq!(error(call(&frame, &broken, vec![])), "attempt to call a number value");
	}

	#[test]
	fn test_tostring_metamethod() {
		let frame = frame();
		let object = with_metatable("__tostring", Value::Function(Function::sync("tostring",
			|_, _| Ok(vec![Value::from("custom")]))));
		assert_eq!(ready(to_string(&frame, object)), "custom");
		assert_eq!(ready(to_string(&frame, Value::Float(2.0))), "2.0");
	}
}
