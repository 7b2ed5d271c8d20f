//! Host functions and the conversion of values to and from host values.
//!
//! Host values are JSON shaped, plus functions. Tables with a nonzero length
//! become arrays of their sequence, every other table becomes an object keyed
//! by the string form of its keys. Going the other way arrays become
//! sequences starting at one and objects become tables keyed by strings.
//! Functions cross in both directions as [Callback]s, so a host function can
//! take a Lua function and call it, or hand one back.

use self::super::{
	deferred::Deferred,
	frame::StackFrame,
	operators,
	table::Table,
	value::{Function, Value}
};
use crate::{ast::Context, error::{LuaError, Result}};
use log::debug;
use serde_json::{Map, Number as JSONNumber, Value as JSON};
use std::{
	collections::BTreeMap,
	fmt::{Debug, Formatter, Result as FMTResult},
	future::Future,
	pin::Pin,
	sync::Arc
};

pub type HostFuture = Pin<Box<dyn Future<Output = Result<HostValue, String>>>>;

/// What calling a host function produced.
pub enum HostCall {
	Ready(Result<HostValue, String>),
	/// The host has to wait for something; evaluation suspends until it's done.
	Pending(HostFuture)
}

/// A function provided by the host, called with converted arguments.
pub struct HostFunction {
	name: String,
	function: Box<dyn Fn(Vec<HostValue>) -> HostCall + Send + Sync>
}

impl HostFunction {
	pub fn sync<R, F>(name: impl Into<String>, function: F) -> Self
			where
				R: Into<HostValue>,
				F: Fn(Vec<HostValue>) -> Result<R, String> + Send + Sync + 'static {
		Self {name: name.into(), function: Box::new(move |arguments|
			HostCall::Ready(function(arguments).map(Into::into)))}
	}

	pub fn asynchronous<R, F, O>(name: impl Into<String>, function: F) -> Self
			where
				R: Into<HostValue>,
				F: Fn(Vec<HostValue>) -> O + Send + Sync + 'static,
				O: Future<Output = Result<R, String>> + 'static {
		Self {name: name.into(), function: Box::new(move |arguments| {
			let future = function(arguments);
			HostCall::Pending(Box::pin(async move {future.await.map(Into::into)}))
		})}
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

impl Debug for HostFunction {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		write!(f, "<host {}>", self.name)
	}
}

/// A function passed across the host boundary.
///
/// Lua functions remember the frame they were passed from, and are called
/// on its thread. Callbacks the host makes from a [HostFunction] have no
/// frame.
#[derive(Clone)]
pub struct Callback {
	function: Function,
	frame: Option<StackFrame>
}

impl Callback {
	pub fn new(function: HostFunction) -> Self {
		Self {function: Function::Host(Arc::new(function)), frame: None}
	}

	pub fn function(&self) -> &Function {
		&self.function
	}

	pub async fn call(&self, arguments: Vec<HostValue>) -> Result<HostValue, String> {
		let frame = self.frame.clone()
			.unwrap_or_else(|| StackFrame::detached(Context::default()));
		let arguments = arguments.into_iter().map(HostValue::into_value).collect();
		let results = operators::call_function(&frame, &self.function, arguments)
			.map_err(|error| error.to_string())?
			.resolve().await
			.map_err(|error| error.to_string())?;
		Ok(HostValue::from_value(&operators::first(results), &frame))
	}
}

impl Debug for Callback {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		write!(f, "Callback({})", self.function)
	}
}

/// A value as the host sees it.
#[derive(Clone, Debug, Default)]
pub enum HostValue {
	#[default]
	Null,
	Bool(bool),
	Number(JSONNumber),
	String(String),
	Array(Vec<HostValue>),
	Object(BTreeMap<String, HostValue>),
	Function(Callback)
}

impl HostValue {
	/// Converts a value for the host. Tables already being converted become
	/// `null`; functions become callbacks called on `frame`'s thread.
	pub fn from_value(value: &Value, frame: &StackFrame) -> Self {
		lift(value, Some(frame), &mut Vec::new())
	}

	pub fn into_value(self) -> Value {
		match self {
			Self::Null => Value::Nil,
			Self::Bool(boolean) => Value::Boolean(boolean),
			Self::Number(number) => match number.as_i64() {
				Some(integer) => Value::Integer(integer),
				None => number.as_f64().map(Value::Float).unwrap_or_default()
			},
			Self::String(string) => Value::from(string),
			Self::Array(values) =>
				Table::from_values(values.into_iter().map(Self::into_value).collect()).into(),
			Self::Object(map) => {
				let table = Table::new();
				for (key, value) in map {
					table.set_str(&key, value.into_value());
				}
				table.into()
			},
			Self::Function(callback) => Value::Function(callback.function)
		}
	}

	/// The JSON form, with functions as `null`.
	pub fn to_json(&self) -> JSON {
		match self {
			Self::Null | Self::Function(_) => JSON::Null,
			Self::Bool(boolean) => JSON::Bool(*boolean),
			Self::Number(number) => JSON::Number(number.clone()),
			Self::String(string) => JSON::String(string.clone()),
			Self::Array(values) => JSON::Array(values.iter().map(Self::to_json).collect()),
			Self::Object(map) => JSON::Object(map.iter()
				.map(|(key, value)| (key.clone(), value.to_json()))
				.collect::<Map<_, _>>())
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Self::Null)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(boolean) => Some(*boolean),
			_ => None
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Number(number) => number.as_i64(),
			_ => None
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Self::Number(number) => number.as_f64(),
			_ => None
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(string) => Some(string),
			_ => None
		}
	}

	pub fn as_callback(&self) -> Option<&Callback> {
		match self {
			Self::Function(callback) => Some(callback),
			_ => None
		}
	}

	/// A field of an object.
	pub fn get(&self, key: &str) -> Option<&HostValue> {
		match self {
			Self::Object(map) => map.get(key),
			_ => None
		}
	}
}

impl From<JSON> for HostValue {
	fn from(value: JSON) -> Self {
		match value {
			JSON::Null => Self::Null,
			JSON::Bool(boolean) => Self::Bool(boolean),
			JSON::Number(number) => Self::Number(number),
			JSON::String(string) => Self::String(string),
			JSON::Array(values) => Self::Array(values.into_iter().map(Into::into).collect()),
			JSON::Object(map) => Self::Object(map.into_iter()
				.map(|(key, value)| (key, value.into()))
				.collect())
		}
	}
}

impl From<Callback> for HostValue {
	fn from(callback: Callback) -> Self {
		Self::Function(callback)
	}
}

fn lift(value: &Value, frame: Option<&StackFrame>, seen: &mut Vec<*const Table>) -> HostValue {
	match value {
		Value::Nil => HostValue::Null,
		Value::Function(function) => match frame {
			Some(frame) => HostValue::Function(Callback {
				function: function.clone(),
				frame: Some(frame.clone())
			}),
			None => HostValue::Null
		},
		Value::Boolean(boolean) => HostValue::Bool(*boolean),
		Value::Integer(integer) => HostValue::Number((*integer).into()),
		Value::Float(float) => JSONNumber::from_f64(*float).map_or(HostValue::Null, HostValue::Number),
		Value::String(string) => HostValue::String(string.to_string()),
		Value::MultiResult(values) =>
			values.first().map_or(HostValue::Null, |value| lift(value, frame, seen)),
		Value::Table(table) => {
			let pointer = Arc::as_ptr(table);
			if seen.contains(&pointer) {return HostValue::Null}
			seen.push(pointer);

			let result = if table.length() > 0 {
				HostValue::Array(table.array().iter().map(|value| lift(value, frame, seen)).collect())
			} else {
				HostValue::Object(table.pairs().into_iter()
					.map(|(key, value)| (key.to_string(), lift(&value, frame, seen)))
					.collect())
			};

			seen.pop();
			result
		}
	}
}

pub fn call_host(host: &HostFunction, frame: &StackFrame, arguments: Vec<Value>)
		-> Result<Deferred<'static, Vec<Value>>> {
	let arguments = arguments.iter().map(|value| HostValue::from_value(value, frame)).collect();
	match (host.function)(arguments) {
		HostCall::Ready(result) => result
			.map(|value| Deferred::Ready(vec![value.into_value()]))
			.map_err(LuaError::Host),
		HostCall::Pending(future) => {
			debug!("host function {} suspended", host.name);
			Ok(Deferred::pending(async move {
				future.await.map(|value| vec![value.into_value()]).map_err(LuaError::Host)
			}))
		}
	}
}

/// Converts a JSON value.
pub fn from_json(value: JSON) -> Value {
	HostValue::from(value).into_value()
}

/// Converts a value to JSON. Functions and tables already being converted
/// become `null`.
pub fn to_json(value: &Value) -> JSON {
	lift(value, None, &mut Vec::new()).to_json()
}

#[cfg(test)]
mod tests {
	use super::{Callback, HostFunction, HostValue, call_host, from_json, to_json};
	use crate::{
		ast::Context,
		lua_table,
		vm::{deferred::Deferred, frame::StackFrame, table::Table, value::{Function, Value}}
	};
	use serde_json::json;

	fn frame() -> StackFrame {
		StackFrame::detached(Context::default())
	}

	#[test]
	fn test_tables_to_json() {
		let sequence = lua_table! {1, 2, "three"};
		assert_eq!(to_json(&Value::Table(sequence.arc())), json!([1, 2, "three"]));

		let record = lua_table! {name = "page", size = 1.5};
		assert_eq!(to_json(&Value::Table(record.arc())), json!({"name": "page", "size": 1.5}));

		assert_eq!(to_json(&Value::Table(Table::new().arc())), json!({}));
	}

	#[test]
	fn test_cycles_become_null() {
		let table = Table::new().arc();
		table.set_str("me", Value::Table(table.clone()));
		assert_eq!(to_json(&Value::Table(table)), json!({"me": null}));
	}

	#[test]
	fn test_from_json() {
		let value = from_json(json!({"tags": ["a", "b"], "count": 2, "ratio": 0.5}));
		let table = value.table().unwrap();
		assert_eq!(table.get_str("count"), Value::Integer(2));
		assert_eq!(table.get_str("ratio"), Value::Float(0.5));
		let tags = table.get_str("tags");
		assert_eq!(tags.table().unwrap().get(&Value::Integer(2)), Value::from("b"));
		assert_eq!(from_json(json!(null)), Value::Nil);
	}

	#[test]
	fn test_sync_host_call() {
		let host = HostFunction::sync("sum", |arguments| {
			Ok(json!(arguments.iter().filter_map(HostValue::as_i64).sum::<i64>()))
		});
		let result = call_host(&host, &frame(), vec![Value::Integer(1), Value::Integer(2)]).unwrap();
		assert!(matches!(result, Deferred::Ready(ref values)
			if values == &vec![Value::Integer(3)]));

		let failing = HostFunction::sync("fail", |_| Err::<HostValue, _>("no such page".to_owned()));
		assert_eq!(call_host(&failing, &frame(), vec![]).unwrap_err().to_string(), "no such page");
	}

	#[tokio::test]
	async fn test_async_host_call() {
		let host = HostFunction::asynchronous("later", |arguments| async move {
			tokio::task::yield_now().await;
			Ok::<_, String>(arguments.into_iter().next().unwrap_or_default())
		});
		let result = call_host(&host, &frame(), vec![Value::from("hi")]).unwrap();
		assert!(!result.is_ready());
		assert_eq!(result.resolve().await.unwrap(), vec![Value::from("hi")]);
	}

	#[tokio::test]
	async fn test_functions_cross_as_callbacks() {
		let double = Function::sync("double", |_, arguments|
			Ok(vec![Value::Integer(arguments[0].integer().unwrap_or(0) * 2)]));
		let lifted = HostValue::from_value(&lua_table! {f = double}.into(), &frame());
		let callback = lifted.get("f").and_then(HostValue::as_callback).unwrap().clone();
		assert_eq!(callback.call(vec![json!(21).into()]).await.unwrap().as_i64(), Some(42));
		assert_eq!(lifted.to_json(), json!({"f": null}));

		let made = Callback::new(HostFunction::sync("name", |_| Ok(json!("host"))));
		let value = HostValue::from(made).into_value();
		assert!(value.function().is_some());
	}
}
