//! The standard library.
//!
//! Every library function is an ordinary builtin installed into the globals
//! table. Functions that may call back into Lua return a [Deferred]; the rest
//! are plain synchronous functions wrapped with [Function::sync].

pub mod encoding;
pub mod format;
pub mod math;
pub mod os;
pub mod pack;
pub mod pattern;
pub mod spacelua;
pub mod string;
pub mod table;

use self::super::{
	ast,
	error::{LuaError, Result},
	lua_table,
	vm::{
		deferred::{Deferred, sequence, settle},
		env::Env,
		eval,
		frame::StackFrame,
		number::{self, Number},
		operators,
		table::Table,
		value::{Function, Value}
	}
};
use std::{
	fmt::Display,
	sync::{Arc, atomic::{AtomicUsize, Ordering}}
};

pub(crate) fn argument(arguments: &[Value], index: usize) -> Value {
	arguments.get(index).cloned().unwrap_or_default()
}

/// `bad argument #position to 'function' (message)`.
pub(crate) fn bad_argument(frame: &StackFrame, position: usize, function: &str,
		message: impl Display) -> LuaError {
	LuaError::runtime(format!("bad argument #{} to '{}' ({})", position, function, message),
		frame)
}

fn expected(frame: &StackFrame, arguments: &[Value], index: usize, function: &str,
		what: &str) -> LuaError {
	let got = arguments.get(index).map_or("no value", Value::type_name);
	bad_argument(frame, index + 1, function, format!("{} expected, got {}", what, got))
}

pub(crate) fn check_table(frame: &StackFrame, arguments: &[Value], index: usize,
		function: &str) -> Result<Arc<Table>> {
	match arguments.get(index) {
		Some(Value::Table(table)) => Ok(table.clone()),
		_ => Err(expected(frame, arguments, index, function, "table"))
	}
}

pub(crate) fn check_string(frame: &StackFrame, arguments: &[Value], index: usize,
		function: &str) -> Result<String> {
	arguments.get(index).and_then(Value::coerce_to_string)
		.ok_or_else(|| expected(frame, arguments, index, function, "string"))
}

pub(crate) fn check_number(frame: &StackFrame, arguments: &[Value], index: usize,
		function: &str) -> Result<Number> {
	arguments.get(index).and_then(number::coerce)
		.ok_or_else(|| expected(frame, arguments, index, function, "number"))
}

pub(crate) fn check_integer(frame: &StackFrame, arguments: &[Value], index: usize,
		function: &str) -> Result<i64> {
	check_number(frame, arguments, index, function)?.integer().ok_or_else(||
		bad_argument(frame, index + 1, function, "number has no integer representation"))
}

/// An integer argument that defaults when it's `nil` or absent.
pub(crate) fn optional_integer(frame: &StackFrame, arguments: &[Value], index: usize,
		function: &str, default: i64) -> Result<i64> {
	match arguments.get(index) {
		None | Some(Value::Nil) => Ok(default),
		Some(_) => check_integer(frame, arguments, index, function)
	}
}

pub(crate) fn ready(values: Vec<Value>) -> Result<Deferred<'static, Vec<Value>>> {
	Ok(Deferred::Ready(values))
}

pub fn print(frame: &StackFrame, arguments: Vec<Value>) -> Result<Deferred<'static, Vec<Value>>> {
	let owned = frame.clone();
	let steps = arguments.into_iter().map(move |value| {
		let frame = owned.clone();
		move || operators::to_string(&frame, value)
	});
	let frame = frame.clone();
	Ok(sequence(steps)?.map(move |parts| {
		frame.print(&parts.join("\t"));
		Vec::new()
	}))
}

pub fn assert(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	match arguments.first().map(Value::coerce_to_bool) {
		Some(true) => Ok(arguments),
		None => Err(bad_argument(frame, 1, "assert", "value expected")),
		Some(false) => match argument(&arguments, 1) {
			Value::Nil => Err(LuaError::runtime("assertion failed!", frame)),
			message => Err(LuaError::from_value(message, frame))
		}
	}
}

pub fn r#type(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	match arguments.first() {
		Some(value) => Ok(vec![Value::from(value.type_name())]),
		None => Err(bad_argument(frame, 1, "type", "value expected"))
	}
}

pub fn tostring(frame: &StackFrame, arguments: Vec<Value>)
		-> Result<Deferred<'static, Vec<Value>>> {
	Ok(operators::to_string(frame, argument(&arguments, 0))?
		.map(|string| vec![Value::from(string)]))
}

pub fn tonumber(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let value = argument(&arguments, 0);
	let result = match arguments.get(1) {
		None | Some(Value::Nil) => match &value {
			Value::Integer(_) | Value::Float(_) => value.clone(),
			Value::String(string) => number::parse(string).map(Value::from).unwrap_or_default(),
			_ => Value::Nil
		},
		Some(_) => {
			let base = check_integer(frame, &arguments, 1, "tonumber")?;
			if !(2..=36).contains(&base) {
				return Err(bad_argument(frame, 2, "tonumber", "base out of range"))
			}
			let text = check_string(frame, &arguments, 0, "tonumber")?;
			number::parse_radix(text.trim(), base as u32).map(Value::Integer).unwrap_or_default()
		}
	};
	Ok(vec![result])
}

pub fn unpack(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "unpack")?;
	let start = optional_integer(frame, &arguments, 1, "unpack", 1)?;
	let end = optional_integer(frame, &arguments, 2, "unpack", table.length() as i64)?;
	if end.saturating_sub(start) >= 1_000_000 {
		return Err(LuaError::runtime("too many results to unpack", frame))
	}
	Ok((start..=end).map(|index| table.get(&Value::Integer(index))).collect())
}

pub fn select(frame: &StackFrame, mut arguments: Vec<Value>) -> Result<Vec<Value>> {
	if arguments.first().and_then(Value::string) == Some("#") {
		return Ok(vec![Value::from(arguments.len() - 1)])
	}

	let index = check_integer(frame, &arguments, 0, "select")?;
	let count = arguments.len() as i64 - 1;
	let start = match index {
		index if index < 0 && -index <= count => count + index + 1,
		index if index > 0 => index.min(count + 1),
		_ => return Err(bad_argument(frame, 1, "select", "index out of range"))
	};
	Ok(arguments.split_off(start as usize))
}

pub fn next(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "next")?;
	match table.next(&argument(&arguments, 1)) {
		Ok(Some((key, value))) => Ok(vec![key, value]),
		Ok(None) => Ok(vec![Value::Nil]),
		Err(error) => Err(LuaError::runtime(error.to_string(), frame))
	}
}

pub fn pairs(frame: &StackFrame, arguments: Vec<Value>) -> Result<Deferred<'static, Vec<Value>>> {
	let value = argument(&arguments, 0);
	if let Some(handler) = value.metamethod("__pairs") {
		return Ok(operators::call(frame, &handler, vec![value])?.map(|mut values| {
			values.resize(3, Value::Nil);
			values
		}))
	}

	let table = check_table(frame, &arguments, 0, "pairs")?;
	ready(vec![Function::sync("next", next).into(), Value::Table(table), Value::Nil])
}

fn ipairs_step(frame: &StackFrame, arguments: Vec<Value>)
		-> Result<Deferred<'static, Vec<Value>>> {
	let index = argument(&arguments, 1).integer().unwrap_or(0) + 1;
	Ok(operators::index(frame, &argument(&arguments, 0), Value::Integer(index))?
		.map(move |value| match value.is_nil() {
			true => vec![Value::Nil],
			false => vec![Value::Integer(index), value]
		}))
}

pub fn ipairs(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	match arguments.first() {
		Some(value) => Ok(vec![Function::builtin("ipairs", ipairs_step).into(),
			value.clone(), Value::Integer(0)]),
		None => Err(bad_argument(frame, 1, "ipairs", "table expected, got no value"))
	}
}

/// An iterator over the values of a sequence, without their indices.
pub fn each(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "each")?;
	let length = table.length();
	let position = AtomicUsize::new(0);

	let iterator = Function::builtin("each", move |frame, _| {
		let index = position.fetch_add(1, Ordering::Relaxed) + 1;
		if index > length {return ready(Vec::new())}
		Ok(operators::index(frame, &Value::Table(table.clone()), Value::from(index))?
			.map(|value| vec![value]))
	});
	Ok(vec![iterator.into()])
}

/// The value, unless it's empty: `nil` for blank strings, tables without
/// entries and numbers that aren't finite.
pub fn some(_: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let value = argument(&arguments, 0);
	let empty = match &value {
		Value::Float(float) => !float.is_finite(),
		Value::String(string) => string.trim().is_empty(),
		Value::Table(table) => matches!(table.next(&Value::Nil), Ok(None)),
		_ => false
	};
	Ok(vec![if empty {Value::Nil} else {value}])
}

pub fn setmetatable(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "setmetatable")?;
	let metatable = match argument(&arguments, 1) {
		Value::Nil => None,
		Value::Table(metatable) => Some(metatable),
		_ => return Err(bad_argument(frame, 2, "setmetatable", "nil or table expected"))
	};
	if table.metatable().map_or(false, |current| !current.get_str("__metatable").is_nil()) {
		return Err(LuaError::runtime("cannot change a protected metatable", frame))
	}

	table.set_metatable(metatable);
	Ok(vec![Value::Table(table)])
}

pub fn getmetatable(_: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![match argument(&arguments, 0).metatable() {
		Some(metatable) => match metatable.get_str("__metatable") {
			Value::Nil => Value::Table(metatable),
			protected => protected
		},
		None => Value::Nil
	}])
}

pub fn rawget(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "rawget")?;
	Ok(vec![table.get(&argument(&arguments, 1))])
}

pub fn rawset(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "rawset")?;
	table.set(argument(&arguments, 1), argument(&arguments, 2))
		.map_err(|message| LuaError::runtime(message, frame))?;
	Ok(vec![Value::Table(table)])
}

pub fn rawequal(_: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![Value::Boolean(argument(&arguments, 0) == argument(&arguments, 1))])
}

pub fn rawlen(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	match argument(&arguments, 0) {
		Value::Table(table) => Ok(vec![Value::from(table.length())]),
		Value::String(string) => Ok(vec![Value::from(string.len())]),
		_ => Err(bad_argument(frame, 1, "rawlen", "table or string expected"))
	}
}

/// Raises any value as an error. The level picks how many frames up the
/// error is attributed to.
pub fn error(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let level = optional_integer(frame, &arguments, 1, "error", 1)?;
	let mut target = frame;
	for _ in 1..level.max(1) {
		match target.parent() {
			Some(parent) => target = parent,
			None => break
		}
	}
	Err(LuaError::from_value(argument(&arguments, 0), target))
}

pub fn pcall(frame: &StackFrame, mut arguments: Vec<Value>)
		-> Result<Deferred<'static, Vec<Value>>> {
	if arguments.is_empty() {
		return Err(bad_argument(frame, 1, "pcall", "value expected"))
	}
	let function = arguments.remove(0);

	// Anything a failed call left to be closed is closed before returning.
	let mark = frame.close_mark();
	let called = frame.close_scope(mark, operators::call(frame, &function, arguments));
	Ok(settle(called).map(|result| match result {
		Ok(mut values) => {
			values.insert(0, Value::Boolean(true));
			values
		},
		Err(error) => vec![Value::Boolean(false), error.value()]
	}))
}

pub fn xpcall(frame: &StackFrame, mut arguments: Vec<Value>)
		-> Result<Deferred<'static, Vec<Value>>> {
	if arguments.len() < 2 {
		return Err(bad_argument(frame, 2, "xpcall", "value expected"))
	}
	let function = arguments.remove(0);
	let handler = arguments.remove(0);

	let mark = frame.close_mark();
	let called = frame.close_scope(mark, operators::call(frame, &function, arguments));
	let frame = frame.clone();
	settle(called).then(move |result| match result {
		Ok(mut values) => {
			values.insert(0, Value::Boolean(true));
			ready(values)
		},
		Err(error) => Ok(operators::call(&frame, &handler, vec![error.value()])?
			.map(|mut values| {
				values.insert(0, Value::Boolean(false));
				values
			}))
	})
}

/// Compiles a string into a function, returning `nil` and the message when
/// it doesn't parse.
pub fn load(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let source = check_string(frame, &arguments, 0, "load")?;
	let reference = match argument(&arguments, 1) {
		Value::String(name) => Some(name.trim_start_matches(['=', '@']).to_owned()),
		_ => None
	};
	let env = match argument(&arguments, 3) {
		Value::Table(table) => Env::new(table),
		_ => Env::new(frame.globals().clone())
	};

	Ok(match ast::parse(&source, reference.as_deref()) {
		Ok(block) => vec![eval::chunk(block, env).into()],
		Err(error) => vec![Value::Nil, Value::from(error.to_string())]
	})
}

/// Runs a file read through the runtime's file loader.
pub fn dofile(frame: &StackFrame, arguments: Vec<Value>) -> Result<Deferred<'static, Vec<Value>>> {
	let path = check_string(frame, &arguments, 0, "dofile")?;
	let source = (frame.loader())(&path).map_err(|error|
		LuaError::runtime(format!("cannot open {}: {}", path, error), frame))?;
	let block = ast::parse(&source, Some(&path))
		.map_err(|error| LuaError::from(error).within(frame))?;

	let chunk = eval::chunk(block, Env::new(frame.globals().clone()));
	operators::call_function(frame, &chunk, Vec::new())
}

/// Builds a fresh globals table with the whole standard library.
pub fn standard_globals() -> Arc<Table> {
	let globals = lua_table! {
		print = Function::builtin("print", print),
		assert = Function::sync("assert", assert),
		type = Function::sync("type", r#type),
		tostring = Function::builtin("tostring", tostring),
		tonumber = Function::sync("tonumber", tonumber),
		unpack = Function::sync("unpack", unpack),
		select = Function::sync("select", select),
		next = Function::sync("next", next),
		pairs = Function::builtin("pairs", pairs),
		ipairs = Function::sync("ipairs", ipairs),
		each = Function::sync("each", each),
		some = Function::sync("some", some),
		setmetatable = Function::sync("setmetatable", setmetatable),
		getmetatable = Function::sync("getmetatable", getmetatable),
		rawget = Function::sync("rawget", rawget),
		rawset = Function::sync("rawset", rawset),
		rawequal = Function::sync("rawequal", rawequal),
		rawlen = Function::sync("rawlen", rawlen),
		error = Function::sync("error", error),
		pcall = Function::builtin("pcall", pcall),
		xpcall = Function::builtin("xpcall", xpcall),
		load = Function::sync("load", load),
		dofile = Function::builtin("dofile", dofile),

		string = string::library(),
		table = table::library(),
		math = math::library(),
		os = os::library(),
		encoding = encoding::library(),
		spacelua = spacelua::library()
	}.arc();

	globals.set_str("_G", Value::Table(globals.clone()));
	globals
}

#[cfg(test)]
mod tests {
	use super::standard_globals;
	use crate::{
		ast::Context,
		lua_tuple,
		vm::{
			deferred::Deferred,
			frame::{StackFrame, ThreadState},
			operators,
			value::Value
		}
	};
	use std::sync::{Arc, Mutex};

	fn call(name: &str, arguments: Vec<Value>) -> Result<Vec<Value>, String> {
		let globals = standard_globals();
		let frame = StackFrame::detached(Context::default());
		let function = globals.get_str(name);
		match operators::call(&frame, &function, arguments) {
			Ok(Deferred::Ready(values)) => Ok(values),
			Ok(Deferred::Pending(_)) => panic!("unexpectedly pending"),
			Err(error) => Err(error.to_string())
		}
	}

	#[test]
	fn test_select() {
		assert_eq!(call("select", lua_tuple!["#", 1, 2, 3]).unwrap(), lua_tuple![3]);
		assert_eq!(call("select", lua_tuple![2, "a", "b", "c"]).unwrap(), lua_tuple!["b", "c"]);
		assert_eq!(call("select", lua_tuple![-1, "a", "b", "c"]).unwrap(), lua_tuple!["c"]);
		assert_eq!(call("select", lua_tuple![0, "a"]).unwrap_err(),
			"bad argument #1 to 'select' (index out of range)");
	}

	#[test]
	fn test_tonumber() {
		assert_eq!(call("tonumber", lua_tuple![" 10 "]).unwrap(), lua_tuple![10]);
		assert_eq!(call("tonumber", lua_tuple!["0x10"]).unwrap(), lua_tuple![16]);
		assert_eq!(call("tonumber", lua_tuple!["ff", 16]).unwrap(), lua_tuple![255]);
		assert_eq!(call("tonumber", lua_tuple!["z", 36]).unwrap(), lua_tuple![35]);
		assert_eq!(call("tonumber", lua_tuple!["hello"]).unwrap(), lua_tuple![()]);
	}

	#[test]
	fn test_some() {
		assert_eq!(call("some", lua_tuple!["  "]).unwrap(), lua_tuple![()]);
		assert_eq!(call("some", lua_tuple!["x"]).unwrap(), lua_tuple!["x"]);
		assert_eq!(call("some", vec![Value::Table(crate::lua_table! {}.arc())]).unwrap(),
			lua_tuple![()]);
	}

	#[test]
	fn test_error_values() {
		assert_eq!(call("error", lua_tuple!["boom"]).unwrap_err(), "boom");
		assert_eq!(call("assert", lua_tuple![false]).unwrap_err(), "assertion failed!");
		assert_eq!(call("assert", lua_tuple![1, 2]).unwrap(), lua_tuple![1, 2]);
	}

	#[test]
	fn test_pcall() {
		let globals = standard_globals();
		let result = call("pcall", vec![globals.get_str("error"), Value::from("oops")]).unwrap();
		assert_eq!(result, lua_tuple![false, "oops"]);

		let result = call("pcall", vec![globals.get_str("type"), Value::Integer(1)]).unwrap();
		assert_eq!(result, lua_tuple![true, "number"]);
	}

	#[test]
	fn test_print_output() {
		let lines = Arc::new(Mutex::new(Vec::new()));
		let sink = lines.clone();
		let globals = standard_globals();
		let thread = ThreadState::new(globals.clone(), crate::lua_table! {}.arc(),
			Arc::default(), Arc::new(|path: &str| std::fs::read_to_string(path)))
			.with_output(Arc::new(move |line: &str| {
				sink.lock().unwrap().push(line.to_owned())
			}));
		let frame = StackFrame::new(Arc::new(thread));

		let result = operators::call(&frame, &globals.get_str("print"),
			lua_tuple![1, 2.5, "x", true, ()]).unwrap();
		assert!(result.is_ready());
		assert_eq!(*lines.lock().unwrap(), vec!["1\t2.5\tx\ttrue\tnil"]);
	}
}
