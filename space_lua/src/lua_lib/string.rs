//! The `string` library. Positions count bytes, starting at one.

use self::super::{
	argument, bad_argument, check_integer, check_string, format, optional_integer, pack,
	pattern::{self, Capture, Match}, ready
};
use crate::{
	error::{LuaError, Result},
	lua_table,
	vm::{
		deferred::{Deferred, sequence},
		frame::StackFrame,
		operators,
		table::Table,
		value::{Function, Value}
	}
};
use regex::Regex;
use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};

/// Strings can't grow past this.
const MAX_LENGTH: usize = 1 << 31;

/// A possibly negative start position, as a one based index clamped to the
/// string.
fn start_index(position: i64, length: usize) -> usize {
	match position {
		position if position > 0 => position as usize,
		0 => 1,
		position if position.unsigned_abs() as usize > length => 1,
		position => (length as i64 + position + 1) as usize
	}
}

/// A possibly negative end position, as a one based index clamped to the
/// string.
fn end_index(position: i64, length: usize) -> usize {
	match position {
		position if position > length as i64 => length,
		position if position >= 0 => position as usize,
		position if position.unsigned_abs() as usize > length => 0,
		position => (length as i64 + position + 1) as usize
	}
}

fn lossy(bytes: &[u8]) -> Value {
	Value::from(String::from_utf8_lossy(bytes).into_owned())
}

fn capture_value(subject: &str, capture: Capture) -> Value {
	match capture {
		Capture::Text(range) => lossy(&subject.as_bytes()[range]),
		Capture::Position(position) => Value::from(position)
	}
}

fn pattern_error(frame: &StackFrame) -> impl Fn(String) -> LuaError + '_ {
	move |message| LuaError::runtime(message, frame)
}

pub fn byte(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "byte")?;
	let first = optional_integer(frame, &arguments, 1, "byte", 1)?;
	let last = optional_integer(frame, &arguments, 2, "byte", first)?;
	let (start, end) = (start_index(first, string.len()), end_index(last, string.len()));
	if start > end {return Ok(Vec::new())}
	Ok(string.as_bytes()[start - 1..end].iter().map(|&byte| Value::from(byte as i64)).collect())
}

pub fn char(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let mut string = String::new();
	for index in 0..arguments.len() {
		let code = check_integer(frame, &arguments, index, "char")?;
		let character = u32::try_from(code).ok().and_then(char::from_u32)
			.ok_or_else(|| bad_argument(frame, index + 1, "char", "value out of range"))?;
		string.push(character);
	}
	Ok(vec![Value::from(string)])
}

pub fn len(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![Value::from(check_string(frame, &arguments, 0, "len")?.len())])
}

pub fn lower(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![Value::from(check_string(frame, &arguments, 0, "lower")?.to_lowercase())])
}

pub fn upper(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![Value::from(check_string(frame, &arguments, 0, "upper")?.to_uppercase())])
}

pub fn rep(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "rep")?;
	let count = check_integer(frame, &arguments, 1, "rep")?;
	let separator = match argument(&arguments, 2) {
		Value::Nil => String::new(),
		_ => check_string(frame, &arguments, 2, "rep")?
	};
	if count <= 0 {return Ok(vec![Value::from("")])}

	let total = (string.len() + separator.len()).saturating_mul(count as usize);
	if total >= MAX_LENGTH {
		return Err(LuaError::runtime("resulting string too large", frame))
	}
	Ok(vec![Value::from(vec![string; count as usize].join(&separator))])
}

pub fn reverse(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "reverse")?;
	Ok(vec![Value::from(string.chars().rev().collect::<String>())])
}

pub fn sub(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "sub")?;
	let start = start_index(optional_integer(frame, &arguments, 1, "sub", 1)?, string.len());
	let end = end_index(optional_integer(frame, &arguments, 2, "sub", -1)?, string.len());
	Ok(vec![match start <= end {
		true => lossy(&string.as_bytes()[start - 1..end]),
		false => Value::from("")
	}])
}

pub fn find(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let subject = check_string(frame, &arguments, 0, "find")?;
	let needle = check_string(frame, &arguments, 1, "find")?;
	let init = start_index(optional_integer(frame, &arguments, 2, "find", 1)?, subject.len());
	if init > subject.len() + 1 {return Ok(vec![Value::Nil])}

	let plain = argument(&arguments, 3).coerce_to_bool();
	if plain || pattern::is_plain(&needle) {
		let haystack = &subject.as_bytes()[init - 1..];
		let found = match needle.is_empty() {
			true => Some(0),
			false => haystack.windows(needle.len()).position(|window| window == needle.as_bytes())
		};
		return Ok(match found {
			Some(offset) => vec![Value::from(init + offset),
				Value::from(init + offset + needle.len() - 1)],
			None => vec![Value::Nil]
		})
	}

	Ok(match pattern::find(&subject, &needle, init - 1).map_err(pattern_error(frame))? {
		Some(Match {start, end, captures}) => {
			let mut values = vec![Value::from(start + 1), Value::from(end)];
			values.extend(captures.into_iter().map(|capture| capture_value(&subject, capture)));
			values
		},
		None => vec![Value::Nil]
	})
}

pub fn r#match(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let subject = check_string(frame, &arguments, 0, "match")?;
	let pattern = check_string(frame, &arguments, 1, "match")?;
	let init = start_index(optional_integer(frame, &arguments, 2, "match", 1)?, subject.len());
	if init > subject.len() + 1 {return Ok(vec![Value::Nil])}

	Ok(match pattern::find(&subject, &pattern, init - 1).map_err(pattern_error(frame))? {
		Some(found) => found.values().into_iter()
			.map(|capture| capture_value(&subject, capture)).collect(),
		None => vec![Value::Nil]
	})
}

/// Hands out precomputed results one call at a time.
fn results_iterator(name: &'static str, results: Vec<Vec<Value>>) -> Value {
	let position = AtomicUsize::new(0);
	Function::sync(name, move |_, _| {
		let index = position.fetch_add(1, Ordering::Relaxed);
		Ok(results.get(index).cloned().unwrap_or_else(|| vec![Value::Nil]))
	}).into()
}

pub fn gmatch(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let subject = check_string(frame, &arguments, 0, "gmatch")?;
	let pattern = check_string(frame, &arguments, 1, "gmatch")?;
	let init = start_index(optional_integer(frame, &arguments, 2, "gmatch", 1)?, subject.len());

	let matches = match init > subject.len() + 1 {
		true => Vec::new(),
		false => pattern::find_all(&subject, &pattern, init - 1).map_err(pattern_error(frame))?
	};
	let results = matches.into_iter()
		.map(|found| found.values().into_iter()
			.map(|capture| capture_value(&subject, capture)).collect())
		.collect();
	Ok(vec![results_iterator("gmatch", results)])
}

/// Expands `%0` to `%9` and `%%` in a replacement string.
fn expand(template: &str, subject: &str, found: &Match) -> std::result::Result<Vec<u8>, String> {
	let mut output = Vec::new();
	let mut bytes = template.bytes();
	while let Some(byte) = bytes.next() {
		if byte != b'%' {
			output.push(byte);
			continue
		}
		match bytes.next() {
			Some(b'%') => output.push(b'%'),
			Some(b'0') => output.extend_from_slice(&subject.as_bytes()[found.start..found.end]),
			Some(digit @ b'1'..=b'9') => {
				let index = (digit - b'1') as usize;
				match found.values().get(index) {
					Some(Capture::Text(range)) =>
						output.extend_from_slice(&subject.as_bytes()[range.clone()]),
					Some(Capture::Position(position)) =>
						output.extend_from_slice(position.to_string().as_bytes()),
					None => return Err(format!("invalid capture index %{} in replacement string",
						index + 1))
				}
			},
			_ => return Err("invalid use of '%' in replacement string".to_owned())
		}
	}
	Ok(output)
}

pub fn gsub(frame: &StackFrame, arguments: Vec<Value>) -> Result<Deferred<'static, Vec<Value>>> {
	let subject: Arc<str> = check_string(frame, &arguments, 0, "gsub")?.into();
	let pattern = check_string(frame, &arguments, 1, "gsub")?;
	let replacement = argument(&arguments, 2);
	let limit = match argument(&arguments, 3) {
		Value::Nil => None,
		_ => Some(check_integer(frame, &arguments, 3, "gsub")?.max(0) as usize)
	};
	if !matches!(replacement, Value::String(_) | Value::Integer(_) | Value::Float(_)
			| Value::Table(_) | Value::Function(_)) {
		return Err(bad_argument(frame, 3, "gsub", format!(
			"string/function/table expected, got {}", replacement.type_name())))
	}

	let matches = pattern::find_replaceable(&subject, &pattern, limit)
		.map_err(pattern_error(frame))?;

	let owned = frame.clone();
	let source = subject.clone();
	let steps = matches.clone().into_iter().map(move |found| {
		let (frame, subject, replacement) = (owned.clone(), source.clone(), replacement.clone());
		move || -> Result<Deferred<'static, Option<Vec<u8>>>> {
			let captures: Vec<Value> = found.values().into_iter()
				.map(|capture| capture_value(&subject, capture)).collect();
			let value = match &replacement {
				Value::Table(table) => Deferred::Ready(table.get(&captures[0])),
				Value::Function(_) => operators::call(&frame, &replacement, captures)?
					.map(operators::first),
				template => {
					let template = template.coerce_to_string().unwrap_or_default();
					let expanded = expand(&template, &subject, &found)
						.map_err(|message| LuaError::runtime(message, &frame))?;
					return Ok(Deferred::Ready(Some(expanded)))
				}
			};
			value.then(move |value| match value {
				Value::Nil | Value::Boolean(false) => Ok(Deferred::Ready(None)),
				value => match value.coerce_to_string() {
					Some(string) => Ok(Deferred::Ready(Some(string.into_bytes()))),
					None => Err(LuaError::runtime(format!(
						"invalid replacement value (a {})", value.type_name()), &frame))
				}
			})
		}
	});

	Ok(sequence(steps)?.map(move |replacements| {
		let bytes = subject.as_bytes();
		let mut output = Vec::with_capacity(bytes.len());
		let mut last = 0;
		for (found, replacement) in matches.iter().zip(replacements) {
			output.extend_from_slice(&bytes[last..found.start]);
			match replacement {
				Some(replacement) => output.extend_from_slice(&replacement),
				None => output.extend_from_slice(&bytes[found.start..found.end])
			}
			last = found.end;
		}
		output.extend_from_slice(&bytes[last..]);
		vec![lossy(&output), Value::from(matches.len())]
	}))
}

pub fn format(frame: &StackFrame, arguments: Vec<Value>) -> Result<Deferred<'static, Vec<Value>>> {
	let template = check_string(frame, &arguments, 0, "format")?;

	// Values with `__tostring` are converted up front, everything else is
	// formatted as is.
	let owned = frame.clone();
	let steps = arguments.into_iter().skip(1).map(move |value| {
		let frame = owned.clone();
		move || -> Result<Deferred<'static, Value>> {match value.metamethod("__tostring") {
			Some(_) => Ok(operators::to_string(&frame, value)?.map(Value::from)),
			None => Ok(Deferred::Ready(value))
		}}
	});

	let frame = frame.clone();
	sequence(steps)?.then(move |values| {
		let formatted = format::format(&template, &values)
			.map_err(|message| LuaError::runtime(message, &frame))?;
		ready(vec![Value::from(formatted)])
	})
}

pub fn split(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "split")?;
	let separator = check_string(frame, &arguments, 1, "split")?;
	let parts: Vec<Value> = match separator.is_empty() {
		true => string.chars().map(|character| Value::from(character.to_string())).collect(),
		false => string.split(separator.as_str()).map(Value::from).collect()
	};
	Ok(vec![Table::from_values(parts).into()])
}

pub fn starts_with(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "startsWith")?;
	let prefix = check_string(frame, &arguments, 1, "startsWith")?;
	Ok(vec![Value::Boolean(string.starts_with(&prefix))])
}

pub fn ends_with(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "endsWith")?;
	let suffix = check_string(frame, &arguments, 1, "endsWith")?;
	Ok(vec![Value::Boolean(string.ends_with(&suffix))])
}

pub fn trim(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![Value::from(check_string(frame, &arguments, 0, "trim")?.trim())])
}

pub fn trim_start(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![Value::from(check_string(frame, &arguments, 0, "trimStart")?.trim_start())])
}

pub fn trim_end(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![Value::from(check_string(frame, &arguments, 0, "trimEnd")?.trim_end())])
}

fn regex(frame: &StackFrame, arguments: &[Value], function: &str) -> Result<(String, Regex)> {
	let subject = check_string(frame, arguments, 0, function)?;
	let source = check_string(frame, arguments, 1, function)?;
	let regex = Regex::new(&source).map_err(|error|
		bad_argument(frame, 2, function, format!("invalid regular expression: {}", error)))?;
	Ok((subject, regex))
}

/// A match as a table: the whole match and every group in sequence, the
/// position it starts at, the input, and named groups under `groups`.
fn regex_match(subject: &str, regex: &Regex, captures: regex::Captures) -> Value {
	let table = Table::new();
	for (index, group) in captures.iter().enumerate() {
		let value = group.map(|group| Value::from(group.as_str())).unwrap_or_default();
		let _ = table.set(Value::from(index + 1), value);
	}
	if let Some(whole) = captures.get(0) {
		table.set_str("index", Value::from(whole.start() + 1));
	}
	table.set_str("input", Value::from(subject));

	let names: Vec<&str> = regex.capture_names().flatten().collect();
	if !names.is_empty() {
		let groups = Table::new();
		for name in names {
			groups.set_str(name, captures.name(name)
				.map(|group| Value::from(group.as_str())).unwrap_or_default());
		}
		table.set_str("groups", groups.into());
	}
	table.into()
}

pub fn match_regex(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let (subject, regex) = self::regex(frame, &arguments, "matchRegex")?;
	Ok(vec![match regex.captures(&subject) {
		Some(captures) => regex_match(&subject, &regex, captures),
		None => Value::Nil
	}])
}

pub fn match_regex_all(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let (subject, regex) = self::regex(frame, &arguments, "matchRegexAll")?;
	let results = regex.captures_iter(&subject)
		.map(|captures| vec![regex_match(&subject, &regex, captures)])
		.collect();
	Ok(vec![results_iterator("matchRegexAll", results)])
}

pub fn library() -> Table {
	lua_table! {
		byte = Function::sync("byte", byte),
		char = Function::sync("char", char),
		find = Function::sync("find", find),
		format = Function::builtin("format", format),
		gmatch = Function::sync("gmatch", gmatch),
		gsub = Function::builtin("gsub", gsub),
		len = Function::sync("len", len),
		lower = Function::sync("lower", lower),
		upper = Function::sync("upper", upper),
		match = Function::sync("match", r#match),
		rep = Function::sync("rep", rep),
		reverse = Function::sync("reverse", reverse),
		sub = Function::sync("sub", sub),
		split = Function::sync("split", split),
		startsWith = Function::sync("startsWith", starts_with),
		endsWith = Function::sync("endsWith", ends_with),
		trim = Function::sync("trim", trim),
		trimStart = Function::sync("trimStart", trim_start),
		trimEnd = Function::sync("trimEnd", trim_end),
		matchRegex = Function::sync("matchRegex", match_regex),
		matchRegexAll = Function::sync("matchRegexAll", match_regex_all),
		pack = Function::sync("pack", pack::pack),
		unpack = Function::sync("unpack", pack::unpack),
		packsize = Function::sync("packsize", pack::packsize)
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		ast::Context,
		lua_tuple,
		vm::{deferred::Deferred, frame::StackFrame, operators, value::Value}
	};

	fn call(name: &str, arguments: Vec<Value>) -> Result<Vec<Value>, String> {
		let library = super::library();
		let frame = StackFrame::detached(Context::default());
		match operators::call(&frame, &library.get_str(name), arguments) {
			Ok(Deferred::Ready(values)) => Ok(values),
			Ok(Deferred::Pending(_)) => panic!("unexpectedly pending"),
			Err(error) => Err(error.to_string())
		}
	}

	#[test]
	fn test_sub_and_byte() {
		assert_eq!(call("sub", lua_tuple!["hello", 2, 4]).unwrap(), lua_tuple!["ell"]);
		assert_eq!(call("sub", lua_tuple!["hello", -3]).unwrap(), lua_tuple!["llo"]);
		assert_eq!(call("sub", lua_tuple!["hello", 4, 2]).unwrap(), lua_tuple![""]);
		assert_eq!(call("byte", lua_tuple!["AB", 1, 2]).unwrap(), lua_tuple![65, 66]);
		assert_eq!(call("char", lua_tuple![72, 105]).unwrap(), lua_tuple!["Hi"]);
	}

	#[test]
	fn test_find() {
		assert_eq!(call("find", lua_tuple!["hello world", "wor"]).unwrap(), lua_tuple![7, 9]);
		assert_eq!(call("find", lua_tuple!["a.b", ".", 1, true]).unwrap(), lua_tuple![2, 2]);
		assert_eq!(call("find", lua_tuple!["key=value", "(%w+)=(%w+)"]).unwrap(),
			lua_tuple![1, 9, "key", "value"]);
		assert_eq!(call("find", lua_tuple!["abc", "x"]).unwrap(), lua_tuple![()]);
	}

	#[test]
	fn test_match() {
		assert_eq!(call("match", lua_tuple!["2024-01-15", "(%d+)-(%d+)-(%d+)"]).unwrap(),
			lua_tuple!["2024", "01", "15"]);
		assert_eq!(call("match", lua_tuple!["  padded  ", "^%s*(.-)%s*$"]).unwrap(),
			lua_tuple!["padded"]);
	}

	#[test]
	fn test_gsub() {
		assert_eq!(call("gsub", lua_tuple!["hello world", "o", "0"]).unwrap(),
			lua_tuple!["hell0 w0rld", 2]);
		assert_eq!(call("gsub", lua_tuple!["hello world", "(%w+)", "<%1>"]).unwrap(),
			lua_tuple!["<hello> <world>", 2]);
		assert_eq!(call("gsub", lua_tuple!["abc", "", "-"]).unwrap(), lua_tuple!["-a-b-c-", 4]);
		assert_eq!(call("gsub", lua_tuple!["aaa", "a", "b", 2]).unwrap(), lua_tuple!["bba", 2]);

		let names = crate::lua_table! {name = "Lua"};
		assert_eq!(call("gsub", vec![Value::from("hi $name"), Value::from("%$(%w+)"),
			names.into()]).unwrap(), lua_tuple!["hi Lua", 1]);
	}

	#[test]
	fn test_extensions() {
		assert_eq!(call("trim", lua_tuple!["  x  "]).unwrap(), lua_tuple!["x"]);
		assert_eq!(call("startsWith", lua_tuple!["prefix", "pre"]).unwrap(), lua_tuple![true]);
		assert_eq!(call("endsWith", lua_tuple!["prefix", "pre"]).unwrap(), lua_tuple![false]);
		let parts = call("split", lua_tuple!["a,b,c", ","]).unwrap();
		assert_eq!(parts[0].table().unwrap().length(), 3);
	}

	#[test]
	fn test_match_regex() {
		let result = call("matchRegex", lua_tuple!["id: 42", "(\\d+)"]).unwrap();
		let table = result[0].table().unwrap();
		assert_eq!(table.get(&Value::Integer(1)), Value::from("42"));
		assert_eq!(table.get(&Value::Integer(2)), Value::from("42"));
		assert_eq!(table.get_str("index"), Value::Integer(5));
		assert_eq!(call("matchRegex", lua_tuple!["abc", "\\d"]).unwrap(), lua_tuple![()]);
	}

	#[test]
	fn test_format_arguments() {
		assert_eq!(call("format", lua_tuple!["%s=%d", "x", 3]).unwrap(), lua_tuple!["x=3"]);
		assert_eq!(call("rep", lua_tuple!["ab", 3, ","]).unwrap(), lua_tuple!["ab,ab,ab"]);
	}
}
