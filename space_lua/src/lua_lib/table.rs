//! The `table` library, with the `keys`, `includes`, `find` and `select`
//! extensions.

use self::super::{argument, bad_argument, check_table, optional_integer, ready};
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

fn concat_piece(frame: &StackFrame, value: Value, index: i64) -> Result<String> {
	match value {
		Value::String(string) => Ok(string.to_string()),
		Value::Integer(_) | Value::Float(_) => Ok(value.to_string()),
		other => Err(LuaError::runtime(format!(
			"invalid value ({}) at index {} in table for 'concat'", other.type_name(), index), frame))
	}
}

pub fn concat(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "concat")?;
	let separator = match argument(&arguments, 1) {
		Value::Nil => String::new(),
		other => other.coerce_to_string().ok_or_else(|| bad_argument(frame, 2, "concat",
			format!("string expected, got {}", other.type_name())))?
	};
	let first = optional_integer(frame, &arguments, 2, "concat", 1)?;
	let last = optional_integer(frame, &arguments, 3, "concat", table.length() as i64)?;

	let pieces = (first..=last)
		.map(|index| concat_piece(frame, table.get(&Value::Integer(index)), index))
		.collect::<Result<Vec<_>>>()?;
	Ok(vec![Value::from(pieces.join(&separator))])
}

pub fn insert(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "insert")?;
	let length = table.length();
	match arguments.len() {
		2 => table.insert(length + 1, arguments[1].clone()),
		3 => {
			let position = optional_integer(frame, &arguments, 1, "insert", 0)?;
			if position < 1 || position as u64 > length as u64 + 1 {
				return Err(bad_argument(frame, 2, "insert", "position out of bounds"))
			}
			table.insert(position as usize, arguments[2].clone());
		},
		_ => return Err(LuaError::runtime("wrong number of arguments to 'insert'", frame))
	}
	Ok(Vec::new())
}

pub fn remove(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "remove")?;
	let length = table.length();
	let position = optional_integer(frame, &arguments, 1, "remove", length as i64)?;

	// Removing from an empty table is allowed at positions 0 and 1.
	if length == 0 && (position == 0 || position == 1) {
		return Ok(vec![table.get(&Value::Integer(position))])
	}
	if position < 1 || position as u64 > length as u64 + 1 {
		return Err(LuaError::runtime("position out of bounds", frame))
	}
	Ok(vec![table.remove(position as usize)])
}

/// Whether `left` sorts before `right`.
fn sorts_before(frame: &StackFrame, comparator: &Value, left: Value, right: Value)
		-> Result<Deferred<'static, bool>> {
	match comparator {
		Value::Nil => operators::less_than(frame, left, right),
		comparator => Ok(operators::call(frame, comparator, vec![left, right])?
			.map(|results| operators::first(results).coerce_to_bool()))
	}
}

/// Sorts the sequence part of a table in place. A comparator may suspend,
/// so this is a binary insertion sort that awaits every comparison.
pub fn sort(frame: &StackFrame, arguments: Vec<Value>) -> Result<Deferred<'static, Vec<Value>>> {
	let table = check_table(frame, &arguments, 0, "sort")?;
	let comparator = argument(&arguments, 1);
	if !comparator.is_nil() && !operators::callable(&comparator) {
		return Err(bad_argument(frame, 2, "sort",
			format!("function expected, got {}", comparator.type_name())))
	}

	let frame = frame.clone();
	Deferred::poll_once(async move {
		let mut sorted: Vec<Value> = Vec::new();
		for value in table.array() {
			let (mut low, mut high) = (0, sorted.len());
			while low < high {
				let middle = (low + high) / 2;
				let before = sorts_before(&frame, &comparator, value.clone(), sorted[middle].clone())?
					.resolve().await?;
				if before {high = middle} else {low = middle + 1}
			}
			sorted.insert(low, value);
		}

		for (index, value) in sorted.into_iter().enumerate() {
			let _ = table.set(Value::from(index + 1), value);
		}
		Ok(Vec::new())
	})
}

pub fn pack(_: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let count = arguments.len();
	let table = Table::new();
	for (index, value) in arguments.into_iter().enumerate() {
		let _ = table.set(Value::from(index + 1), value);
	}
	table.set_str("n", Value::from(count));
	Ok(vec![table.into()])
}

pub fn unpack(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "unpack")?;
	let first = optional_integer(frame, &arguments, 1, "unpack", 1)?;
	let last = optional_integer(frame, &arguments, 2, "unpack", table.length() as i64)?;
	if first <= last && (last - first) as u64 >= 1 << 24 {
		return Err(LuaError::runtime("too many results to unpack", frame))
	}
	Ok((first..=last).map(|index| table.get(&Value::Integer(index))).collect())
}

pub fn keys(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let table = check_table(frame, &arguments, 0, "keys")?;
	Ok(vec![Table::from_values(table.keys()).into()])
}

pub fn includes(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let needle = argument(&arguments, 1);
	match argument(&arguments, 0) {
		Value::Nil => Ok(vec![Value::Boolean(false)]),
		Value::Table(table) => Ok(vec![Value::Boolean(
			table.pairs().into_iter().any(|(_, value)| value == needle))]),
		other => Err(bad_argument(frame, 1, "includes",
			format!("table expected, got {}", other.type_name())))
	}
}

/// The first element at or after `from` that `predicate` holds for, as an
/// index and value pair.
pub fn find(frame: &StackFrame, arguments: Vec<Value>) -> Result<Deferred<'static, Vec<Value>>> {
	let table = match argument(&arguments, 0) {
		Value::Nil => return ready(vec![Value::Nil]),
		_ => check_table(frame, &arguments, 0, "find")?
	};
	let predicate = argument(&arguments, 1);
	let from = optional_integer(frame, &arguments, 2, "find", 1)?.max(1);

	let frame = frame.clone();
	Deferred::poll_once(async move {
		let length = table.length() as i64;
		for index in from..=length {
			let value = table.get(&Value::Integer(index));
			let matched = operators::call(&frame, &predicate, vec![value.clone()])?
				.resolve().await?;
			if operators::first(matched).coerce_to_bool() {
				return Ok(vec![Value::Integer(index), value])
			}
		}
		Ok(vec![Value::Nil])
	})
}

/// A new table holding only the given keys of a table. The keys can also be
/// passed as a single sequence.
pub fn select(frame: &StackFrame, mut arguments: Vec<Value>)
		-> Result<Deferred<'static, Vec<Value>>> {
	let source = argument(&arguments, 0);
	let keys = match arguments.get(1) {
		Some(Value::Table(keys)) => keys.array(),
		_ if arguments.is_empty() => Vec::new(),
		_ => arguments.split_off(1)
	};

	let owned = frame.clone();
	let wanted = keys.clone();
	let steps = wanted.into_iter().map(move |key| {
		let (frame, source) = (owned.clone(), source.clone());
		move || operators::index(&frame, &source, key)
	});

	let frame = frame.clone();
	sequence(steps)?.then(move |values| {
		let selected = Table::new();
		for (key, value) in keys.into_iter().zip(values) {
			selected.set(key, value).map_err(|message| LuaError::runtime(message, &frame))?;
		}
		ready(vec![selected.into()])
	})
}

pub fn library() -> Table {
	lua_table! {
		concat = Function::sync("concat", concat),
		insert = Function::sync("insert", insert),
		remove = Function::sync("remove", remove),
		sort = Function::builtin("sort", sort),
		pack = Function::sync("pack", pack),
		unpack = Function::sync("unpack", unpack),
		keys = Function::sync("keys", keys),
		includes = Function::sync("includes", includes),
		find = Function::builtin("find", find),
		select = Function::builtin("select", select)
	}
}
