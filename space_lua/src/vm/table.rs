//! The hybrid table: a 1-based array segment and an insertion ordered hash
//! segment.
//!
//! Integer keys starting at one live in the array segment for as long as
//! they stay dense from its end; everything else lives in the hash segment.
//! Removing a hash entry leaves a tombstone behind so that `next` can keep
//! iterating while a loop clears the fields it visits.

use self::super::{lock, value::Value};
use hashbrown::HashMap;
use std::{
	fmt::{Debug, Display, Formatter, Result as FMTResult},
	sync::{Arc, Mutex}
};

/// Compaction only starts past this many tombstones.
const TOMBSTONE_SLACK: usize = 8;

/// The key given to `next` was never in the table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InvalidKey;

impl Display for InvalidKey {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		write!(f, "invalid key to 'next'")
	}
}

#[derive(Default)]
pub struct Table {
	data: Mutex<TableData>,
	metatable: Mutex<Option<Arc<Table>>>
}

#[derive(Default)]
struct TableData {
	/// Values for the keys `1..=array.len()`. May contain holes, but never
	/// ends with one.
	array: Vec<Value>,
	/// The number of values before the first hole.
	border: usize,
	map: HashMap<Value, usize>,
	entries: Vec<(Value, Value)>,
	tombstones: usize
}

impl TableData {
	fn array_index(&self, key: &Value) -> Option<usize> {
		match key {
			Value::Integer(index) if *index >= 1 && (*index as u64) <= self.array.len() as u64 =>
				Some(*index as usize - 1),
			_ => None
		}
	}

	fn get(&self, key: &Value) -> Value {
		match self.array_index(key) {
			Some(index) => self.array[index].clone(),
			None => self.map.get(key)
				.map(|&index| self.entries[index].1.clone())
				.unwrap_or_default()
		}
	}

	fn set_array(&mut self, index: usize, value: Value) {
		let nil = value.is_nil();
		self.array[index] = value;

		if nil {
			self.border = self.border.min(index);
			while matches!(self.array.last(), Some(Value::Nil)) {self.array.pop();}
		} else if index == self.border {
			self.advance_border();
		}
	}

	fn advance_border(&mut self) {
		while self.array.get(self.border).is_some_and(|value| !value.is_nil()) {
			self.border += 1;
		}
	}

	/// Appends at `array.len() + 1`, then pulls any directly following keys
	/// out of the hash segment.
	fn push(&mut self, value: Value) {
		self.remove_hash(&Value::Integer(self.array.len() as i64 + 1));
		self.array.push(value);

		loop {
			let key = Value::Integer(self.array.len() as i64 + 1);
			match self.map.get(&key).map(|&index| self.entries[index].1.clone()) {
				Some(value) if !value.is_nil() => {
					self.remove_hash(&key);
					self.array.push(value);
				},
				_ => break
			}
		}

		self.advance_border();
	}

	fn remove_hash(&mut self, key: &Value) {
		if let Some(&index) = self.map.get(key) {
			let slot = &mut self.entries[index].1;
			if !slot.is_nil() {
				*slot = Value::Nil;
				self.tombstones += 1;
			}
		}
	}

	fn set_hash(&mut self, key: Value, value: Value) {
		if value.is_nil() {
			return self.remove_hash(&key)
		}

		match self.map.get(&key) {
			Some(&index) => {
				let slot = &mut self.entries[index].1;
				if slot.is_nil() {self.tombstones -= 1}
				*slot = value;
			},
			None => {
				if self.tombstones > TOMBSTONE_SLACK && self.tombstones * 2 > self.entries.len() {
					self.compact();
				}
				self.map.insert(key.clone(), self.entries.len());
				self.entries.push((key, value));
			}
		}
	}

	fn compact(&mut self) {
		self.entries.retain(|(_, value)| !value.is_nil());
		self.map = self.entries.iter().enumerate()
			.map(|(index, (key, _))| (key.clone(), index))
			.collect();
		self.tombstones = 0;
	}

	/// The first live hash entry at or after `from`.
	fn next_entry(&self, from: usize) -> Option<(Value, Value)> {
		self.entries[from.min(self.entries.len())..].iter()
			.find(|(_, value)| !value.is_nil())
			.cloned()
	}

	/// The first present array value at or after `from`, else the first live
	/// hash entry.
	fn next_from_array(&self, from: usize) -> Option<(Value, Value)> {
		self.array.iter().enumerate().skip(from)
			.find(|(_, value)| !value.is_nil())
			.map(|(index, value)| (Value::Integer(index as i64 + 1), value.clone()))
			.or_else(|| self.next_entry(0))
	}
}

impl Table {
	pub fn new() -> Self {
		Self::default()
	}

	/// A sequence holding `values` at `1..=values.len()`.
	pub fn from_values(values: Vec<Value>) -> Self {
		let table = Self::new();
		{
			let mut data = lock(&table.data);
			data.array.extend(values.into_iter().map(Value::single));
			while matches!(data.array.last(), Some(Value::Nil)) {data.array.pop();}
			data.advance_border();
		}
		table
	}

	pub fn arc(self) -> Arc<Self> {
		Arc::new(self)
	}

	/// Raw read, no metamethods involved.
	pub fn get(&self, key: &Value) -> Value {
		let key = key.clone().into_key();
		lock(&self.data).get(&key)
	}

	pub fn get_str(&self, key: &str) -> Value {
		lock(&self.data).get(&Value::from(key))
	}

	/// Raw write. Assigning nil removes the key.
	pub fn set(&self, key: Value, value: Value) -> Result<(), &'static str> {
		let key = match key.into_key() {
			Value::Nil => return Err("table index is nil"),
			Value::Float(float) if float.is_nan() => return Err("table index is NaN"),
			key => key
		};
		let value = value.single();
		let mut data = lock(&self.data);

		match data.array_index(&key) {
			Some(index) => data.set_array(index, value),
			None => match key {
				Value::Integer(index) if !value.is_nil()
					&& index as u64 == data.array.len() as u64 + 1 => data.push(value),
				key => data.set_hash(key, value)
			}
		}

		Ok(())
	}

	pub fn set_str(&self, key: &str, value: Value) {
		lock(&self.data).set_hash(Value::from(key), value.single())
	}

	/// The border of the array segment: the number of values before the
	/// first hole.
	pub fn length(&self) -> usize {
		lock(&self.data).border
	}

	/// The entry following `key`, the array segment first. `nil` starts the
	/// traversal.
	pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, InvalidKey> {
		let key = key.clone().into_key();
		let data = lock(&self.data);

		if key.is_nil() {
			return Ok(data.next_from_array(0))
		}
		if let Some(index) = data.array_index(&key) {
			return Ok(data.next_from_array(index + 1))
		}
		match (data.map.get(&key), &key) {
			(Some(&index), _) => Ok(data.next_entry(index + 1)),
			// The array segment shrank under a running traversal.
			(None, Value::Integer(index)) if *index >= 1 => Ok(data.next_entry(0)),
			(None, _) => Err(InvalidKey)
		}
	}

	/// Every key value pair, in traversal order.
	pub fn pairs(&self) -> Vec<(Value, Value)> {
		let data = lock(&self.data);
		data.array.iter().enumerate()
			.filter(|(_, value)| !value.is_nil())
			.map(|(index, value)| (Value::Integer(index as i64 + 1), value.clone()))
			.chain(data.entries.iter().filter(|(_, value)| !value.is_nil()).cloned())
			.collect()
	}

	pub fn keys(&self) -> Vec<Value> {
		self.pairs().into_iter().map(|(key, _)| key).collect()
	}

	/// The values at `1..=length()`.
	pub fn array(&self) -> Vec<Value> {
		let data = lock(&self.data);
		data.array[..data.border].to_vec()
	}

	/// Inserts `value` at `position`, moving the values after it up by one.
	pub fn insert(&self, position: usize, value: Value) {
		let length = self.length();
		for index in (position..=length).rev() {
			let moved = self.get(&Value::from(index));
			let _ = self.set(Value::from(index + 1), moved);
		}
		let _ = self.set(Value::from(position), value);
	}

	/// Removes the value at `position`, moving the values after it down.
	pub fn remove(&self, position: usize) -> Value {
		let length = self.length();
		let removed = self.get(&Value::from(position));
		for index in position..length {
			let moved = self.get(&Value::from(index + 1));
			let _ = self.set(Value::from(index), moved);
		}
		if position <= length {
			let _ = self.set(Value::from(length), Value::Nil);
		}
		removed
	}

	pub fn metatable(&self) -> Option<Arc<Table>> {
		lock(&self.metatable).clone()
	}

	pub fn set_metatable(&self, metatable: Option<Arc<Table>>) {
		*lock(&self.metatable) = metatable;
	}

	pub(super) fn write(&self, f: &mut Formatter, seen: &mut Vec<*const Table>) -> FMTResult {
		let address = self as *const Table;
		if seen.contains(&address) {
			return write!(f, "<circular reference>")
		}
		seen.push(address);

		let border = self.length();
		write!(f, "{{")?;
		for (index, (key, value)) in self.pairs().into_iter().enumerate() {
			if index != 0 {write!(f, ", ")?}
			match key {
				Value::Integer(position) if position >= 1 && position as usize <= border => (),
				Value::String(name) if is_identifier(&name) => write!(f, "{} = ", name)?,
				key => {
					write!(f, "[")?;
					key.write(f, seen)?;
					write!(f, "] = ")?;
				}
			}
			value.write(f, seen)?;
		}
		write!(f, "}}")?;

		seen.pop();
		Ok(())
	}
}

fn is_identifier(name: &str) -> bool {
	let mut characters = name.chars();
	characters.next().is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
		&& characters.all(|character| character.is_ascii_alphanumeric() || character == '_')
}

impl Debug for Table {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		self.write(f, &mut Vec::new())
	}
}

#[cfg(test)]
mod tests {
	use super::{InvalidKey, Table};
	use crate::vm::value::Value;

	#[test]
	fn test_set_get() {
		let table = Table::new();
		table.set(Value::from("name"), Value::from("x")).unwrap();
		table.set(Value::Integer(1), Value::Boolean(true)).unwrap();
		table.set(Value::Float(2.5), Value::Integer(3)).unwrap();

		assert_eq!(table.get(&Value::from("name")), Value::from("x"));
		assert_eq!(table.get(&Value::Float(1.0)), Value::Boolean(true));
		assert_eq!(table.get(&Value::Float(2.5)), Value::Integer(3));

		table.set(Value::from("name"), Value::Nil).unwrap();
		assert_eq!(table.get(&Value::from("name")), Value::Nil);
		assert_eq!(table.keys().len(), 2);
	}

	#[test]
	fn test_invalid_keys() {
		let table = Table::new();
		assert_eq!(table.set(Value::Nil, Value::Integer(1)), Err("table index is nil"));
		assert_eq!(table.set(Value::Float(f64::NAN), Value::Integer(1)),
			Err("table index is NaN"));
	}

	#[test]
	fn test_length_and_holes() {
		let table = Table::from_values(vec![Value::Integer(1), Value::Integer(2),
			Value::Integer(3)]);
		assert_eq!(table.length(), 3);

		table.set(Value::Integer(2), Value::Nil).unwrap();
		assert_eq!(table.length(), 1);
		assert_eq!(table.get(&Value::Integer(3)), Value::Integer(3));

		table.set(Value::Integer(2), Value::Integer(20)).unwrap();
		assert_eq!(table.length(), 3);
	}

	#[test]
	fn test_out_of_order_migrates() {
		let table = Table::new();
		table.set(Value::Integer(3), Value::from("c")).unwrap();
		table.set(Value::Integer(2), Value::from("b")).unwrap();
		assert_eq!(table.length(), 0);
		table.set(Value::Integer(1), Value::from("a")).unwrap();
		assert_eq!(table.length(), 3);
		assert_eq!(table.array(), vec![Value::from("a"), Value::from("b"), Value::from("c")]);
	}

	#[test]
	fn test_next_traversal() {
		let table = Table::from_values(vec![Value::Integer(10), Value::Integer(20)]);
		table.set_str("x", Value::Integer(30));

		let mut key = Value::Nil;
		let mut seen = Vec::new();
		while let Some((next, value)) = table.next(&key).unwrap() {
			seen.push(value);
			key = next;
		}
		assert_eq!(seen, vec![Value::Integer(10), Value::Integer(20), Value::Integer(30)]);
		assert_eq!(table.next(&Value::from("missing")), Err(InvalidKey));
	}

	#[test]
	fn test_clearing_while_traversing() {
		let table = Table::from_values(vec![Value::Integer(1), Value::Integer(2)]);
		table.set_str("a", Value::Integer(3));
		table.set_str("b", Value::Integer(4));

		let mut key = Value::Nil;
		let mut visited = 0;
		while let Some((next, _)) = table.next(&key).unwrap() {
			table.set(next.clone(), Value::Nil).unwrap();
			visited += 1;
			key = next;
		}
		assert_eq!(visited, 4);
		assert!(table.pairs().is_empty());
	}

	#[test]
	fn test_insert_remove() {
		let table = Table::from_values(vec![Value::Integer(1), Value::Integer(3)]);
		table.insert(2, Value::Integer(2));
		assert_eq!(table.array(), vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
		assert_eq!(table.remove(1), Value::Integer(1));
		assert_eq!(table.array(), vec![Value::Integer(2), Value::Integer(3)]);
	}

	#[test]
	fn test_compaction_keeps_order() {
		let table = Table::new();
		for index in 0..20 {
			table.set_str(&format!("k{}", index), Value::Integer(index));
		}
		for index in 0..15 {
			table.set_str(&format!("k{}", index), Value::Nil);
		}
		table.set_str("last", Value::Integer(99));
		let keys: Vec<_> = table.keys().iter().map(ToString::to_string).collect();
		assert_eq!(keys, vec!["k15", "k16", "k17", "k18", "k19", "last"]);
	}

	#[test]
	fn test_display_keys() {
		let table = Table::from_values(vec![Value::Integer(1)]);
		table.set_str("not an identifier", Value::Boolean(true));
		table.set(Value::Integer(5), Value::from("five")).unwrap();
		assert_eq!(format!("{:?}", table), "{1, [not an identifier] = true, [5] = five}");
	}
}
