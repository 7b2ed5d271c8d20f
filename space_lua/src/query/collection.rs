//! Things queries run against.
//!
//! A collection only has to produce its items; the clauses are applied by
//! [apply]. A Lua value is queryable when its metatable has a `__query`
//! function returning the items as a sequence, which is how collections
//! implemented in Rust are exposed, see [into_value]. Any other value is
//! treated as an array of items.

use self::super::{Query, apply};
use crate::{
	error::Result,
	lua_table,
	vm::{
		deferred::Deferred,
		env::Env,
		frame::StackFrame,
		lock,
		operators,
		table::Table,
		value::{Function, Value}
	}
};
use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex}
};

pub trait Queryable: Send + Sync {
	/// Every item, before any clause is applied.
	fn scan(&self, frame: &StackFrame) -> Result<Deferred<'static, Vec<Value>>>;

	/// Runs a query. The default scans and then applies every clause in
	/// memory.
	fn query<'a>(&self, query: &Query<'a>, env: &Env, frame: &StackFrame)
			-> Result<Deferred<'a, Vec<Value>>> {
		let (query, env, frame) = (query.clone(), env.clone(), frame.clone());
		self.scan(&frame)?.shorten().then(move |items| apply(items, query, env, frame))
	}
}

/// A collection of values held in memory.
#[derive(Clone, Debug, Default)]
pub struct ArrayQueryCollection {
	items: Vec<Value>
}

impl ArrayQueryCollection {
	pub fn new(items: Vec<Value>) -> Self {
		Self {items}
	}

	/// The items a plain value stands for: a sequence is its elements, `nil`
	/// and empty tables are nothing, and anything else is a single item.
	pub fn from_value(value: Value) -> Self {
		Self::new(match value.single() {
			Value::Nil => Vec::new(),
			Value::Table(table) if table.length() > 0 => table.array(),
			Value::Table(table) if table.next(&Value::Nil).ok().flatten().is_none() => Vec::new(),
			other => vec![other]
		})
	}
}

impl Queryable for ArrayQueryCollection {
	fn scan(&self, _: &StackFrame) -> Result<Deferred<'static, Vec<Value>>> {
		Ok(Deferred::Ready(self.items.clone()))
	}
}

/// A key in a [KvStore], a path of segments.
pub type Key = Vec<String>;

/// A store of values that can be scanned by key prefix.
pub trait KvStore: Send + Sync {
	/// Every entry whose key starts with `prefix`, in key order.
	fn scan_prefix(&self, prefix: &[String]) -> Result<Deferred<'static, Vec<(Key, Value)>>>;
}

#[derive(Default)]
pub struct MemoryKvStore {
	entries: Mutex<BTreeMap<Key, Value>>
}

impl MemoryKvStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(&self, key: Key, value: Value) {
		lock(&self.entries).insert(key, value);
	}

	pub fn get(&self, key: &[String]) -> Value {
		lock(&self.entries).get(key).cloned().unwrap_or_default()
	}

	pub fn delete(&self, key: &[String]) {
		lock(&self.entries).remove(key);
	}

	pub fn len(&self) -> usize {
		lock(&self.entries).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl KvStore for MemoryKvStore {
	fn scan_prefix(&self, prefix: &[String]) -> Result<Deferred<'static, Vec<(Key, Value)>>> {
		let entries = lock(&self.entries);
		Ok(Deferred::Ready(entries.range(prefix.to_vec()..)
			.take_while(|(key, _)| key.starts_with(prefix))
			.map(|(key, value)| (key.clone(), value.clone()))
			.collect()))
	}
}

/// The values under a key prefix of a store.
pub struct KvQueryCollection {
	store: Arc<dyn KvStore>,
	prefix: Key
}

impl KvQueryCollection {
	pub fn new(store: Arc<dyn KvStore>, prefix: Key) -> Self {
		Self {store, prefix}
	}
}

impl Queryable for KvQueryCollection {
	fn scan(&self, _: &StackFrame) -> Result<Deferred<'static, Vec<Value>>> {
		Ok(self.store.scan_prefix(&self.prefix)?
			.map(|entries| entries.into_iter().map(|(_, value)| value).collect()))
	}
}

/// Exposes a collection to Lua, as an empty table whose metatable's
/// `__query` scans it.
pub fn into_value(collection: Arc<dyn Queryable>) -> Value {
	let metatable = lua_table! {
		__query = Function::builtin("query", move |frame, _| Ok(collection.scan(frame)?
			.map(|items| vec![Table::from_values(items).into()])))
	};
	let table = Table::new();
	table.set_metatable(Some(metatable.arc()));
	table.into()
}

/// The collection a `from` clause names.
pub fn resolve(frame: &StackFrame, value: Value) -> Result<Deferred<'static, Arc<dyn Queryable>>> {
	let value = value.single();
	match value.metamethod("__query") {
		Some(handler) => Ok(operators::call(frame, &handler, vec![value])?.map(|results| {
			let collection: Arc<dyn Queryable> =
				Arc::new(ArrayQueryCollection::from_value(operators::first(results)));
			collection
		})),
		None => Ok(Deferred::Ready(Arc::new(ArrayQueryCollection::from_value(value))))
	}
}

#[cfg(test)]
mod tests {
	use super::{ArrayQueryCollection, KvStore, MemoryKvStore, Queryable};
	use crate::{
		ast::Context,
		lua_table, lua_tuple,
		vm::{deferred::Deferred, frame::StackFrame, value::Value}
	};

	fn key(parts: &[&str]) -> Vec<String> {
		parts.iter().map(|part| part.to_string()).collect()
	}

	#[test]
	fn test_items_of_plain_values() {
		let frame = StackFrame::detached(Context::default());
		let scan = |value: Value| match ArrayQueryCollection::from_value(value).scan(&frame) {
			Ok(Deferred::Ready(items)) => items,
			_ => panic!("scanning memory can't fail or suspend")
		};

		assert_eq!(scan(lua_table! {1, 2}.into()), lua_tuple![1, 2]);
		assert_eq!(scan(Value::Nil), lua_tuple![]);
		assert_eq!(scan(lua_table! {}.into()), lua_tuple![]);
		assert_eq!(scan(Value::Integer(5)), lua_tuple![5]);
		assert_eq!(scan(lua_table! {name = "x"}.into()).len(), 1);
	}

	#[test]
	fn test_memory_store_scans_by_prefix() {
		let store = MemoryKvStore::new();
		store.set(key(&["page", "a"]), Value::from(1));
		store.set(key(&["page", "b"]), Value::from(2));
		store.set(key(&["tag", "a"]), Value::from(3));
		store.set(key(&["pages"]), Value::from(4));

		let entries = match store.scan_prefix(&key(&["page"])) {
			Ok(Deferred::Ready(entries)) => entries,
			_ => panic!("scanning memory can't fail or suspend")
		};
		let values: Vec<Value> = entries.into_iter().map(|(_, value)| value).collect();
		assert_eq!(values, lua_tuple![1, 2]);

		store.delete(&key(&["page", "a"]));
		assert_eq!(store.get(&key(&["page", "a"])), Value::Nil);
		assert_eq!(store.len(), 3);
	}
}
