//! Lexical scopes.
//!
//! Every block gets its own scope, chained to the scope it appears in. The
//! root of every chain is the globals table, which is also what `_G` refers
//! to, so a name no scope declares reads and writes a global.

use self::super::{lock, table::Table, value::Value};
use hashbrown::HashMap;
use std::{
	fmt::{Debug, Formatter, Result as FMTResult},
	sync::{Arc, Mutex}
};

#[derive(Clone)]
pub struct Env(Arc<Scope>);

struct Scope {
	parent: Option<Env>,
	globals: Arc<Table>,
	locals: Mutex<HashMap<String, Local>>
}

struct Local {
	value: Value,
	/// Declared `<const>` or `<close>`.
	constant: bool
}

impl Env {
	pub fn new(globals: Arc<Table>) -> Self {
		Self(Arc::new(Scope {parent: None, globals, locals: Mutex::default()}))
	}

	pub fn child(&self) -> Self {
		Self(Arc::new(Scope {
			parent: Some(self.clone()),
			globals: self.0.globals.clone(),
			locals: Mutex::default()
		}))
	}

	pub fn globals(&self) -> &Arc<Table> {
		&self.0.globals
	}

	/// Reads a name, falling back to the globals table.
	pub fn get(&self, name: &str) -> Value {
		self.get_local(name).unwrap_or_else(|| self.0.globals.get_str(name))
	}

	/// Reads a name declared by this scope or one it's nested in.
	pub fn get_local(&self, name: &str) -> Option<Value> {
		let mut scope = Some(self);
		while let Some(env) = scope {
			if let Some(local) = lock(&env.0.locals).get(name) {
				return Some(local.value.clone())
			}
			scope = env.0.parent.as_ref();
		}
		None
	}

	/// Declares a local in this scope, shadowing any outer one.
	pub fn set_local(&self, name: impl Into<String>, value: Value) {
		lock(&self.0.locals).insert(name.into(), Local {value: value.single(), constant: false});
	}

	pub fn set_local_const(&self, name: impl Into<String>, value: Value) {
		lock(&self.0.locals).insert(name.into(), Local {value: value.single(), constant: true});
	}

	/// Binds the extra arguments of a vararg function, read back by `...`.
	pub fn set_varargs(&self, values: Vec<Value>) {
		lock(&self.0.locals).insert("...".to_owned(),
			Local {value: Value::MultiResult(values), constant: true});
	}

	/// Assigns to the innermost declaration of `name`, or to the global of
	/// that name if there is none.
	pub fn assign(&self, name: &str, value: Value) -> Result<(), String> {
		let mut scope = Some(self);
		while let Some(env) = scope {
			if let Some(local) = lock(&env.0.locals).get_mut(name) {
				if local.constant {
					return Err(format!("attempt to assign to const variable '{}'", name))
				}
				local.value = value.single();
				return Ok(())
			}
			scope = env.0.parent.as_ref();
		}

		self.0.globals.set_str(name, value);
		Ok(())
	}

	/// Every local name visible from this scope, innermost first.
	pub fn keys(&self) -> Vec<String> {
		let mut keys = Vec::new();
		let mut scope = Some(self);
		while let Some(env) = scope {
			let names: Vec<String> = lock(&env.0.locals).keys()
				.filter(|key| !keys.contains(*key))
				.cloned()
				.collect();
			keys.extend(names);
			scope = env.0.parent.as_ref();
		}
		keys
	}
}

impl Debug for Env {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		f.debug_list().entries(self.keys()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::Env;
	use crate::vm::{table::Table, value::Value};

	#[test]
	fn test_shadowing() {
		let globals = Table::new().arc();
		let root = Env::new(globals.clone());
		root.set_local("x", Value::Integer(1));

		let inner = root.child();
		inner.set_local("x", Value::Integer(2));
		assert_eq!(inner.get("x"), Value::Integer(2));
		assert_eq!(root.get("x"), Value::Integer(1));

		inner.assign("x", Value::Integer(3)).unwrap();
		assert_eq!(inner.get("x"), Value::Integer(3));
		assert_eq!(root.get("x"), Value::Integer(1));
	}

	#[test]
	fn test_globals_fallback() {
		let globals = Table::new().arc();
		let env = Env::new(globals.clone()).child();
		env.assign("g", Value::from("global")).unwrap();
		assert_eq!(globals.get_str("g"), Value::from("global"));
		assert_eq!(env.get("g"), Value::from("global"));
		assert_eq!(env.get_local("g"), None);
	}

	#[test]
	fn test_const_assignment() {
		let env = Env::new(Table::new().arc());
		env.set_local_const("c", Value::Nil);
		assert_eq!(env.child().assign("c", Value::Integer(1)),
			Err("attempt to assign to const variable 'c'".to_owned()));
	}

	#[test]
	fn test_keys() {
		let env = Env::new(Table::new().arc());
		env.set_local("a", Value::Nil);
		let child = env.child();
		child.set_local("b", Value::Nil);
		child.set_local("a", Value::Nil);
		let mut keys = child.keys();
		keys.sort();
		assert_eq!(keys, vec!["a", "b"]);
	}
}
