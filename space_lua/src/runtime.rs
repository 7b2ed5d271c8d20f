//! Everything needed to run source text, in one place.

use crate::{
	ast,
	error::{LuaError, Result},
	lua_lib::standard_globals,
	query::Config,
	vm::{
		convert::HostFunction,
		deferred::Deferred,
		env::Env,
		eval,
		frame::{FileLoader, Output, StackFrame, ThreadState},
		operators,
		table::Table,
		value::{Function, Value}
	}
};
use log::debug;
use std::sync::Arc;

/// A globals table with the standard library and host functions, plus the
/// settings every evaluation started from it shares.
///
/// Each call to [execute](Self::execute) gets its own thread state, so
/// evaluations don't share a close stack. They do share the globals table.
pub struct Runtime {
	globals: Arc<Table>,
	context: Arc<Table>,
	config: Arc<Config>,
	loader: Arc<FileLoader>,
	output: Option<Arc<Output>>
}

impl Runtime {
	pub fn new() -> Self {
		Self {
			globals: standard_globals(),
			context: Table::new().arc(),
			config: Arc::default(),
			loader: Arc::new(|path: &str| std::fs::read_to_string(path)),
			output: None
		}
	}

	pub fn globals(&self) -> &Arc<Table> {
		&self.globals
	}

	/// Sets the table Lua functions see as `_CTX`.
	pub fn with_context(self, context: Arc<Table>) -> Self {
		Self {context, ..self}
	}

	pub fn with_config(self, config: Config) -> Self {
		Self {config: Arc::new(config), ..self}
	}

	/// Sets how `dofile` reads files.
	pub fn with_loader(self, loader: Arc<FileLoader>) -> Self {
		Self {loader, ..self}
	}

	/// Sets where `print` writes, standard output by default.
	pub fn with_output(self, output: Arc<Output>) -> Self {
		Self {output: Some(output), ..self}
	}

	/// Makes a host function callable from Lua under a dotted path, such as
	/// `space.readPage`. Missing namespace tables are created.
	pub fn register_host(&self, path: &str, function: HostFunction) -> Result<()> {
		debug!("registering host function {} as {}", function.name(), path);
		self.register_raw(path, Value::Function(Function::Host(Arc::new(function))))
	}

	/// Sets a value under a dotted path of the globals table.
	pub fn register_raw(&self, path: &str, value: Value) -> Result<()> {
		let mut parts = path.split('.').peekable();
		let mut table = self.globals.clone();
		while let Some(part) = parts.next() {
			if parts.peek().is_none() {
				table.set_str(part, value);
				return Ok(())
			}

			table = match table.get_str(part) {
				Value::Table(inner) => inner,
				Value::Nil => {
					let inner = Table::new().arc();
					table.set_str(part, Value::Table(inner.clone()));
					inner
				},
				other => return Err(LuaError::Host(format!(
					"cannot register '{}', '{}' is a {} value", path, part, other.type_name())))
			};
		}
		Err(LuaError::Host("cannot register an empty path".to_owned()))
	}

	/// A frame of a new thread.
	pub fn frame(&self) -> StackFrame {
		let thread = ThreadState::new(self.globals.clone(), self.context.clone(),
			self.config.clone(), self.loader.clone());
		let thread = match &self.output {
			Some(output) => thread.with_output(output.clone()),
			None => thread
		};
		StackFrame::new(Arc::new(thread))
	}

	/// Compiles a chunk into a function over the globals table.
	pub fn load(&self, source: &str, reference: Option<&str>) -> Result<Function> {
		let block = ast::parse(source, reference)?;
		Ok(eval::chunk(block, Env::new(self.globals.clone())))
	}

	fn start(&self, function: Function) -> Result<Deferred<'static, Vec<Value>>> {
		let frame = self.frame();
		operators::call_function(&frame, &function, Vec::new())
	}

	/// Runs a chunk, returning what it returns.
	pub async fn execute(&self, source: &str, reference: Option<&str>) -> Result<Vec<Value>> {
		let function = self.load(source, reference)?;
		self.start(function)?.resolve().await
	}

	/// Evaluates a single expression.
	pub async fn evaluate(&self, source: &str, reference: Option<&str>) -> Result<Value> {
		let block = ast::parse_expression(source, reference)?;
		let function = eval::chunk(block, Env::new(self.globals.clone()));
		Ok(operators::first(self.start(function)?.resolve().await?))
	}

	/// Runs a chunk that doesn't suspend. A chunk that calls an asynchronous
	/// host function fails, as nothing here could wait for it.
	pub fn execute_sync(&self, source: &str, reference: Option<&str>) -> Result<Vec<Value>> {
		let function = self.load(source, reference)?;
		match self.start(function)? {
			Deferred::Ready(values) => Ok(values),
			Deferred::Pending(_) => Err(LuaError::Host(
				"evaluation suspended on an asynchronous host function, use execute".to_owned()))
		}
	}
}

impl Default for Runtime {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::Runtime;
	use crate::{
		lua_tuple,
		vm::{convert::HostFunction, value::Value}
	};
	use serde_json::json;
	use std::sync::{Arc, Mutex};

	#[test]
	fn test_register_namespaces() {
		let runtime = Runtime::new();
		runtime.register_host("space.math.double", HostFunction::sync("double",
			|arguments| Ok(json!(arguments[0].as_i64().unwrap_or(0) * 2)))).unwrap();
		assert_eq!(runtime.execute_sync("return space.math.double(21)", None).unwrap(),
			lua_tuple![42]);

		runtime.register_raw("answer", Value::Integer(42)).unwrap();
		assert!(runtime.register_raw("answer.nested", Value::Nil).is_err());
	}

	#[test]
	fn test_output_sink() {
		let lines = Arc::new(Mutex::new(Vec::new()));
		let sink = lines.clone();
		let runtime = Runtime::new()
			.with_output(Arc::new(move |line: &str| sink.lock().unwrap().push(line.to_owned())));
		runtime.execute_sync("print('a', 1) print(nil)", None).unwrap();
		assert_eq!(*lines.lock().unwrap(), vec!["a\t1", "nil"]);
	}

	#[test]
	fn test_suspending_needs_execute() {
		let runtime = Runtime::new();
		runtime.register_host("later", HostFunction::asynchronous("later", |_| async {
			tokio::task::yield_now().await;
			Ok::<_, String>(json!("done"))
		})).unwrap();
		assert!(runtime.execute_sync("return later()", None).is_err());
	}

	#[tokio::test]
	async fn test_execute_awaits_host_functions() {
		let runtime = Runtime::new();
		runtime.register_host("later", HostFunction::asynchronous("later", |_| async {
			tokio::task::yield_now().await;
			Ok::<_, String>(json!("done"))
		})).unwrap();
		assert_eq!(runtime.execute("return later() .. '!'", None).await.unwrap(),
			lua_tuple!["done!"]);
		assert_eq!(runtime.evaluate("1 + 2", None).await.unwrap(), Value::Integer(3));
	}
}
