//! Call frames, thread state and the close stack.
//!
//! A [StackFrame] links to the frame that called it, for diagnostics, and
//! shares a [ThreadState] with every other frame of the same evaluation.
//! The thread state owns the close stack: every `<close>` value pending
//! cleanup, in declaration order. Constructs that own to-be-closed values
//! record the stack's length on entry (a mark) and close everything above
//! it on exit, however they exit.

use self::super::{
	deferred::Deferred,
	lock,
	operators,
	table::Table,
	value::Value
};
use crate::{ast::Context, error::{LuaError, Result}, query::Config};
use log::debug;
use std::{
	fmt::{Debug, Formatter, Result as FMTResult},
	io,
	sync::{Arc, Mutex}
};

/// How deep calls may nest before the evaluator gives up.
pub const MAX_CALL_DEPTH: usize = 200;

/// Reads the source of a chunk for `dofile`.
pub type FileLoader = dyn Fn(&str) -> io::Result<String> + Send + Sync;

/// Receives every line `print` writes.
pub type Output = dyn Fn(&str) + Send + Sync;

/// State shared by every frame of one evaluation.
pub struct ThreadState {
	globals: Arc<Table>,
	/// Exposed to Lua functions as `_CTX`.
	thread_local: Arc<Table>,
	config: Arc<Config>,
	loader: Arc<FileLoader>,
	output: Arc<Output>,
	close_stack: Mutex<Vec<CloseEntry>>
}

impl ThreadState {
	pub fn new(globals: Arc<Table>, thread_local: Arc<Table>, config: Arc<Config>,
			loader: Arc<FileLoader>) -> Self {
		Self {
			globals, thread_local, config, loader,
			output: Arc::new(|line: &str| println!("{}", line)),
			close_stack: Mutex::default()
		}
	}

	pub fn with_output(self, output: Arc<Output>) -> Self {
		Self {output, ..self}
	}
}

struct CloseEntry {
	value: Value,
	name: String,
	context: Context
}

#[derive(Clone)]
pub struct StackFrame {
	context: Option<Context>,
	parent: Option<Arc<StackFrame>>,
	depth: usize,
	thread: Arc<ThreadState>
}

impl StackFrame {
	pub fn new(thread: Arc<ThreadState>) -> Self {
		Self {context: None, parent: None, depth: 0, thread}
	}

	/// A frame of its own thread, with nothing but a context. Used to report
	/// errors that happen outside of any evaluation.
	pub fn detached(context: Context) -> Self {
		let thread = ThreadState::new(Table::new().arc(), Table::new().arc(),
			Arc::default(), Arc::new(|path: &str| std::fs::read_to_string(path)));
		Self {context: Some(context), ..Self::new(Arc::new(thread))}
	}

	/// A frame called from this one, at `context`.
	pub fn with_context(&self, context: &Context) -> Self {
		Self {
			context: Some(context.clone()),
			parent: Some(Arc::new(self.clone())),
			depth: self.depth + 1,
			thread: self.thread.clone()
		}
	}

	pub fn context(&self) -> Option<&Context> {
		self.context.as_ref()
	}

	pub fn parent(&self) -> Option<&StackFrame> {
		self.parent.as_deref()
	}

	pub fn depth(&self) -> usize {
		self.depth
	}

	pub fn globals(&self) -> &Arc<Table> {
		&self.thread.globals
	}

	pub fn thread_local(&self) -> &Arc<Table> {
		&self.thread.thread_local
	}

	pub fn config(&self) -> &Arc<Config> {
		&self.thread.config
	}

	pub fn loader(&self) -> &Arc<FileLoader> {
		&self.thread.loader
	}

	/// Writes a line of output for `print`.
	pub fn print(&self, line: &str) {
		(self.thread.output)(line)
	}

	/// The current height of the close stack.
	pub fn close_mark(&self) -> usize {
		lock(&self.thread.close_stack).len()
	}

	/// Registers the value of a `<close>` variable. `nil` is accepted and
	/// ignored; anything else needs a `__close` metamethod.
	pub fn mark_to_be_closed(&self, value: Value, name: &str, context: &Context)
			-> Result<()> {
		if value.is_nil() {return Ok(())}

		let closable = !matches!(value, Value::Boolean(false))
			&& matches!(value.metamethod("__close"), Some(Value::Function(_)));
		if !closable {
			return Err(LuaError::runtime(
				format!("variable '{}' got a non-closable value", name),
				&self.with_context(context)))
		}

		lock(&self.thread.close_stack).push(CloseEntry {
			value, name: name.to_owned(), context: context.clone()
		});
		Ok(())
	}

	fn pop_above(&self, mark: usize) -> Option<CloseEntry> {
		let mut stack = lock(&self.thread.close_stack);
		if stack.len() > mark {stack.pop()} else {None}
	}

	/// Closes every value registered above `mark`, newest first, then passes
	/// `outcome` on. Every closer runs even if an earlier one fails, and the
	/// first failure replaces `outcome`.
	pub fn close_from<'a, T: 'a>(&self, mark: usize, outcome: Result<T>)
			-> Result<Deferred<'a, T>> {
		let pending = self.close_mark().saturating_sub(mark);
		if pending == 0 {return outcome.map(Deferred::Ready)}
		debug!("closing {} value(s) down to mark {}", pending, mark);

		let mut unwind = Unwind {
			frame: self.clone(),
			mark,
			error: outcome.as_ref().err().map(LuaError::value),
			close_error: None
		};

		while let Some(closing) = unwind.next_closer() {
			match closing {
				Ok(Deferred::Ready(_)) => (),
				Ok(Deferred::Pending(future)) => return Ok(Deferred::pending(async move {
					let result = future.await;
					unwind.record(result);
					while let Some(closing) = unwind.next_closer() {
						let result = match closing {
							Ok(closing) => closing.resolve().await,
							Err(error) => Err(error)
						};
						unwind.record(result);
					}
					unwind.finish(outcome)
				})),
				Err(error) => unwind.record(Err(error))
			}
		}

		unwind.finish(outcome).map(Deferred::Ready)
	}

	/// Closes down to `mark` once `result` is available, however it turns out.
	pub fn close_scope<'a, T: 'a>(&self, mark: usize, result: Result<Deferred<'a, T>>)
			-> Result<Deferred<'a, T>> {
		match result {
			Ok(Deferred::Ready(value)) => self.close_from(mark, Ok(value)),
			Ok(Deferred::Pending(future)) => {
				let frame = self.clone();
				Ok(Deferred::pending(async move {
					let outcome = future.await;
					frame.close_from(mark, outcome)?.resolve().await
				}))
			},
			Err(error) => self.close_from(mark, Err(error))
		}
	}
}

impl Debug for StackFrame {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		let mut list = f.debug_list();
		let mut frame = Some(self);
		while let Some(current) = frame {
			if let Some(context) = &current.context {
				list.entry(&(context.from..context.to));
			}
			frame = current.parent();
		}
		list.finish()
	}
}

struct Unwind {
	frame: StackFrame,
	mark: usize,
	/// The error handed to closers, the newest one raised.
	error: Option<Value>,
	/// The first error a closer raised.
	close_error: Option<LuaError>
}

impl Unwind {
	fn next_closer(&mut self) -> Option<Result<Deferred<'static, Vec<Value>>>> {
		let entry = self.frame.pop_above(self.mark)?;
		let frame = self.frame.with_context(&entry.context);

		// Looked up now, not when the variable was declared.
		Some(match entry.value.metamethod("__close") {
			Some(Value::Function(closer)) => operators::call_function(&frame, &closer,
				vec![entry.value, self.error.clone().unwrap_or_default()]),
			_ => Err(LuaError::runtime(
				format!("metamethod 'close' of variable '{}' is not callable", entry.name),
				&frame))
		})
	}

	fn record(&mut self, result: Result<Vec<Value>>) {
		if let Err(error) = result {
			self.error = Some(error.value());
			self.close_error.get_or_insert(error);
		}
	}

	fn finish<T>(self, outcome: Result<T>) -> Result<T> {
		match self.close_error {
			Some(error) => Err(error),
			None => outcome
		}
	}
}

#[cfg(test)]
mod tests {
	use super::StackFrame;
	use crate::{
		ast::Context,
		vm::{table::Table, value::{Function, Value}}
	};
	use std::sync::{Arc, Mutex};

	fn closable(log: Arc<Mutex<Vec<String>>>, name: &'static str, fail: bool) -> Value {
		let metatable = Table::new();
		metatable.set_str("__close", Value::Function(Function::sync("close",
			move |frame, arguments| {
				let error = arguments.get(1).cloned().unwrap_or_default();
				log.lock().unwrap().push(format!("{} {}", name, error));
				if fail {
					Err(crate::error::LuaError::runtime(format!("{} failed", name), frame))
				} else {
					Ok(vec![])
				}
			})));
		let table = Table::new();
		table.set_metatable(Some(metatable.arc()));
		Value::Table(table.arc())
	}

	#[test]
	fn test_closes_in_reverse_order() {
		let frame = StackFrame::detached(Context::default());
		let log = Arc::new(Mutex::new(Vec::new()));
		let mark = frame.close_mark();
		frame.mark_to_be_closed(closable(log.clone(), "a", false), "a", &Context::default())
			.unwrap();
		frame.mark_to_be_closed(closable(log.clone(), "b", false), "b", &Context::default())
			.unwrap();

		let result = frame.close_from(mark, Ok(1)).unwrap();
		assert!(matches!(result, crate::vm::deferred::Deferred::Ready(1)));
		assert_eq!(*log.lock().unwrap(), vec!["b nil", "a nil"]);
		assert_eq!(frame.close_mark(), mark);
	}

	#[test]
	fn test_first_close_error_wins() {
		let frame = StackFrame::detached(Context::default());
		let log = Arc::new(Mutex::new(Vec::new()));
		for (name, fail) in [("a", true), ("b", true), ("c", false)] {
			frame.mark_to_be_closed(closable(log.clone(), name, fail), name,
				&Context::default()).unwrap();
		}

		let error = frame.close_from::<()>(0, Ok(())).unwrap_err();
		assert_eq!(error.to_string(), "b failed");
		assert_eq!(*log.lock().unwrap(), vec!["c nil", "b nil", "a b failed"]);
	}

	#[test]
	fn test_non_closable_values() {
		let frame = StackFrame::detached(Context::default());
		assert!(frame.mark_to_be_closed(Value::Nil, "x", &Context::default()).is_ok());
		assert_eq!(frame.close_mark(), 0);

		let error = frame.mark_to_be_closed(Value::Boolean(false), "x", &Context::default())
			.unwrap_err();
		assert!(error.to_string().contains("non-closable"));
		assert!(frame.mark_to_be_closed(Value::Table(Table::new().arc()), "y",
			&Context::default()).is_err());
	}
}
