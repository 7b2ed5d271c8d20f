//! Runtime errors and their diagnostics.

use crate::{
	ast::{self, Context},
	vm::{frame::StackFrame, value::Value}
};
use std::result::Result as STDResult;
use thiserror::Error;

pub type Result<T, E = LuaError> = STDResult<T, E>;

#[derive(Clone, Debug, Error)]
pub enum LuaError {
	/// An error raised while running code. `value` is what Lua code sees when
	/// it catches the error with `pcall`, `message` its string form.
	#[error("{message}")]
	Runtime {
		message: String,
		value: Value,
		frame: StackFrame
	},

	/// Source text that failed to parse or lower.
	#[error("{0}")]
	Syntax(#[from] ast::Error),

	/// An error reported by a host function, before it has been attributed
	/// to a frame.
	#[error("{0}")]
	Host(String)
}

impl LuaError {
	/// A runtime error with a string message, raised in `frame`.
	pub fn runtime(message: impl Into<String>, frame: &StackFrame) -> Self {
		let message = message.into();
		Self::Runtime {value: Value::from(message.as_str()), message, frame: frame.clone()}
	}

	/// A runtime error carrying an arbitrary Lua value, as raised by `error`.
	pub fn from_value(value: Value, frame: &StackFrame) -> Self {
		let message = match &value {
			Value::String(string) => string.to_string(),
			Value::Nil => "nil".to_owned(),
			other => other.to_string()
		};
		Self::Runtime {message, value, frame: frame.clone()}
	}

	/// The value Lua code sees for this error.
	pub fn value(&self) -> Value {
		match self {
			Self::Runtime {value, ..} => value.clone(),
			other => Value::from(other.to_string())
		}
	}

	pub fn frame(&self) -> Option<&StackFrame> {
		match self {
			Self::Runtime {frame, ..} => Some(frame),
			_ => None
		}
	}

	/// Attributes an error that has no frame yet to `frame`. Errors that
	/// already have one keep it.
	pub fn within(self, frame: &StackFrame) -> Self {
		match self {
			Self::Runtime {..} => self,
			Self::Syntax(syntax) => {
				let message = syntax.to_string();
				let frame = frame.with_context(&syntax.context());
				Self::Runtime {value: Value::from(message.as_str()), message, frame}
			},
			Self::Host(message) => Self::runtime(message, frame)
		}
	}

	/// Renders the error with a stack trace pointing into `source`.
	///
	/// Every frame with a context contributes its reference, line, column and
	/// the offending line with a caret under the column.
	pub fn pretty_print(&self, source: &str) -> String {
		let frame = match self {
			Self::Runtime {frame, ..} => Some(frame.clone()),
			Self::Syntax(syntax) => Some(StackFrame::detached(syntax.context())),
			Self::Host(_) => None
		};

		let mut trace = String::new();
		let mut current = frame;
		while let Some(frame) = current {
			if let Some(context) = frame.context() {
				trace.push_str(&trace_entry(context, source));
			}
			current = frame.parent().cloned();
		}

		if trace.is_empty() {
			format!("LuaRuntimeError: {}", self)
		} else {
			format!("LuaRuntimeError: {}\nStack trace:\n{}", self, trace)
		}
	}
}

fn trace_entry(context: &Context, source: &str) -> String {
	let from = floor_char_boundary(source, context.from);
	let before = &source[..from];
	let line = before.matches('\n').count() + 1;
	let line_start = before.rfind('\n').map(|index| index + 1).unwrap_or(0);
	let column = before[line_start..].chars().count();
	let line_end = source[from..].find('\n').map(|index| from + index)
		.unwrap_or(source.len());

	format!("* {} @ {}:{}:\n   {}\n   {}^\n",
		context.reference.as_deref().unwrap_or("(unknown source)"),
		line, column, &source[line_start..line_end], " ".repeat(column))
}

fn floor_char_boundary(source: &str, mut index: usize) -> usize {
	index = index.min(source.len());
	while !source.is_char_boundary(index) {index -= 1}
	index
}

#[cfg(test)]
mod tests {
	use super::LuaError;
	use crate::{ast::{self, Context}, vm::{frame::StackFrame, value::Value}};

	#[test]
	fn test_pretty_print() {
		let source = "local a = 1\nlocal b = a + nil\n";
		let frame = StackFrame::detached(Context {
			from: 22, to: 29, reference: Some("test.lua".into())
		});
		let error = LuaError::runtime("attempt to perform arithmetic on a nil value", &frame);

		assert_eq!(error.pretty_print(source),
			"LuaRuntimeError: attempt to perform arithmetic on a nil value\n\
			Stack trace:\n\
			* test.lua @ 2:10:\n   local b = a + nil\n             ^\n");
	}

	#[test]
	fn test_pretty_print_unknown_source() {
		let frame = StackFrame::detached(Context::new(0, 1));
		let error = LuaError::runtime("boom", &frame);
		assert!(error.pretty_print("x").contains("* (unknown source) @ 1:0:"));
	}

	#[test]
	fn test_syntax_error_within_frame() {
		let syntax = ast::parse("local x <shiny> = 1", Some("page")).unwrap_err();
		let context = syntax.context();
		let frame = StackFrame::detached(Context::default());
		let error = LuaError::from(syntax).within(&frame);

		assert_eq!(error.frame().and_then(StackFrame::context).map(|context| context.from),
			Some(context.from));
		assert!(matches!(error.value(), Value::String(_)));
		assert!(error.to_string().contains("shiny"), "{}", error);
	}

	#[test]
	fn test_host_error_without_frame() {
		assert_eq!(LuaError::Host("nope".into()).pretty_print(""), "LuaRuntimeError: nope");
	}
}
