#![forbid(
	// Rationale: A Lua interpeter must be reliable, and should not be vulnerable
	// to sandbox escape vulnerabilities.
	unsafe_code
)]
#![warn(
	// Rationale: Panics should be avoided in favor of returning a Result, and
	// situations where panics are intentional should be well documented
	// (requiring an allow attribute to signal complete documentation).
	clippy::unwrap_used,
	clippy::panic,

	// Rationale: These should not be in production code.
	clippy::todo,
	clippy::unimplemented
)]
#![allow(
	// Rationale: Tabs are superior, don't at me.
	clippy::tabs_in_doc_comments,

	// Rationale: Drop is a valid way to ensure an expression returns a unit. It
	// can be used like JavaScript's void keyword.
	clippy::drop_copy
)]
//! Space Lua is an embeddable dialect of Lua 5.4, written in safe Rust. On
//! top of the language it supports `<const>` and `<close>` locals, `goto`,
//! and `query[[...]]` expressions that filter, group, sort and project
//! collections declaratively.
//!
//! The interpreter is made of these components.
//! - [ast] - The lexer, the parser producing a generic parse tree, and the
//!   lowering of that tree into typed syntax
//! - [vm] - The tree walking evaluator and the values, tables, scopes and
//!   frames it works with
//! - [query] - Query expressions, the collections they run against and
//!   their aggregate functions
//! - [lua_lib] - The standard library
//!
//! Evaluation is synchronous until a host function needs to wait for
//! something; only then does it turn into a future, see
//! [vm::deferred::Deferred].
//!
//! Examples
//! --------
//! The [Runtime] strings the components together.
//! ```rust
//! use space_lua::{Runtime, lua_tuple, vm::convert::HostFunction};
//! use serde_json::json;
//!
//! let runtime = Runtime::new();
//! runtime.register_host("space.greet", HostFunction::sync("greet",
//! 	|arguments| Ok(json!(format!("hello {}", arguments[0].as_str().unwrap_or("?"))))))
//! 	.unwrap();
//!
//! let results = runtime.execute_sync(r#"
//! 	local pages = {{name = "b", size = 2}, {name = "a", size = 5}}
//! 	local names = query[[from p = pages where p.size > 1 order by p.name select p.name]]
//! 	return space.greet(names[1]), #names
//! "#, None).unwrap();
//! assert_eq!(results, lua_tuple!["hello a", 2]);
//! ```

pub mod ast;
pub mod error;
pub mod lua_lib;
pub mod query;
pub mod runtime;
pub mod vm;

pub use self::runtime::Runtime;
