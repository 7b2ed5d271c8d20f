//! The evaluator and the values it works on.
//!
//! Evaluation walks the lowered syntax tree directly. Each step either
//! produces its result right away or hands back a suspended computation, see
//! [deferred].

pub mod convert;
pub mod deferred;
pub mod env;
pub mod eval;
pub mod frame;
pub mod number;
pub mod operators;
pub mod table;
pub mod value;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Stack left before recursion moves onto a fresh segment.
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each fresh segment.
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Runs `f`, first switching to a new stack segment if the current one is
/// nearly used up. Wraps every point where evaluation recurses.
pub(crate) fn grow<R>(f: impl FnOnce() -> R) -> R {
	stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, f)
}

/// Locks a mutex, ignoring poisoning. Nothing here leaves shared state half
/// updated across a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
