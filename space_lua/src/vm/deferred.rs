//! Results that are either available right away or only later.
//!
//! Almost everything the evaluator does finishes synchronously; only host
//! functions may suspend. Rather than run every operation as a future, each
//! evaluation step returns a [Deferred], and only steps that actually
//! suspended pay for boxing and awaiting. The combinators here keep evaluation
//! order intact across both paths.

use self::super::grow;
use crate::error::Result;
use std::{
	fmt::{Debug, Formatter, Result as FMTResult},
	future::Future,
	pin::Pin,
	sync::{Arc, OnceLock},
	task::{Context, Poll, Wake, Waker}
};

pub type LocalFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;

pub enum Deferred<'a, T> {
	Ready(T),
	Pending(LocalFuture<'a, T>)
}

impl<'a, T: 'a> Deferred<'a, T> {
	pub fn pending(future: impl Future<Output = Result<T>> + 'a) -> Self {
		Self::Pending(Box::pin(future))
	}

	/// Polls `future` once. If it completes without suspending its output is
	/// returned as ready, otherwise the partially run future is kept and
	/// resumed by whoever awaits it next.
	///
	/// Both this first poll and any later one run on a stack with room to
	/// spare, so deeply nested calls don't exhaust the native stack.
	pub fn poll_once(future: impl Future<Output = Result<T>> + 'a) -> Result<Self> {
		let mut future: LocalFuture<'a, T> = Box::pin(future);
		let waker = idle_waker();
		let mut context = Context::from_waker(&waker);
		match grow(|| future.as_mut().poll(&mut context)) {
			Poll::Ready(result) => result.map(Self::Ready),
			Poll::Pending => Ok(Self::Pending(Box::pin(Grown(future))))
		}
	}

	pub fn is_ready(&self) -> bool {
		matches!(self, Self::Ready(_))
	}

	/// Continues with `next` once the value is available.
	pub fn then<U: 'a>(self, next: impl FnOnce(T) -> Result<Deferred<'a, U>> + 'a)
			-> Result<Deferred<'a, U>> {
		match self {
			Self::Ready(value) => next(value),
			Self::Pending(future) => Ok(Deferred::pending(async move {
				next(future.await?)?.resolve().await
			}))
		}
	}

	pub fn map<U: 'a>(self, map: impl FnOnce(T) -> U + 'a) -> Deferred<'a, U> {
		match self {
			Self::Ready(value) => Deferred::Ready(map(value)),
			Self::Pending(future) => Deferred::pending(async move {
				future.await.map(map)
			})
		}
	}

	pub async fn resolve(self) -> Result<T> {
		match self {
			Self::Ready(value) => Ok(value),
			Self::Pending(future) => future.await
		}
	}
}

impl<T> Deferred<'static, T> {
	/// Lets a value that outlives everything be chained with work that
	/// borrows the syntax tree.
	pub fn shorten<'a>(self) -> Deferred<'a, T> where T: 'a {
		self
	}
}

impl<T> Debug for Deferred<'_, T>
		where T: Debug {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
			Self::Pending(_) => write!(f, "Pending")
		}
	}
}

/// Runs each step in order. Steps after the first one that suspends only
/// start once it has completed.
pub fn sequence<'a, T, I, F>(steps: I) -> Result<Deferred<'a, Vec<T>>>
		where
			T: 'a,
			I: IntoIterator<Item = F>,
			I::IntoIter: 'a,
			F: FnOnce() -> Result<Deferred<'a, T>> + 'a {
	let mut steps = steps.into_iter();
	let mut values = Vec::new();

	while let Some(step) = steps.next() {
		match step()? {
			Deferred::Ready(value) => values.push(value),
			Deferred::Pending(future) => return Ok(Deferred::pending(async move {
				values.push(future.await?);
				for step in steps {
					values.push(step()?.resolve().await?);
				}
				Ok(values)
			}))
		}
	}

	Ok(Deferred::Ready(values))
}

/// Turns an error, whether raised right away or once suspended, into a
/// value. Used by protected calls.
pub fn settle<'a, T: 'a>(result: Result<Deferred<'a, T>>) -> Deferred<'a, Result<T>> {
	match result {
		Ok(Deferred::Ready(value)) => Deferred::Ready(Ok(value)),
		Ok(Deferred::Pending(future)) => Deferred::pending(async move {Ok(future.await)}),
		Err(error) => Deferred::Ready(Err(error))
	}
}

/// Polls the inner future on a stack with room to spare.
struct Grown<'a, T>(LocalFuture<'a, T>);

impl<T> Future for Grown<'_, T> {
	type Output = Result<T>;

	fn poll(mut self: Pin<&mut Self>, context: &mut Context) -> Poll<Result<T>> {
		let future = &mut self.0;
		grow(|| future.as_mut().poll(context))
	}
}

struct Idle;

impl Wake for Idle {
	fn wake(self: Arc<Self>) {}
}

fn idle_waker() -> Waker {
	static WAKER: OnceLock<Waker> = OnceLock::new();
	WAKER.get_or_init(|| Waker::from(Arc::new(Idle))).clone()
}

#[cfg(test)]
mod tests {
	use super::{Deferred, sequence};
	use self::super::grow;
use crate::error::Result;
	use std::{cell::RefCell, rc::Rc};

	fn ready(value: i64) -> Result<Deferred<'static, i64>> {
		Ok(Deferred::Ready(value))
	}

	fn later(value: i64) -> Result<Deferred<'static, i64>> {
		Ok(Deferred::pending(async move {
			tokio::task::yield_now().await;
			Ok(value)
		}))
	}

	#[test]
	fn test_then_stays_ready() {
		let result = ready(2).unwrap().then(|value| ready(value * 3)).unwrap();
		assert!(matches!(result, Deferred::Ready(6)));
	}

	#[test]
	fn test_poll_once_completes_synchronous_futures() {
		let result = Deferred::poll_once(async {Ok(5)}).unwrap();
		assert!(matches!(result, Deferred::Ready(5)));
	}

	#[tokio::test]
	async fn test_sequence_keeps_order_across_suspension() {
		let log = Rc::new(RefCell::new(Vec::new()));
		let steps = (0..4).map(|index| {
			let log = log.clone();
			move || {
				log.borrow_mut().push(index);
				if index == 1 {later(index * 10)} else {ready(index * 10)}
			}
		});

		let result = sequence(steps).unwrap();
		assert!(!result.is_ready());
		// Nothing after the suspended step has run yet.
		assert_eq!(*log.borrow(), vec![0, 1]);
		assert_eq!(result.resolve().await.unwrap(), vec![0, 10, 20, 30]);
		assert_eq!(*log.borrow(), vec![0, 1, 2, 3]);
	}

	#[tokio::test]
	async fn test_then_after_suspension() {
		let result = later(4).unwrap().then(|value| ready(value + 1)).unwrap();
		assert_eq!(result.resolve().await.unwrap(), 5);
	}
}
