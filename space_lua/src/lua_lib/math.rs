//! The `math` library.

use self::super::{argument, bad_argument, check_integer, check_number, check_table};
use crate::{
	error::{LuaError, Result},
	lua_table,
	vm::{
		frame::StackFrame,
		lock,
		number::{self, Number},
		table::Table,
		value::{Function, Value}
	}
};
use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use std::{
	cmp::Ordering,
	sync::{Arc, Mutex}
};

/// The generator behind `math.random`, a xoshiro256**.
#[derive(Clone, Debug)]
pub struct Random(Xoshiro256StarStar);

impl Random {
	/// Seeds the state with `first`, `0xff`, `second` and `0`, then discards
	/// the first 16 outputs, so equal seeds give equal sequences.
	pub fn seeded(first: u64, second: u64) -> Self {
		let mut seed = [0; 32];
		for (chunk, word) in seed.chunks_exact_mut(8).zip([first, 0xff, second, 0]) {
			chunk.copy_from_slice(&word.to_le_bytes());
		}

		let mut generator = Xoshiro256StarStar::from_seed(seed);
		for _ in 0..16 {generator.next_u64();}
		Self(generator)
	}

	/// Seeded from the clock.
	pub fn from_time() -> Self {
		let (first, second) = clock_seed();
		Self::seeded(first as u64, second as u64)
	}

	pub fn next(&mut self) -> u64 {
		self.0.next_u64()
	}

	/// A float in `[0, 1)`.
	pub fn float(&mut self) -> f64 {
		self.0.gen()
	}

	/// An integer in `[low, high]`.
	pub fn between(&mut self, low: i64, high: i64) -> i64 {
		self.0.gen_range(low..=high)
	}
}

fn clock_seed() -> (i64, i64) {
	let now = chrono::Utc::now();
	(now.timestamp_millis(), now.timestamp_subsec_nanos() as i64)
}

fn float(frame: &StackFrame, arguments: &[Value], function: &str) -> Result<f64> {
	Ok(check_number(frame, arguments, 0, function)?.float())
}

/// Wraps an `f64 -> f64` function.
fn unary(name: &'static str, function: fn(f64) -> f64) -> Function {
	Function::sync(name, move |frame, arguments|
		Ok(vec![Value::Float(function(float(frame, &arguments, name)?))]))
}

/// Rounds towards `round`, keeping integers as they are and turning floats
/// into integers when they fit.
fn rounding(name: &'static str, round: fn(f64) -> f64) -> Function {
	Function::sync(name, move |frame, arguments| Ok(vec![
		match check_number(frame, &arguments, 0, name)? {
			Number::Integer(integer) => Value::Integer(integer),
			Number::Float(float) => {
				let rounded = round(float);
				number::float_to_integer(rounded).map_or(Value::Float(rounded), Value::Integer)
			}
		}
	]))
}

pub fn r#type(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	if arguments.is_empty() {
		return Err(bad_argument(frame, 1, "type", "value expected"))
	}
	Ok(vec![match &arguments[0] {
		Value::Integer(_) => Value::from("integer"),
		Value::Float(_) => Value::from("float"),
		_ => Value::Nil
	}])
}

pub fn abs(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![match check_number(frame, &arguments, 0, "abs")? {
		Number::Integer(integer) => Value::Integer(integer.wrapping_abs()),
		Number::Float(float) => Value::Float(float.abs())
	}])
}

/// The extreme of the arguments by `wanted`, keeping the original number
/// subtype.
fn extreme(frame: &StackFrame, arguments: &[Value], function: &str, wanted: Ordering)
		-> Result<Vec<Value>> {
	let mut best = check_number(frame, arguments, 0, function)?;
	for index in 1..arguments.len() {
		let candidate = check_number(frame, arguments, index, function)?;
		let ordering = match (candidate, best) {
			(Number::Integer(a), Number::Integer(b)) => a.cmp(&b),
			(a, b) => a.float().partial_cmp(&b.float()).unwrap_or(Ordering::Equal)
		};
		if ordering == wanted {best = candidate}
	}
	Ok(vec![best.into()])
}

pub fn max(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	extreme(frame, &arguments, "max", Ordering::Greater)
}

pub fn min(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	extreme(frame, &arguments, "min", Ordering::Less)
}

pub fn fmod(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let a = check_number(frame, &arguments, 0, "fmod")?;
	let b = check_number(frame, &arguments, 1, "fmod")?;
	Ok(vec![match (a, b) {
		(Number::Integer(_), Number::Integer(0)) =>
			return Err(bad_argument(frame, 2, "fmod", "zero")),
		(Number::Integer(a), Number::Integer(b)) => Value::Integer(a.wrapping_rem(b)),
		(a, b) => Value::Float(a.float() % b.float())
	}])
}

pub fn modf(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let value = match check_number(frame, &arguments, 0, "modf")? {
		Number::Integer(integer) => return Ok(vec![Value::Integer(integer), Value::Float(0.0)]),
		Number::Float(float) => float
	};
	let whole = value.trunc();
	let fraction = if value.is_infinite() {0.0} else {value - whole};
	Ok(vec![Value::Float(whole), Value::Float(fraction)])
}

pub fn log(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let value = float(frame, &arguments, "log")?;
	Ok(vec![Value::Float(match argument(&arguments, 1) {
		Value::Nil => value.ln(),
		_ => match check_number(frame, &arguments, 1, "log")?.float() {
			base if base == 2.0 => value.log2(),
			base if base == 10.0 => value.log10(),
			base => value.ln() / base.ln()
		}
	})])
}

pub fn pow(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let base = float(frame, &arguments, "pow")?;
	let exponent = check_number(frame, &arguments, 1, "pow")?.float();
	Ok(vec![Value::Float(base.powf(exponent))])
}

pub fn atan(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let y = float(frame, &arguments, "atan")?;
	let x = match argument(&arguments, 1) {
		Value::Nil => 1.0,
		_ => check_number(frame, &arguments, 1, "atan")?.float()
	};
	Ok(vec![Value::Float(y.atan2(x))])
}

pub fn tointeger(_: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![match argument(&arguments, 0) {
		Value::Integer(integer) => Value::Integer(integer),
		Value::Float(float) => number::float_to_integer(float).map_or(Value::Nil, Value::Integer),
		Value::String(string) => number::parse(&string).and_then(Number::integer)
			.map_or(Value::Nil, Value::Integer),
		_ => Value::Nil
	}])
}

pub fn ult(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let a = check_integer(frame, &arguments, 0, "ult")?;
	let b = check_integer(frame, &arguments, 1, "ult")?;
	Ok(vec![Value::Boolean((a as u64) < (b as u64))])
}

fn random(random: &Mutex<Random>, frame: &StackFrame, arguments: &[Value])
		-> Result<Vec<Value>> {
	let mut random = lock(random);
	let (low, high) = match arguments.len() {
		0 => return Ok(vec![Value::Float(random.float())]),
		1 => match check_integer(frame, arguments, 0, "random")? {
			0 => return Ok(vec![Value::Integer(random.next() as i64)]),
			high => (1, high)
		},
		_ => (check_integer(frame, arguments, 0, "random")?,
			check_integer(frame, arguments, 1, "random")?)
	};
	if low > high {
		return Err(bad_argument(frame, arguments.len(), "random", "interval is empty"))
	}
	Ok(vec![Value::Integer(random.between(low, high))])
}

fn randomseed(random: &Mutex<Random>, frame: &StackFrame, arguments: &[Value])
		-> Result<Vec<Value>> {
	let (first, second) = match arguments.len() {
		0 => clock_seed(),
		_ => (check_integer(frame, arguments, 0, "randomseed")?,
			match argument(arguments, 1) {
				Value::Nil => 0,
				_ => check_integer(frame, arguments, 1, "randomseed")?
			})
	};
	*lock(random) = Random::seeded(first as u64, second as u64);
	Ok(vec![Value::Integer(first), Value::Integer(second)])
}

/// The cosine similarity of two equally long sequences of numbers.
pub fn cosine_similarity(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let a = check_table(frame, &arguments, 0, "cosineSimilarity")?.array();
	let b = check_table(frame, &arguments, 1, "cosineSimilarity")?.array();
	if a.len() != b.len() {
		return Err(LuaError::runtime("vectors must be of the same length", frame))
	}

	let floats = |values: &[Value]| values.iter()
		.map(|value| number::coerce(value).map(Number::float))
		.collect::<Option<Vec<_>>>()
		.ok_or_else(|| LuaError::runtime("vectors must only contain numbers", frame));
	let (a, b) = (floats(&a)?, floats(&b)?);

	let dot: f64 = a.iter().zip(&b).map(|(a, b)| a * b).sum();
	let norm = |vector: &[f64]| vector.iter().map(|x| x * x).sum::<f64>().sqrt();
	Ok(vec![Value::Float(dot / (norm(&a) * norm(&b)))])
}

pub fn library() -> Table {
	let generator = Arc::new(Mutex::new(Random::from_time()));
	let seeder = generator.clone();

	lua_table! {
		huge = f64::INFINITY,
		pi = std::f64::consts::PI,
		maxinteger = i64::MAX,
		mininteger = i64::MIN,
		type = Function::sync("type", r#type),
		random = Function::sync("random", move |frame, arguments|
			random(&generator, frame, &arguments)),
		randomseed = Function::sync("randomseed", move |frame, arguments|
			randomseed(&seeder, frame, &arguments)),
		abs = Function::sync("abs", abs),
		ceil = rounding("ceil", f64::ceil),
		floor = rounding("floor", f64::floor),
		max = Function::sync("max", max),
		min = Function::sync("min", min),
		fmod = Function::sync("fmod", fmod),
		modf = Function::sync("modf", modf),
		exp = unary("exp", f64::exp),
		log = Function::sync("log", log),
		pow = Function::sync("pow", pow),
		sqrt = unary("sqrt", f64::sqrt),
		cos = unary("cos", f64::cos),
		sin = unary("sin", f64::sin),
		tan = unary("tan", f64::tan),
		acos = unary("acos", f64::acos),
		asin = unary("asin", f64::asin),
		atan = Function::sync("atan", atan),
		cosh = unary("cosh", f64::cosh),
		sinh = unary("sinh", f64::sinh),
		tanh = unary("tanh", f64::tanh),
		deg = unary("deg", f64::to_degrees),
		rad = unary("rad", f64::to_radians),
		tointeger = Function::sync("tointeger", tointeger),
		ult = Function::sync("ult", ult),
		cosineSimilarity = Function::sync("cosineSimilarity", cosine_similarity)
	}
}

#[cfg(test)]
mod tests {
	use super::Random;
	use crate::{
		ast::Context,
		lua_table, lua_tuple,
		vm::{deferred::Deferred, frame::StackFrame, operators, value::Value}
	};

	fn call(name: &str, arguments: Vec<Value>) -> Result<Vec<Value>, String> {
		let library = super::library();
		let frame = StackFrame::detached(Context::default());
		match operators::call(&frame, &library.get_str(name), arguments) {
			Ok(Deferred::Ready(values)) => Ok(values),
			Ok(Deferred::Pending(_)) => panic!("unexpectedly pending"),
			Err(error) => Err(error.to_string())
		}
	}

	#[test]
	fn test_rounding() {
		assert_eq!(call("floor", lua_tuple![3.7]).unwrap(), lua_tuple![3]);
		assert_eq!(call("ceil", lua_tuple![-3.7]).unwrap(), lua_tuple![-3]);
		assert_eq!(call("floor", lua_tuple![5]).unwrap(), lua_tuple![5]);
		assert_eq!(call("tointeger", lua_tuple![4.0]).unwrap(), lua_tuple![4]);
		assert_eq!(call("tointeger", lua_tuple![4.5]).unwrap(), lua_tuple![()]);
	}

	#[test]
	fn test_extremes() {
		assert_eq!(call("max", lua_tuple![1, 7, 3]).unwrap(), lua_tuple![7]);
		assert_eq!(call("min", lua_tuple![1.5, -2, 3]).unwrap(), lua_tuple![-2]);
		assert!(call("max", lua_tuple![]).unwrap_err().contains("bad argument #1 to 'max'"));
	}

	#[test]
	fn test_type_and_fmod() {
		assert_eq!(call("type", lua_tuple![1]).unwrap(), lua_tuple!["integer"]);
		assert_eq!(call("type", lua_tuple![1.0]).unwrap(), lua_tuple!["float"]);
		assert_eq!(call("type", lua_tuple!["1"]).unwrap(), lua_tuple![()]);
		assert_eq!(call("fmod", lua_tuple![7, 3]).unwrap(), lua_tuple![1]);
		assert_eq!(call("fmod", lua_tuple![-7, 3]).unwrap(), lua_tuple![-1]);
		assert!(call("fmod", lua_tuple![1, 0]).unwrap_err().contains("zero"));
	}

	#[test]
	fn test_random_ranges() {
		for _ in 0..100 {
			let value = call("random", lua_tuple![3, 5]).unwrap()[0].integer().unwrap();
			assert!((3..=5).contains(&value));
			let float = call("random", lua_tuple![]).unwrap()[0].number().unwrap();
			assert!((0.0..1.0).contains(&float));
		}
		assert!(call("random", lua_tuple![5, 1]).unwrap_err().contains("interval is empty"));
	}

	#[test]
	fn test_seeded_sequences_repeat() {
		let (mut a, mut b) = (Random::seeded(42, 0), Random::seeded(42, 0));
		for _ in 0..10 {assert_eq!(a.next(), b.next())}
		assert_ne!(Random::seeded(42, 0).next(), Random::seeded(42, 1).next());
		assert_eq!(Random::seeded(1, 0).between(7, 7), 7);
		assert!((i64::MIN..=i64::MAX).contains(&Random::seeded(3, 4).between(i64::MIN, i64::MAX)));
	}

	#[test]
	fn test_randomseed_replays() {
		let library = super::library();
		let frame = StackFrame::detached(Context::default());
		let draw = |name: &str, arguments: Vec<Value>| {
			match operators::call(&frame, &library.get_str(name), arguments) {
				Ok(Deferred::Ready(values)) => values,
				_ => panic!("{} failed", name)
			}
		};

		assert_eq!(draw("randomseed", lua_tuple![7, 9]), lua_tuple![7, 9]);
		let first: Vec<_> = (0..5).map(|_| draw("random", lua_tuple![1, 100])).collect();
		assert_eq!(draw("randomseed", lua_tuple![7]), lua_tuple![7, 0]);
		assert_eq!(draw("randomseed", lua_tuple![7, 9]), lua_tuple![7, 9]);
		let second: Vec<_> = (0..5).map(|_| draw("random", lua_tuple![1, 100])).collect();
		assert_eq!(first, second);
	}

	#[test]
	fn test_cosine_similarity() {
		let same = call("cosineSimilarity", vec![lua_table! {1, 2}.into(),
			lua_table! {2, 4}.into()]).unwrap();
		assert!((same[0].number().unwrap() - 1.0).abs() < 1e-9);
	}
}
