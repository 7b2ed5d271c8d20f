//! Numeric semantics shared by the operators and the standard library.
//!
//! Lua numbers are either 64 bit integers or doubles. Integer arithmetic
//! wraps around, float arithmetic follows IEEE 754, and mixing the two
//! converts to float. Strings that look like numbers are converted wherever
//! arithmetic expects a number.

use self::super::value::Value;
use crate::ast::{lower, syntax::{BinaryOperator, ExpressionKind}};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
	Integer(i64),
	Float(f64)
}

impl Number {
	pub fn float(self) -> f64 {
		match self {
			Self::Integer(integer) => integer as f64,
			Self::Float(float) => float
		}
	}

	pub fn integer(self) -> Option<i64> {
		match self {
			Self::Integer(integer) => Some(integer),
			Self::Float(float) => float_to_integer(float)
		}
	}
}

impl From<Number> for Value {
	fn from(number: Number) -> Self {
		match number {
			Number::Integer(integer) => Value::Integer(integer),
			Number::Float(float) => Value::Float(float)
		}
	}
}

/// Converts a value to a number, parsing strings.
pub fn coerce(value: &Value) -> Option<Number> {
	match value {
		Value::Integer(integer) => Some(Number::Integer(*integer)),
		Value::Float(float) => Some(Number::Float(*float)),
		Value::String(string) => parse(string),
		Value::MultiResult(values) => values.first().and_then(coerce),
		_ => None
	}
}

/// Parses a string the way `tonumber` does without a base: surrounding
/// whitespace is ignored and a single leading sign is allowed.
pub fn parse(text: &str) -> Option<Number> {
	let text = text.trim();
	let (negative, digits) = match text.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, text.strip_prefix('+').unwrap_or(text))
	};
	if digits.starts_with(['-', '+']) {return None}

	match lower::parse_number(digits)? {
		ExpressionKind::Integer(integer) if negative =>
			Some(Number::Integer(integer.wrapping_neg())),
		ExpressionKind::Integer(integer) => Some(Number::Integer(integer)),
		ExpressionKind::Float(float) if negative => Some(Number::Float(-float)),
		ExpressionKind::Float(float) => Some(Number::Float(float)),
		_ => None
	}
}

/// Parses an integer in the given base, as `tonumber(text, base)` does.
pub fn parse_radix(text: &str, base: u32) -> Option<i64> {
	let text = text.trim().to_lowercase();
	let (negative, digits) = match text.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, text.as_str())
	};
	if digits.is_empty() {return None}

	let value = digits.chars().try_fold(0i64, |number, digit| {
		let digit = digit.to_digit(base)?;
		Some(number.wrapping_mul(base as i64).wrapping_add(digit as i64))
	})?;
	Some(if negative {value.wrapping_neg()} else {value})
}

/// The integer a float represents exactly, if any.
pub fn float_to_integer(float: f64) -> Option<i64> {
	// 2^63 itself is out of range, -2^63 is not.
	if float.fract() == 0.0 && float >= -9223372036854775808.0
			&& float < 9223372036854775808.0 {
		Some(float as i64)
	} else {
		None
	}
}

/// Converts a value to an integer for bitwise operations and library
/// functions expecting one.
pub fn to_integer(value: &Value) -> Option<i64> {
	coerce(value)?.integer()
}

/// Formats a float like C's `%.14g`, marking integral values with `.0`.
pub fn format_float(float: f64) -> String {
	if float.is_nan() {
		return if float.is_sign_negative() {"-nan".to_owned()} else {"nan".to_owned()}
	}
	if float.is_infinite() {
		return if float < 0.0 {"-inf".to_owned()} else {"inf".to_owned()}
	}

	let formatted = format_general(float, 14);
	if formatted.contains(['.', 'e', 'n', 'i']) {
		formatted
	} else {
		formatted + ".0"
	}
}

/// C's `%.{precision}g`.
pub fn format_general(float: f64, precision: usize) -> String {
	let precision = precision.max(1);
	let scientific = format!("{:.*e}", precision - 1, float);
	let exponent = scientific.split_once('e')
		.and_then(|(_, exponent)| exponent.parse::<i32>().ok())
		.unwrap_or(0);

	if exponent < -4 || exponent >= precision as i32 {
		let (mantissa, _) = scientific.split_once('e').unwrap_or((&scientific, ""));
		let mantissa = trim_fraction(mantissa);
		let sign = if exponent < 0 {'-'} else {'+'};
		format!("{}e{}{:02}", mantissa, sign, exponent.abs())
	} else {
		let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
		trim_fraction(&format!("{:.*}", decimals, float)).to_owned()
	}
}

fn trim_fraction(number: &str) -> &str {
	if number.contains('.') {
		number.trim_end_matches('0').trim_end_matches('.')
	} else {
		number
	}
}

/// Applies an arithmetic operator to two numbers (or numeric strings).
///
/// Returns `None` if either operand isn't a number, so the caller can look
/// for a metamethod, and an error for integer division by zero.
pub fn arithmetic(operator: BinaryOperator, left: &Value, right: &Value)
		-> Option<Result<Value, &'static str>> {
	let (left, right) = (coerce(left)?, coerce(right)?);

	Some(Ok(match (operator, left, right) {
		(BinaryOperator::Add, Number::Integer(a), Number::Integer(b)) =>
			Value::Integer(a.wrapping_add(b)),
		(BinaryOperator::Subtract, Number::Integer(a), Number::Integer(b)) =>
			Value::Integer(a.wrapping_sub(b)),
		(BinaryOperator::Multiply, Number::Integer(a), Number::Integer(b)) =>
			Value::Integer(a.wrapping_mul(b)),
		(BinaryOperator::FloorDivide, Number::Integer(a), Number::Integer(b)) => {
			if b == 0 {return Some(Err("attempt to divide by zero"))}
			Value::Integer(floor_divide(a, b))
		},
		(BinaryOperator::Modulo, Number::Integer(a), Number::Integer(b)) => {
			if b == 0 {return Some(Err("attempt to perform 'n%0'"))}
			Value::Integer(modulo(a, b))
		},

		(operator, left, right) => {
			let (a, b) = (left.float(), right.float());
			Value::Float(match operator {
				BinaryOperator::Add => a + b,
				BinaryOperator::Subtract => a - b,
				BinaryOperator::Multiply => a * b,
				BinaryOperator::Divide => a / b,
				BinaryOperator::Exponent => a.powf(b),
				BinaryOperator::FloorDivide => (a / b).floor(),
				BinaryOperator::Modulo => float_modulo(a, b),
				_ => return None
			})
		}
	}))
}

fn floor_divide(a: i64, b: i64) -> i64 {
	let quotient = a.wrapping_div(b);
	if a.wrapping_rem(b) != 0 && (a < 0) != (b < 0) {quotient - 1} else {quotient}
}

fn modulo(a: i64, b: i64) -> i64 {
	let remainder = a.wrapping_rem(b);
	if remainder != 0 && (remainder ^ b) < 0 {remainder + b} else {remainder}
}

fn float_modulo(a: f64, b: f64) -> f64 {
	let remainder = a % b;
	// `%` keeps the sign of the dividend, Lua wants the divisor's.
	if remainder != 0.0 && (remainder < 0.0) != (b < 0.0) {remainder + b} else {remainder}
}

/// Why a bitwise operand couldn't be used.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BitwiseError {
	/// Not a number at all.
	NotNumber,
	/// A float with a fractional part, or out of range.
	NoInteger
}

pub fn bitwise_operand(value: &Value) -> Result<i64, BitwiseError> {
	match coerce(value) {
		Some(number) => number.integer().ok_or(BitwiseError::NoInteger),
		None => Err(BitwiseError::NotNumber)
	}
}

/// Applies a bitwise operator to two integers.
pub fn bitwise(operator: BinaryOperator, a: i64, b: i64) -> Option<i64> {
	Some(match operator {
		BinaryOperator::BitwiseAnd => a & b,
		BinaryOperator::BitwiseOr => a | b,
		BinaryOperator::BitwiseXOr => a ^ b,
		BinaryOperator::ShiftLeft => shift_left(a, b),
		BinaryOperator::ShiftRight => shift_left(a, b.wrapping_neg()),
		_ => return None
	})
}

/// A logical shift, negative amounts shifting right.
fn shift_left(value: i64, amount: i64) -> i64 {
	match amount {
		amount if amount <= -64 || amount >= 64 => 0,
		amount if amount >= 0 => ((value as u64) << amount) as i64,
		amount => ((value as u64) >> -amount) as i64
	}
}
