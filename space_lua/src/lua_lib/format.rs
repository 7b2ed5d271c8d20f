//! `string.format`.

use crate::vm::{number, value::Value};

#[derive(Clone, Copy, Debug, Default)]
struct Spec {
	left: bool,
	plus: bool,
	space: bool,
	alternate: bool,
	zero: bool,
	width: usize,
	precision: Option<usize>,
	conversion: char
}

/// Formats `arguments` according to `format`. Errors are messages for
/// `string.format`'s caller.
pub fn format(format: &str, arguments: &[Value]) -> Result<String, String> {
	let mut output = String::new();
	let mut used = 0;
	let mut characters = format.chars().peekable();

	while let Some(character) = characters.next() {
		if character != '%' {
			output.push(character);
			continue
		}
		match characters.peek() {
			None => return Err("invalid conversion '%' to 'format'".to_owned()),
			Some('%') => {characters.next(); output.push('%'); continue},
			Some(_) => ()
		}

		let mut spec = Spec::default();
		let mut text = String::from("%");
		while let Some(&flag) = characters.peek() {
			match flag {
				'-' => spec.left = true,
				'+' => spec.plus = true,
				' ' => spec.space = true,
				'#' => spec.alternate = true,
				'0' => spec.zero = true,
				_ => break
			}
			text.push(flag);
			characters.next();
		}
		spec.width = digits(&mut characters, &mut text);
		if characters.peek() == Some(&'.') {
			characters.next();
			text.push('.');
			spec.precision = Some(digits(&mut characters, &mut text));
		}
		let conversion = characters.next()
			.ok_or_else(|| format!("invalid conversion '{}' to 'format'", text))?;
		text.push(conversion);
		if spec.width > 99 || spec.precision.map_or(false, |precision| precision > 99) {
			return Err(format!("invalid conversion '{}' to 'format'", text))
		}
		spec.conversion = conversion;

		// The format string itself is argument one.
		let position = used + 2;
		let argument = arguments.get(used)
			.ok_or_else(|| format!("bad argument #{} to 'format' (no value)", position))?;
		used += 1;
		output.push_str(&match conversion {
			'd' | 'i' | 'u' => integer(&spec, int_argument(argument, position)?),
			'c' => pad(&spec, char::from_u32(int_argument(argument, position)? as u32)
				.map(String::from).unwrap_or_default(), false),
			'x' | 'X' | 'o' => unsigned(&spec, int_argument(argument, position)?),
			'e' | 'E' | 'f' | 'F' | 'g' | 'G' =>
				float(&spec, float_argument(argument, position)?),
			'a' | 'A' => {
				let hex = hex_float(float_argument(argument, position)?);
				let hex = if conversion == 'A' {hex.to_uppercase()} else {hex};
				pad(&spec, signed(&spec, hex), true)
			},
			'q' => quote(argument),
			's' => {
				let string = argument.to_string();
				let string = match spec.precision {
					Some(precision) => string.chars().take(precision).collect(),
					None => string
				};
				pad(&spec, string, false)
			},
			_ => return Err(format!("invalid conversion '{}' to 'format'", text))
		});
	}

	Ok(output)
}

fn digits(characters: &mut std::iter::Peekable<std::str::Chars>, text: &mut String) -> usize {
	let mut value = 0;
	while let Some(digit) = characters.peek().and_then(|character| character.to_digit(10)) {
		value = value * 10 + digit as usize;
		text.extend(characters.next());
	}
	value
}

fn int_argument(argument: &Value, position: usize) -> Result<i64, String> {
	match number::coerce(argument) {
		Some(number) => number.integer().ok_or_else(|| format!(
			"bad argument #{} to 'format' (number has no integer representation)", position)),
		None => Err(format!("bad argument #{} to 'format' (number expected, got {})",
			position, argument.type_name()))
	}
}

fn float_argument(argument: &Value, position: usize) -> Result<f64, String> {
	number::coerce(argument).map(|number| number.float()).ok_or_else(|| format!(
		"bad argument #{} to 'format' (number expected, got {})", position, argument.type_name()))
}

/// Pads to the width. Zero padding goes between the sign and the digits.
fn pad(spec: &Spec, text: String, numeric: bool) -> String {
	let length = text.chars().count();
	if length >= spec.width {return text}
	let fill = spec.width - length;

	if spec.left {
		text + &" ".repeat(fill)
	} else if spec.zero && numeric {
		let split = text.find(|character: char| !matches!(character, '+' | '-' | ' '))
			.unwrap_or(0);
		let split = if text[split..].starts_with("0x") || text[split..].starts_with("0X") {
			split + 2
		} else {
			split
		};
		format!("{}{}{}", &text[..split], "0".repeat(fill), &text[split..])
	} else {
		" ".repeat(fill) + &text
	}
}

fn signed(spec: &Spec, text: String) -> String {
	if text.starts_with('-') {
		text
	} else if spec.plus {
		format!("+{}", text)
	} else if spec.space {
		format!(" {}", text)
	} else {
		text
	}
}

fn integer(spec: &Spec, value: i64) -> String {
	let mut digits = value.unsigned_abs().to_string();
	if let Some(precision) = spec.precision {
		if precision == 0 && value == 0 {digits.clear()}
		if digits.len() < precision {digits = "0".repeat(precision - digits.len()) + &digits}
	}
	let text = if value < 0 {format!("-{}", digits)} else {digits};
	pad(spec, signed(spec, text), spec.precision.is_none())
}

fn unsigned(spec: &Spec, value: i64) -> String {
	let value = value as u64;
	let mut digits = match spec.conversion {
		'x' => format!("{:x}", value),
		'X' => format!("{:X}", value),
		_ => format!("{:o}", value)
	};
	if let Some(precision) = spec.precision {
		if digits.len() < precision {digits = "0".repeat(precision - digits.len()) + &digits}
	}
	if spec.alternate && value != 0 {
		digits = match spec.conversion {
			'x' => format!("0x{}", digits),
			'X' => format!("0X{}", digits),
			_ if !digits.starts_with('0') => format!("0{}", digits),
			_ => digits
		};
	}
	pad(spec, digits, spec.precision.is_none())
}

fn float(spec: &Spec, value: f64) -> String {
	let upper = spec.conversion.is_ascii_uppercase();
	let text = if value.is_finite() {
		let precision = spec.precision.unwrap_or(6);
		match spec.conversion.to_ascii_lowercase() {
			'f' => format!("{:.*}", precision, value),
			'e' => exponent(value, precision),
			_ => {
				let general = number::format_general(value, precision.max(1));
				if spec.alternate && !general.contains(['.', 'e']) {general + "."} else {general}
			}
		}
	} else if value.is_nan() {
		"nan".to_owned()
	} else if value < 0.0 {
		"-inf".to_owned()
	} else {
		"inf".to_owned()
	};

	let text = if upper {text.to_uppercase()} else {text};
	pad(spec, signed(spec, text), value.is_finite())
}

/// C's `%.{precision}e`.
fn exponent(value: f64, precision: usize) -> String {
	let formatted = format!("{:.*e}", precision, value);
	let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
	let exponent: i32 = exponent.parse().unwrap_or(0);
	format!("{}e{}{:02}", mantissa, if exponent < 0 {'-'} else {'+'}, exponent.abs())
}

/// C's `%a`.
fn hex_float(value: f64) -> String {
	if value.is_nan() {return "nan".to_owned()}
	if value.is_infinite() {return if value < 0.0 {"-inf".to_owned()} else {"inf".to_owned()}}

	let sign = if value.is_sign_negative() {"-"} else {""};
	if value == 0.0 {return format!("{}0x0p+0", sign)}

	let bits = value.to_bits();
	let biased = ((bits >> 52) & 0x7ff) as i64;
	let mantissa = bits & 0x000f_ffff_ffff_ffff;
	let (lead, exponent) = if biased == 0 {(0, -1022)} else {(1, biased - 1023)};

	let fraction = format!("{:013x}", mantissa);
	let fraction = fraction.trim_end_matches('0');
	let fraction = if fraction.is_empty() {String::new()} else {format!(".{}", fraction)};
	format!("{}0x{}{}p{}{}", sign, lead, fraction, if exponent < 0 {'-'} else {'+'},
		exponent.abs())
}

fn quote(value: &Value) -> String {
	match value {
		Value::String(string) => {
			let mut quoted = String::from("\"");
			let mut characters = string.chars().peekable();
			while let Some(character) = characters.next() {
				match character {
					'"' | '\\' | '\n' => {quoted.push('\\'); quoted.push(character)},
					'\r' => quoted.push_str("\\r"),
					control if (control as u32) < 32 => {
						let next_is_digit = characters.peek().map_or(false, char::is_ascii_digit);
						if next_is_digit {
							quoted.push_str(&format!("\\{:03}", control as u32));
						} else {
							quoted.push_str(&format!("\\{}", control as u32));
						}
					},
					other => quoted.push(other)
				}
			}
			quoted.push('"');
			quoted
		},
		Value::Float(float) if float.is_nan() => "(0/0)".to_owned(),
		Value::Float(float) if float.is_infinite() =>
			if *float < 0.0 {"-1e9999".to_owned()} else {"1e9999".to_owned()},
		Value::Float(float) if float.fract() == 0.0 && *float != 0.0 =>
			format!("{}", *float as i64),
		Value::Float(float) => hex_float(*float),
		other => other.to_string()
	}
}
