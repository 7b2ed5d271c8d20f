//! The `encoding` library: standard base64 and UTF-8 byte sequences.

use self::super::{check_string, check_table};
use crate::{
	error::{LuaError, Result},
	lua_table,
	vm::{
		frame::StackFrame,
		number,
		table::Table,
		value::{Function, Value}
	}
};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

pub fn base64_encode(bytes: &[u8]) -> String {
	let mut output = String::with_capacity(bytes.len().div_ceil(3) * 4);
	for chunk in bytes.chunks(3) {
		let triple = (chunk[0] as u32) << 16
			| (chunk.get(1).copied().unwrap_or(0) as u32) << 8
			| chunk.get(2).copied().unwrap_or(0) as u32;
		for index in 0..4 {
			if index <= chunk.len() {
				output.push(ALPHABET[(triple >> (18 - 6 * index) & 0x3f) as usize] as char);
			} else {
				output.push('=');
			}
		}
	}
	output
}

/// Decodes padded or unpadded base64, ignoring whitespace.
pub fn base64_decode(input: &str) -> Option<Vec<u8>> {
	let mut output = Vec::with_capacity(input.len() / 4 * 3);
	let (mut buffer, mut bits) = (0u32, 0u32);
	for byte in input.bytes().filter(|byte| !byte.is_ascii_whitespace()) {
		if byte == b'=' {break}
		let value = ALPHABET.iter().position(|&character| character == byte)? as u32;
		buffer = buffer << 6 | value;
		bits += 6;
		if bits >= 8 {
			bits -= 8;
			output.push((buffer >> bits) as u8);
			buffer &= (1 << bits) - 1;
		}
	}
	Some(output)
}

fn encode(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "base64Encode")?;
	Ok(vec![Value::from(base64_encode(string.as_bytes()))])
}

fn decode(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "base64Decode")?;
	let bytes = base64_decode(&string)
		.ok_or_else(|| LuaError::runtime("invalid base64 input", frame))?;
	Ok(vec![Value::from(String::from_utf8_lossy(&bytes).into_owned())])
}

/// A string's UTF-8 bytes, as a sequence of integers.
fn utf8_encode(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let string = check_string(frame, &arguments, 0, "utf8Encode")?;
	let bytes = string.bytes().map(|byte| Value::Integer(byte as i64)).collect();
	Ok(vec![Table::from_values(bytes).into()])
}

fn utf8_decode(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let bytes = match arguments.first() {
		Some(Value::Table(table)) => table.array().iter()
			.map(|value| number::to_integer(value).and_then(|byte| u8::try_from(byte).ok()))
			.collect::<Option<Vec<_>>>()
			.ok_or_else(|| LuaError::runtime("utf8Decode expects a sequence of bytes", frame))?,
		_ => {
			check_table(frame, &arguments, 0, "utf8Decode")?;
			Vec::new()
		}
	};
	Ok(vec![Value::from(String::from_utf8_lossy(&bytes).into_owned())])
}

pub fn library() -> Table {
	lua_table! {
		base64Encode = Function::sync("base64Encode", encode),
		base64Decode = Function::sync("base64Decode", decode),
		utf8Encode = Function::sync("utf8Encode", utf8_encode),
		utf8Decode = Function::sync("utf8Decode", utf8_decode)
	}
}

#[cfg(test)]
mod tests {
	use super::{base64_decode, base64_encode};
	use crate::{
		ast::Context,
		lua_tuple,
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
	fn test_base64_padding() {
		assert_eq!(base64_encode(b"f"), "Zg==");
		assert_eq!(base64_encode(b"fo"), "Zm8=");
		assert_eq!(base64_encode(b"foo"), "Zm9v");
		assert_eq!(base64_decode("Zm9vYmFy").unwrap(), b"foobar");
		assert_eq!(base64_decode("Zg==").unwrap(), b"f");
		assert!(base64_decode("not*base64").is_none());
	}

	#[test]
	fn test_library() {
		assert_eq!(call("base64Encode", lua_tuple!["hello"]).unwrap(), lua_tuple!["aGVsbG8="]);
		assert_eq!(call("base64Decode", lua_tuple!["aGVsbG8="]).unwrap(), lua_tuple!["hello"]);

		let bytes = call("utf8Encode", lua_tuple!["é"]).unwrap();
		assert_eq!(bytes[0].table().unwrap().array(), lua_tuple![0xc3, 0xa9]);
		assert_eq!(call("utf8Decode", bytes).unwrap(), lua_tuple!["é"]);
	}
}
