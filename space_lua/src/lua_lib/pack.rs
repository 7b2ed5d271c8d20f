//! `string.pack`, `string.unpack` and `string.packsize`.
//!
//! Packed data is a binary string: one character per byte, from U+0000 to
//! U+00FF. Strings packed with `s`, `z` and `c` contribute their UTF-8
//! bytes, and `s` and `z` decode them again when unpacking.

use self::super::{bad_argument, check_integer, check_number, check_string, optional_integer};
use crate::{
	error::{LuaError, Result},
	vm::{frame::StackFrame, value::Value}
};

/// The size of a Lua integer, in bytes.
const INTEGER_SIZE: usize = 8;
/// What `!` without a size aligns to.
const NATIVE_ALIGN: usize = 8;
/// Integers may span up to this many bytes.
const MAX_INTEGER_SIZE: usize = 16;
/// `string.pack` output can't grow past this.
const MAX_SIZE: usize = 1 << 31;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Kind {
	Integer,
	Unsigned,
	Float,
	Double,
	/// A fixed size string.
	Char,
	/// A string preceded by its length.
	String,
	/// A zero terminated string.
	Zero,
	Padding,
	/// Aligns according to the option after it.
	Align,
	Nop
}

/// One option of a format, with the padding needed to align it.
#[derive(Clone, Copy, Debug)]
struct Item {
	kind: Kind,
	size: usize,
	padding: usize
}

#[derive(Clone, Copy, Debug)]
struct Header {
	little: bool,
	max_align: usize
}

/// Walks the options of a format string.
struct Format<'a> {
	format: &'a [u8],
	position: usize,
	header: Header
}

impl<'a> Format<'a> {
	fn new(format: &'a str) -> Self {
		Self {
			format: format.as_bytes(),
			position: 0,
			header: Header {little: cfg!(target_endian = "little"), max_align: 1}
		}
	}

	fn number(&mut self) -> Option<usize> {
		let start = self.position;
		let mut value: usize = 0;
		while let Some(digit) = self.format.get(self.position).filter(|byte| byte.is_ascii_digit()) {
			value = value.saturating_mul(10).saturating_add((digit - b'0') as usize);
			self.position += 1;
		}
		(self.position > start).then_some(value)
	}

	fn integer_size(&mut self, default: usize) -> STDResult<usize> {
		let size = self.number().unwrap_or(default);
		if !(1..=MAX_INTEGER_SIZE).contains(&size) {
			return Err(format!("integral size ({}) out of limits [1,{}]", size, MAX_INTEGER_SIZE))
		}
		Ok(size)
	}

	fn option(&mut self, header: &mut Header) -> STDResult<(Kind, usize)> {
		let option = self.format[self.position];
		self.position += 1;
		Ok(match option {
			b'b' => (Kind::Integer, 1),
			b'B' => (Kind::Unsigned, 1),
			b'h' => (Kind::Integer, 2),
			b'H' => (Kind::Unsigned, 2),
			b'i' => (Kind::Integer, self.integer_size(4)?),
			b'I' => (Kind::Unsigned, self.integer_size(4)?),
			b'l' | b'j' => (Kind::Integer, INTEGER_SIZE),
			b'L' | b'J' | b'T' => (Kind::Unsigned, INTEGER_SIZE),
			b'f' => (Kind::Float, 4),
			b'd' | b'n' => (Kind::Double, 8),
			b's' => (Kind::String, self.integer_size(INTEGER_SIZE)?),
			b'c' => match self.number() {
				Some(size) => (Kind::Char, size),
				None => return Err("missing size for format option 'c'".to_owned())
			},
			b'z' => (Kind::Zero, 0),
			b'x' => (Kind::Padding, 1),
			b'X' => (Kind::Align, 0),
			b' ' => (Kind::Nop, 0),
			b'<' => {header.little = true; (Kind::Nop, 0)},
			b'>' => {header.little = false; (Kind::Nop, 0)},
			b'=' => {header.little = cfg!(target_endian = "little"); (Kind::Nop, 0)},
			b'!' => {
				header.max_align = self.integer_size(NATIVE_ALIGN)?;
				(Kind::Nop, 0)
			},
			other => return Err(format!("invalid format option '{}'", other as char))
		})
	}

	/// The next option, aligned for data that is `total` bytes long so far.
	fn next(&mut self, total: usize) -> Option<STDResult<Item>> {
		if self.position >= self.format.len() {return None}
		Some(self.item(total))
	}

	fn item(&mut self, total: usize) -> STDResult<Item> {
		let mut header = self.header;
		let (kind, size) = self.option(&mut header)?;
		self.header = header;

		let mut align = size;
		if kind == Kind::Align {
			// The option after X only lends its size.
			let invalid = || "invalid next option for option 'X'".to_owned();
			if self.position >= self.format.len() {return Err(invalid())}
			let (next, next_size) = self.option(&mut header)?;
			if next == Kind::Char || next_size == 0 {return Err(invalid())}
			align = next_size;
		}

		let padding = if align <= 1 || kind == Kind::Char {0} else {
			let align = align.min(self.header.max_align);
			if !align.is_power_of_two() {
				return Err("format asks for alignment not power of 2".to_owned())
			}
			(align - (total & (align - 1))) & (align - 1)
		};
		Ok(Item {kind, size, padding})
	}
}

type STDResult<T> = std::result::Result<T, String>;

fn integer_bytes(value: i64, size: usize, little: bool) -> Vec<u8> {
	let mut bytes: Vec<u8> = (0..size).map(|index| match index < INTEGER_SIZE {
		true => (value >> (index * 8)) as u8,
		// Sign extension past the width of a Lua integer.
		false => if value < 0 {0xff} else {0}
	}).collect();
	if !little {bytes.reverse()}
	bytes
}

fn read_integer(bytes: &[u8], little: bool, signed: bool) -> STDResult<i64> {
	let mut bytes = bytes.to_vec();
	if !little {bytes.reverse()}

	let size = bytes.len();
	let mut value: u64 = 0;
	for (index, byte) in bytes.iter().take(INTEGER_SIZE).enumerate() {
		value |= (*byte as u64) << (index * 8);
	}

	if size < INTEGER_SIZE {
		if signed {
			let shift = 64 - size * 8;
			return Ok(((value << shift) as i64) >> shift)
		}
	} else if size > INTEGER_SIZE {
		let extension = if signed && (value as i64) < 0 {0xff} else {0};
		if bytes[INTEGER_SIZE..].iter().any(|byte| *byte != extension) {
			return Err(format!("{}-byte integer does not fit into Lua Integer", size))
		}
	}
	Ok(value as i64)
}

fn binary(bytes: &[u8]) -> Value {
	Value::from(bytes.iter().map(|byte| *byte as char).collect::<String>())
}

/// `string.pack(format, ...)`
pub fn pack(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let format = check_string(frame, &arguments, 0, "pack")?;
	let mut reader = Format::new(&format);
	let mut data = Vec::new();
	let mut index = 1;

	while let Some(item) = reader.next(data.len()) {
		let Item {kind, size, padding} = item.map_err(|error| LuaError::runtime(error, frame))?;
		let little = reader.header.little;
		data.resize(data.len() + padding, 0);

		match kind {
			Kind::Integer | Kind::Unsigned => {
				let value = check_integer(frame, &arguments, index, "pack")?;
				if size < INTEGER_SIZE {
					let fits = match kind {
						Kind::Integer => {
							let limit = 1i64 << (size * 8 - 1);
							(-limit..limit).contains(&value)
						},
						_ => (value as u64) < 1u64 << (size * 8)
					};
					if !fits {
						let message = match kind {
							Kind::Integer => "integer overflow",
							_ => "unsigned overflow"
						};
						return Err(bad_argument(frame, index + 1, "pack", message))
					}
				}
				data.extend(integer_bytes(value, size, little));
				index += 1;
			},

			Kind::Float => {
				let value = check_number(frame, &arguments, index, "pack")?.float() as f32;
				data.extend(if little {value.to_le_bytes()} else {value.to_be_bytes()});
				index += 1;
			},

			Kind::Double => {
				let value = check_number(frame, &arguments, index, "pack")?.float();
				data.extend(if little {value.to_le_bytes()} else {value.to_be_bytes()});
				index += 1;
			},

			Kind::Char => {
				let string = check_string(frame, &arguments, index, "pack")?;
				if string.len() > size {
					return Err(bad_argument(frame, index + 1, "pack", "string longer than given size"))
				}
				data.extend(string.as_bytes());
				data.resize(data.len() + size - string.len(), 0);
				index += 1;
			},

			Kind::String => {
				let string = check_string(frame, &arguments, index, "pack")?;
				if size < INTEGER_SIZE && string.len() as u64 >= 1u64 << (size * 8) {
					return Err(bad_argument(frame, index + 1, "pack",
						"string length does not fit in given size"))
				}
				data.extend(integer_bytes(string.len() as i64, size, little));
				data.extend(string.as_bytes());
				index += 1;
			},

			Kind::Zero => {
				let string = check_string(frame, &arguments, index, "pack")?;
				if string.contains('\0') {
					return Err(bad_argument(frame, index + 1, "pack", "string contains zeros"))
				}
				data.extend(string.as_bytes());
				data.push(0);
				index += 1;
			},

			Kind::Padding => data.push(0),
			Kind::Align | Kind::Nop => ()
		}

		if data.len() > MAX_SIZE {
			return Err(LuaError::runtime("resulting string too large", frame))
		}
	}

	Ok(vec![binary(&data)])
}

/// `string.packsize(format)`
pub fn packsize(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let format = check_string(frame, &arguments, 0, "packsize")?;
	let mut reader = Format::new(&format);
	let mut total = 0;

	while let Some(item) = reader.next(total) {
		let item = item.map_err(|error| LuaError::runtime(error, frame))?;
		if matches!(item.kind, Kind::String | Kind::Zero) {
			return Err(bad_argument(frame, 1, "packsize", "variable-length format"))
		}
		total += item.padding + item.size;
		if total > MAX_SIZE {
			return Err(bad_argument(frame, 1, "packsize", "format result too large"))
		}
	}

	Ok(vec![Value::Integer(total as i64)])
}

/// `string.unpack(format, data [, init])`, returning the values and the
/// position after them.
pub fn unpack(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let format = check_string(frame, &arguments, 0, "unpack")?;
	let data: Vec<u8> = check_string(frame, &arguments, 1, "unpack")?
		.chars().map(|character| character as u32 as u8).collect();

	let init = optional_integer(frame, &arguments, 2, "unpack", 1)?;
	let start = match init {
		init if init < 0 => (data.len() as i64 + init).max(0) as usize,
		0 => 0,
		init => init as usize - 1
	};
	if start > data.len() {
		return Err(bad_argument(frame, 3, "unpack", "initial position out of string"))
	}

	let too_short = || bad_argument(frame, 2, "unpack", "data string too short");
	let failed = |error: String| LuaError::runtime(error, frame);

	let mut reader = Format::new(&format);
	let mut position = start;
	let mut values = Vec::new();

	while let Some(item) = reader.next(position) {
		let Item {kind, size, padding} = item.map_err(failed)?;
		let little = reader.header.little;
		if padding + size > data.len() - position {
			return Err(too_short())
		}
		position += padding;
		let field = &data[position..position + size];

		match kind {
			Kind::Integer | Kind::Unsigned =>
				values.push(Value::Integer(read_integer(field, little, kind == Kind::Integer)
					.map_err(failed)?)),

			Kind::Float => {
				let mut bytes = [0; 4];
				bytes.copy_from_slice(field);
				let value = if little {f32::from_le_bytes(bytes)} else {f32::from_be_bytes(bytes)};
				values.push(Value::Float(value as f64));
			},

			Kind::Double => {
				let mut bytes = [0; 8];
				bytes.copy_from_slice(field);
				values.push(Value::Float(if little {f64::from_le_bytes(bytes)}
					else {f64::from_be_bytes(bytes)}));
			},

			Kind::Char => values.push(binary(field)),

			Kind::String => {
				let length = read_integer(field, little, false).map_err(failed)? as u64 as usize;
				let from = position + size;
				if length > data.len() - from {
					return Err(too_short())
				}
				values.push(Value::from(String::from_utf8_lossy(&data[from..from + length])
					.into_owned()));
				position += length;
			},

			Kind::Zero => {
				let length = data[position..].iter().position(|byte| *byte == 0)
					.ok_or_else(|| bad_argument(frame, 2, "unpack", "unfinished string for format 'z'"))?;
				values.push(Value::from(String::from_utf8_lossy(&data[position..position + length])
					.into_owned()));
				position += length + 1;
			},

			Kind::Padding | Kind::Align | Kind::Nop => ()
		}
		position += size;
	}

	values.push(Value::Integer(position as i64 + 1));
	Ok(values)
}

#[cfg(test)]
mod tests {
	use crate::{
		ast::Context,
		lua_tuple,
		vm::{frame::StackFrame, value::Value}
	};

	fn bytes(value: &Value) -> Vec<u8> {
		value.string().unwrap().chars().map(|character| character as u32 as u8).collect()
	}

	fn frame() -> StackFrame {
		StackFrame::detached(Context::default())
	}

	#[test]
	fn test_integers() {
		let packed = super::pack(&frame(), lua_tuple!["<i2>I3b", -2, 0x010203, 7]).unwrap();
		assert_eq!(bytes(&packed[0]), [0xfe, 0xff, 0x01, 0x02, 0x03, 0x07]);

		let unpacked = super::unpack(&frame(), vec![Value::from("<i2>I3b"), packed[0].clone()])
			.unwrap();
		assert_eq!(unpacked, lua_tuple![-2, 0x010203, 7, 7]);

		let wide = super::pack(&frame(), lua_tuple!["<i16", -1]).unwrap();
		assert_eq!(bytes(&wide[0]), [0xff; 16]);
		assert_eq!(super::unpack(&frame(), vec![Value::from("<i16"), wide[0].clone()]).unwrap(),
			lua_tuple![-1, 17]);
	}

	#[test]
	fn test_overflow_and_errors() {
		let error = super::pack(&frame(), lua_tuple!["b", 200]).unwrap_err();
		assert!(error.to_string().contains("integer overflow"), "{}", error);
		let error = super::pack(&frame(), lua_tuple!["B", -1]).unwrap_err();
		assert!(error.to_string().contains("unsigned overflow"), "{}", error);
		let error = super::pack(&frame(), lua_tuple!["i17", 1]).unwrap_err();
		assert!(error.to_string().contains("integral size (17) out of limits [1,16]"), "{}", error);
		let error = super::pack(&frame(), lua_tuple!["q", 1]).unwrap_err();
		assert!(error.to_string().contains("invalid format option 'q'"), "{}", error);
		let error = super::pack(&frame(), lua_tuple!["c", "x"]).unwrap_err();
		assert!(error.to_string().contains("missing size for format option 'c'"), "{}", error);
		let error = super::unpack(&frame(), lua_tuple!["i4", "ab"]).unwrap_err();
		assert!(error.to_string().contains("data string too short"), "{}", error);
	}

	#[test]
	fn test_strings() {
		let packed = super::pack(&frame(), lua_tuple!["<s1zc3", "hi", "there", "ab"]).unwrap();
		assert_eq!(bytes(&packed[0]), b"\x02hithere\0ab\0");
		assert_eq!(super::unpack(&frame(), vec![Value::from("<s1zc3"), packed[0].clone()])
			.unwrap(), lua_tuple!["hi", "there", "ab\0", 13]);

		let error = super::pack(&frame(), lua_tuple!["c1", "ab"]).unwrap_err();
		assert!(error.to_string().contains("string longer than given size"), "{}", error);
		let error = super::unpack(&frame(), lua_tuple!["z", "abc"]).unwrap_err();
		assert!(error.to_string().contains("unfinished string for format 'z'"), "{}", error);
	}

	#[test]
	fn test_floats_and_alignment() {
		let packed = super::pack(&frame(), lua_tuple![">!4 b d", 1, 0.5]).unwrap();
		assert_eq!(bytes(&packed[0]).len(), 12);
		assert_eq!(super::unpack(&frame(), vec![Value::from(">!4 b d"), packed[0].clone()])
			.unwrap(), lua_tuple![1, 0.5, 13]);

		assert_eq!(super::packsize(&frame(), lua_tuple!["i4i8"]).unwrap(), lua_tuple![12]);
		assert_eq!(super::packsize(&frame(), lua_tuple!["!i4i8"]).unwrap(), lua_tuple![16]);
		assert_eq!(super::packsize(&frame(), lua_tuple!["!bXi4"]).unwrap(), lua_tuple![4]);
		let error = super::packsize(&frame(), lua_tuple!["s"]).unwrap_err();
		assert!(error.to_string().contains("variable-length format"), "{}", error);
	}

	#[test]
	fn test_unpack_from_position() {
		let packed = super::pack(&frame(), lua_tuple!["bbb", 1, 2, 3]).unwrap();
		let data = packed[0].clone();
		assert_eq!(super::unpack(&frame(), vec![Value::from("b"), data.clone(), Value::from(2)])
			.unwrap(), lua_tuple![2, 3]);
		assert_eq!(super::unpack(&frame(), vec![Value::from("b"), data.clone(), Value::from(-1)])
			.unwrap(), lua_tuple![3, 4]);
		let error = super::unpack(&frame(), vec![Value::from("b"), data, Value::from(9)])
			.unwrap_err();
		assert!(error.to_string().contains("initial position out of string"), "{}", error);
	}
}
