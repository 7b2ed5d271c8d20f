pub use self::super::{env::Env, table::Table};
use self::super::{convert::HostFunction, deferred::Deferred, frame::StackFrame, number};
use crate::{ast::syntax::FunctionBody, error::Result};
use std::{
	fmt::{Debug, Display, Formatter, Result as FMTResult},
	hash::{Hash, Hasher},
	sync::Arc
};

macro_rules! value_conversions {
	(
		impl$(<$($param:tt),*>)? for $convert:ident @ $for:ty $code:block
		$($rest:tt)*
	) => {
		impl$(<$($param),*>)? From<$for> for Value {
			fn from($convert: $for) -> Value {
				$code
			}
		}

		value_conversions! {$($rest)*}
	};
	() => {}
}

#[macro_export]
macro_rules! lua_value {
	($raw:literal) => {$crate::vm::value::Value::from($raw)};
	($($other:tt)*) => {$crate::vm::value::Value::Table(lua_table! {$($other)*}.arc())}
}

#[macro_export]
macro_rules! lua_table {
	($($arm:tt)*) => {{
		#[allow(unused_assignments, unused_mut, unused_variables, unused_imports)]
		{
			use $crate::{vm::value::{Table, Value}, lua_table_inner, lua_value};

			let table = Table::new();
			let mut counter = 1;

			lua_table_inner!(table counter {$($arm)*});

			table
		}
	}}
}

#[macro_export]
macro_rules! lua_table_inner {
	($table:ident $counter:ident {[$key:expr] = $value:expr $(, $($rest:tt)*)?}) => {
		{
			let key = Value::from(lua_table_inner!($key));
			if $table.set(key, Value::from(lua_table_inner!($value))).is_err() {
				panic!("attempt to use a nil value as a key in lua_table macro")
			}
		}

		lua_table_inner!($table $counter {$($($rest)*)?});
	};
	($table:ident $counter:ident {$key:ident = $value:expr $(, $($rest:tt)*)?}) => {
		{
			$table.set_str(stringify!($key), Value::from(lua_table_inner!($value)));
		}

		lua_table_inner!($table $counter {$($($rest)*)?});
	};
	($table:ident $counter:ident {$value:expr $(, $($rest:tt)*)?}) => {
		{
			let _ = $table.set(Value::Integer($counter), Value::from(lua_table_inner!($value)));
			$counter += 1;
		}

		lua_table_inner!($table $counter {$($($rest)*)?});
	};
	($table:ident $counter:ident {$($rest:tt)*}) => {};

	($value:literal) => {lua_value!($value)};
	($value:expr) => {$value}
}

/// Builds the values of a call result.
#[macro_export]
macro_rules! lua_tuple {
	($($value:expr),* $(,)?) => {{
		#[allow(unused_imports)]
		use $crate::vm::value::Value;
		vec![$(Value::from($value)),*] as Vec<Value>
	}}
}

/// A function implemented in Rust that works on Lua values directly.
pub type NativeFunction = dyn Fn(&StackFrame, Vec<Value>)
	-> Result<Deferred<'static, Vec<Value>>> + Send + Sync;

/// Represents a lua value.
#[derive(Clone, Default)]
pub enum Value {
	#[default]
	Nil,
	Boolean(bool),
	Integer(i64),
	Float(f64),
	String(Arc<str>),
	Table(Arc<Table>),
	Function(Function),
	/// The results of a call or `...`, only ever seen inside expression
	/// evaluation. Anything that stores a value stores its first element.
	MultiResult(Vec<Value>)
}

impl Value {
	pub fn new_string(string: impl AsRef<str>) -> Self {
		Self::String(string.as_ref().into())
	}

	pub fn type_name(&self) -> &'static str {
		match self {
			Self::Nil => "nil",
			Self::Boolean(_) => "boolean",
			Self::Integer(_) | Self::Float(_) => "number",
			Self::String(_) => "string",
			Self::Table(_) => "table",
			Self::Function(_) => "function",
			Self::MultiResult(values) => values.first().map(Value::type_name).unwrap_or("nil")
		}
	}

	/// Coerces this value to a bool. Only nil and false are false.
	pub fn coerce_to_bool(&self) -> bool {
		match self {
			Self::Nil | Self::Boolean(false) => false,
			Self::MultiResult(values) => values.first().is_some_and(Value::coerce_to_bool),
			_ => true
		}
	}

	pub fn is_nil(&self) -> bool {
		match self {
			Self::Nil => true,
			Self::MultiResult(values) => values.first().map_or(true, Value::is_nil),
			_ => false
		}
	}

	/// The first value of a multiple result, or the value itself.
	pub fn single(self) -> Self {
		match self {
			Self::MultiResult(values) => values.into_iter().next()
				.map(Value::single).unwrap_or(Value::Nil),
			value => value
		}
	}

	/// Every value of a multiple result, or just the value itself.
	pub fn into_values(self) -> Vec<Value> {
		match self {
			Self::MultiResult(values) => values,
			value => vec![value]
		}
	}

	pub fn integer(&self) -> Option<i64> {
		match self {
			Self::Integer(integer) => Some(*integer),
			Self::Float(float) => number::float_to_integer(*float),
			_ => None
		}
	}

	pub fn number(&self) -> Option<f64> {
		match self {
			Self::Integer(integer) => Some(*integer as f64),
			Self::Float(float) => Some(*float),
			_ => None
		}
	}

	pub fn string(&self) -> Option<&str> {
		match self {
			Self::String(string) => Some(string),
			_ => None
		}
	}

	pub fn boolean(&self) -> Option<bool> {
		match self {
			Self::Boolean(boolean) => Some(*boolean),
			_ => None
		}
	}

	pub fn table(&self) -> Option<&Arc<Table>> {
		match self {
			Self::Table(table) => Some(table),
			_ => None
		}
	}

	pub fn function(&self) -> Option<&Function> {
		match self {
			Self::Function(function) => Some(function),
			_ => None
		}
	}

	/// The metatable of this value, if it has one. Only tables carry their
	/// own; strings share the string library through the evaluator.
	pub fn metatable(&self) -> Option<Arc<Table>> {
		match self {
			Self::Table(table) => table.metatable(),
			_ => None
		}
	}

	/// Looks a metamethod up without triggering any other metamethod.
	pub fn metamethod(&self, name: &str) -> Option<Value> {
		self.metatable()
			.map(|metatable| metatable.get_str(name))
			.filter(|value| !value.is_nil())
	}

	/// Converts numbers and strings to a string, the way concatenation does.
	pub fn coerce_to_string(&self) -> Option<String> {
		match self {
			Self::String(string) => Some(string.to_string()),
			Self::Integer(integer) => Some(integer.to_string()),
			Self::Float(float) => Some(number::format_float(*float)),
			_ => None
		}
	}

	/// Normalizes a value for use as a table key. Floats with an exact
	/// integer representation become integers, so `t[1.0]` is `t[1]`.
	pub fn into_key(self) -> Self {
		match self {
			Self::Float(float) => match number::float_to_integer(float) {
				Some(integer) => Self::Integer(integer),
				None => Self::Float(float)
			},
			Self::MultiResult(_) => self.single().into_key(),
			key => key
		}
	}

	pub(super) fn write(&self, f: &mut Formatter, seen: &mut Vec<*const Table>) -> FMTResult {
		match self {
			Self::Nil => write!(f, "nil"),
			Self::Boolean(boolean) => write!(f, "{}", boolean),
			Self::Integer(integer) => write!(f, "{}", integer),
			Self::Float(float) => write!(f, "{}", number::format_float(*float)),
			Self::String(string) => write!(f, "{}", string),
			Self::Table(table) => table.write(f, seen),
			Self::Function(function) => write!(f, "{}", function),
			Self::MultiResult(values) => match values.first() {
				Some(value) => value.write(f, seen),
				None => write!(f, "nil")
			}
		}
	}
}

/// The plain `tostring` form, without consulting `__tostring`. Tables
/// render their contents, array part first.
impl Display for Value {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		self.write(f, &mut Vec::new())
	}
}

impl Debug for Value {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::String(string) => Debug::fmt(string, f),
			Self::MultiResult(values) => f.debug_list().entries(values).finish(),
			other => Display::fmt(other, f)
		}
	}
}

/// Raw equality: numbers compare by value across subtypes, tables and
/// functions by identity.
impl PartialEq for Value {
	fn eq(&self, other: &Value) -> bool {
		match (self, other) {
			(Self::Nil, Self::Nil) => true,
			(Self::Boolean(a), Self::Boolean(b)) => a == b,
			(Self::Integer(a), Self::Integer(b)) => a == b,
			(Self::Float(a), Self::Float(b)) => a == b,
			(Self::Integer(integer), Self::Float(float))
				| (Self::Float(float), Self::Integer(integer)) =>
					number::float_to_integer(*float) == Some(*integer),
			(Self::String(a), Self::String(b)) => a == b,
			(Self::Table(a), Self::Table(b)) => Arc::ptr_eq(a, b),
			(Self::Function(a), Self::Function(b)) => a == b,
			(Self::MultiResult(a), Self::MultiResult(b)) => a == b,
			_ => false
		}
	}
}

// Table keys are never NaN, the one value not equal to itself.
impl Eq for Value {}

impl Hash for Value {
	fn hash<H>(&self, state: &mut H)
			where H: Hasher {
		match self {
			Self::Nil => 0u8.hash(state),
			Self::Boolean(boolean) => boolean.hash(state),
			Self::Integer(integer) => integer.hash(state),
			Self::Float(float) => match number::float_to_integer(*float) {
				Some(integer) => integer.hash(state),
				None => float.to_bits().hash(state)
			},
			Self::String(string) => string.hash(state),
			Self::Table(table) => Arc::as_ptr(table).hash(state),
			Self::Function(function) => function.address().hash(state),
			Self::MultiResult(values) => values.hash(state)
		}
	}
}

value_conversions! {
	impl for value @ i64 {Value::Integer(value)}
	impl for value @ i32 {Value::Integer(value as i64)}
	impl for value @ usize {Value::Integer(value as i64)}
	impl for value @ f64 {Value::Float(value)}
	impl<'r> for value @ &'r str {Value::String(value.into())}
	impl for value @ String {Value::String(value.into())}
	impl for value @ Arc<str> {Value::String(value)}
	impl for value @ bool {Value::Boolean(value)}
	impl for value @ Table {Value::Table(value.arc())}
	impl for value @ Arc<Table> {Value::Table(value)}
	impl for value @ Function {Value::Function(value)}
	impl for _value @ () {Value::Nil}
	impl for value @ Option<Value> {value.unwrap_or_default()}
	impl<'r> for value @ &'r Value {value.clone()}
}

/// Anything callable.
#[derive(Clone)]
pub enum Function {
	/// A function written in Lua.
	Closure(Arc<Closure>),
	/// A function written in Rust that works on Lua values.
	Builtin(Arc<Builtin>),
	/// A host function working on converted values.
	Host(Arc<HostFunction>)
}

impl Function {
	pub fn builtin(name: &'static str, function: impl Fn(&StackFrame, Vec<Value>)
			-> Result<Deferred<'static, Vec<Value>>> + Send + Sync + 'static) -> Self {
		Self::Builtin(Arc::new(Builtin {name, function: Box::new(function)}))
	}

	/// A builtin that never suspends.
	pub fn sync(name: &'static str, function: impl Fn(&StackFrame, Vec<Value>)
			-> Result<Vec<Value>> + Send + Sync + 'static) -> Self {
		Self::builtin(name, move |frame, arguments|
			function(frame, arguments).map(Deferred::Ready))
	}

	fn address(&self) -> *const u8 {
		match self {
			Self::Closure(closure) => Arc::as_ptr(closure) as *const u8,
			Self::Builtin(builtin) => Arc::as_ptr(builtin) as *const u8,
			Self::Host(host) => Arc::as_ptr(host) as *const u8
		}
	}
}

impl PartialEq for Function {
	fn eq(&self, other: &Function) -> bool {
		std::ptr::eq(self.address(), other.address())
	}
}

impl Display for Function {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::Closure(closure) => write!(f, "<lua-function ({})>", closure.body.signature()),
			Self::Builtin(_) | Self::Host(_) => write!(f, "<builtin lua function>")
		}
	}
}

impl Debug for Function {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name),
			other => Display::fmt(other, f)
		}
	}
}

/// A Lua function and the scope it was created in.
pub struct Closure {
	pub body: Arc<FunctionBody>,
	pub env: Env
}

pub struct Builtin {
	pub name: &'static str,
	pub function: Box<NativeFunction>
}

#[cfg(test)]
pub(crate) mod tests {
	use self::super::{Function, Table, Value};
	use std::sync::Arc;

	macro_rules! assert_table_eq {
		($left:expr, $right:expr) => {{
			let left = $left;
			let right = $right;
			if !$crate::vm::value::tests::table_matches(&left, &right) {
				panic!("left != right\nleft: {:?}\nright: {:?}", &left, &right)
			}
		}}
	}

	macro_rules! assert_value_eq {
		($left:expr, $right:expr) => {{
			let left = $left;
			let right = $right;
			if !$crate::vm::value::tests::value_matches(&left, &right) {
				panic!("left != right\nleft: {:?}\nright: {:?}", &left, &right)
			}
		}}
	}

	pub(crate) use {assert_table_eq, assert_value_eq};

	/// Structural equality, comparing tables by contents.
	pub(crate) fn value_matches(a: &Value, b: &Value) -> bool {
		match (a, b) {
			(Value::Table(a), Value::Table(b)) => Arc::ptr_eq(a, b) || table_matches(a, b),
			(Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
			(a, b) => a == b
		}
	}

	pub(crate) fn table_matches(a: &Table, b: &Table) -> bool {
		let (pairs_a, pairs_b) = (a.pairs(), b.pairs());
		pairs_a.len() == pairs_b.len() && pairs_a.iter()
			.all(|(key, value)| value_matches(value, &b.get(key)))
	}

	#[test]
	fn test_lua_value_literal() {
		assert_eq!(lua_value!(12), Value::Integer(12));
		assert_eq!(lua_value!("epic sauce"), Value::String("epic sauce".into()));
		assert_eq!(lua_value!(true), Value::Boolean(true));
	}

	#[test]
	fn test_lua_value_table() {
		let raw_string = "this is a string i think";
		let string = Value::from("this is in a quantum state of being a string, and being an enum");
		let raw_value = true;
		let value = Value::Boolean(false);

		let table = lua_table! {1, "hello", item = true, [raw_string] = value.clone(), 9,
			[string.clone()] = raw_value, 4};
		assert_eq!(table.length(), 4);
		assert_eq!(table.get_str("item"), Value::Boolean(true));
		assert_eq!(table.get_str(raw_string), Value::Boolean(false));

		assert_value_eq!(
			lua_value! {1, "hello", item = true, [raw_string] = value, 9,
				[string] = raw_value, 4},
			Value::Table(table.arc())
		)
	}

	#[test]
	fn test_lua_tuple() {
		let function = Function::sync("identity", |_, arguments| Ok(arguments));
		let tuple = lua_tuple![8, true, "hello", function.clone()];
		assert_eq!(tuple, vec![Value::Integer(8), Value::Boolean(true),
			Value::from("hello"), Value::Function(function)]);
	}

	#[test]
	fn test_number_equality() {
		assert_eq!(Value::Integer(1), Value::Float(1.0));
		assert_ne!(Value::Integer(1), Value::Float(1.5));
		assert_eq!(Value::Float(2.0).into_key(), Value::Integer(2));
		assert!(matches!(Value::Float(-0.0).into_key(), Value::Integer(0)));
	}

	#[test]
	fn test_display() {
		assert_eq!(Value::Float(3.0).to_string(), "3.0");
		assert_eq!(Value::Float(0.5).to_string(), "0.5");
		assert_eq!(lua_value! {1, 2, name = "x"}.to_string(), "{1, 2, name = x}");
		assert_eq!(Function::sync("f", |_, _| Ok(vec![])).to_string(),
			"<builtin lua function>");
	}

	#[test]
	fn test_display_cycle() {
		let table = Table::new().arc();
		table.set_str("me", Value::Table(table.clone()));
		assert_eq!(Value::Table(table).to_string(), "{me = <circular reference>}");
	}

	#[test]
	fn test_multi_result() {
		let multi = Value::MultiResult(vec![Value::Nil, Value::Integer(2)]);
		assert!(!multi.coerce_to_bool());
		assert_eq!(multi.clone().single(), Value::Nil);
		assert_eq!(Value::MultiResult(vec![]).single(), Value::Nil);
		assert_eq!(multi.into_values().len(), 2);
	}
}
