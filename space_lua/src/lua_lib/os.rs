//! The `os` library: time and dates only.

use self::super::{argument, bad_argument, check_number, check_string, check_table};
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
use chrono::{
	DateTime, Datelike, Duration, Local, Months, NaiveDate, TimeZone, Timelike, Utc
};
use std::{fmt::Display, time::Instant};

/// Conversions `os.date` understands.
const CONVERSIONS: &str = "YyCmdejHIMSpAawubhBUWVGgcxXDFRTrsntZz%";

fn field(frame: &StackFrame, table: &Table, name: &str, default: Option<i64>) -> Result<i64> {
	match table.get_str(name) {
		Value::Nil => default.ok_or_else(|| LuaError::runtime(
			format!("field '{}' missing in date table", name), frame)),
		value => number::to_integer(&value).ok_or_else(|| LuaError::runtime(
			format!("field '{}' is not an integer", name), frame))
	}
}

/// Seconds since the epoch for a date table, read as local time. Fields out
/// of their usual range carry over.
fn timestamp(frame: &StackFrame, table: &Table) -> Result<i64> {
	let year = field(frame, table, "year", None)?;
	let month = field(frame, table, "month", None)?;
	let day = field(frame, table, "day", None)?;
	let hour = field(frame, table, "hour", Some(12))?;
	let minute = field(frame, table, "min", Some(0))?;
	let second = field(frame, table, "sec", Some(0))?;

	let invalid = || LuaError::runtime(
		"time result cannot be represented in this installation", frame);
	let (year, month) = (year + (month - 1).div_euclid(12), (month - 1).rem_euclid(12));
	let date = i32::try_from(year).ok()
		.and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
		.and_then(|date| date.checked_add_months(Months::new(month as u32)))
		.ok_or_else(invalid)?;
	let offset = Duration::try_days(day - 1)
		.zip(Duration::try_hours(hour))
		.zip(Duration::try_minutes(minute))
		.and_then(|((days, hours), minutes)| days.checked_add(&hours)?.checked_add(&minutes))
		.and_then(|offset| offset.checked_add(&Duration::try_seconds(second)?))
		.ok_or_else(invalid)?;
	let time = date.and_hms_opt(0, 0, 0)
		.and_then(|time| time.checked_add_signed(offset))
		.ok_or_else(invalid)?;

	Local.from_local_datetime(&time).earliest()
		.map(|time| time.timestamp())
		.ok_or_else(invalid)
}

pub fn time(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	Ok(vec![Value::Integer(match argument(&arguments, 0) {
		Value::Nil => Utc::now().timestamp(),
		_ => timestamp(frame, &*check_table(frame, &arguments, 0, "time")?)?
	})])
}

pub fn difftime(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let end = check_number(frame, &arguments, 0, "difftime")?.float();
	let start = match argument(&arguments, 1) {
		Value::Nil => 0.0,
		_ => check_number(frame, &arguments, 1, "difftime")?.float()
	};
	Ok(vec![Value::Float(end - start)])
}

fn date_table<Tz: TimeZone>(time: &DateTime<Tz>, local: bool) -> Value {
	let table = lua_table! {
		year = time.year() as i64,
		month = time.month() as i64,
		day = time.day() as i64,
		hour = time.hour() as i64,
		min = time.minute() as i64,
		sec = time.second() as i64,
		wday = time.weekday().number_from_sunday() as i64,
		yday = time.ordinal() as i64
	};
	if local {table.set_str("isdst", Value::Boolean(false))}
	table.into()
}

/// Formats with C `strftime` conversions, rejecting any this doesn't know.
fn render<Tz: TimeZone>(time: &DateTime<Tz>, format: &str) -> std::result::Result<String, String>
		where Tz::Offset: Display {
	let mut characters = format.chars();
	while let Some(character) = characters.next() {
		if character != '%' {continue}
		match characters.next() {
			Some(conversion) if CONVERSIONS.contains(conversion) => (),
			Some(conversion) => return Err(format!("invalid conversion specifier '%{}'", conversion)),
			None => return Err("invalid conversion specifier '%'".to_owned())
		}
	}
	Ok(time.format(format).to_string())
}

pub fn date(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let format = match argument(&arguments, 0) {
		Value::Nil => "%c".to_owned(),
		_ => check_string(frame, &arguments, 0, "date")?
	};
	let seconds = match argument(&arguments, 1) {
		Value::Nil => Utc::now().timestamp(),
		_ => number::to_integer(&arguments[1]).ok_or_else(|| bad_argument(frame, 2, "date",
			"number has no integer representation"))?
	};
	let time = DateTime::from_timestamp(seconds, 0)
		.ok_or_else(|| bad_argument(frame, 2, "date", "time out-of-bounds"))?;

	let (format, utc) = match format.strip_prefix('!') {
		Some(format) => (format, true),
		None => (format.as_str(), false)
	};
	let result = match (format, utc) {
		("*t", true) => return Ok(vec![date_table(&time, false)]),
		("*t", false) => return Ok(vec![date_table(&time.with_timezone(&Local), true)]),
		(format, true) => render(&time, format),
		(format, false) => render(&time.with_timezone(&Local), format)
	};
	result.map(|string| vec![Value::from(string)])
		.map_err(|message| bad_argument(frame, 1, "date", message))
}

pub fn library() -> Table {
	let started = Instant::now();

	lua_table! {
		time = Function::sync("time", time),
		difftime = Function::sync("difftime", difftime),
		date = Function::sync("date", date),
		clock = Function::sync("clock", move |_, _|
			Ok(vec![Value::Float(started.elapsed().as_secs_f64())]))
	}
}
