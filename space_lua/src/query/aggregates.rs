//! Aggregate functions for grouped queries.
//!
//! An aggregate folds the values of a group: `initialize(ctx)` makes the
//! starting state, `iterate(state, value, ctx)` folds in one value and the
//! optional `finish(state, ctx)` produces the result. The built in aggregates
//! are implemented natively; configuration may replace any of them, or add
//! new ones, under `aggregates.<name>`.

use self::super::config::Config;
use crate::{
	ast::syntax::BinaryOperator,
	error::Result,
	lua_table,
	vm::{
		frame::StackFrame,
		operators,
		table::Table,
		value::Value
	}
};
use log::warn;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Builtin {
	Sum,
	Count,
	Min,
	Max,
	Avg,
	ArrayAgg
}

impl Builtin {
	pub fn from_name(name: &str) -> Option<Self> {
		Some(match name {
			"sum" => Self::Sum,
			"count" => Self::Count,
			"min" => Self::Min,
			"max" => Self::Max,
			"avg" => Self::Avg,
			"array_agg" => Self::ArrayAgg,
			_ => return None
		})
	}

	pub fn name(self) -> &'static str {
		match self {
			Self::Sum => "sum",
			Self::Count => "count",
			Self::Min => "min",
			Self::Max => "max",
			Self::Avg => "avg",
			Self::ArrayAgg => "array_agg"
		}
	}

	pub fn description(self) -> &'static str {
		match self {
			Self::Sum => "Sum of numeric values",
			Self::Count => "Count of values; count() with no argument counts all rows",
			Self::Min => "Minimum value",
			Self::Max => "Maximum value",
			Self::Avg => "Average of numeric values",
			Self::ArrayAgg => "Collect values into an array"
		}
	}
}

#[derive(Clone, Debug)]
pub enum Aggregate {
	Builtin(Builtin),
	/// Defined in configuration, with Lua functions.
	Defined {
		name: String,
		description: Option<String>,
		initialize: Value,
		iterate: Value,
		finish: Option<Value>
	}
}

impl Aggregate {
	/// The aggregate called `name`, preferring a configured one over the
	/// built in one.
	pub fn lookup(config: &Config, name: &str) -> Option<Self> {
		if let Some(defined) = config.get(&format!("aggregates.{}", name)) {
			match Self::defined(name, &defined) {
				Some(aggregate) => return Some(aggregate),
				None => warn!("ignoring aggregate override '{}', it needs initialize and iterate",
					name)
			}
		}
		Builtin::from_name(name).map(Self::Builtin)
	}

	fn defined(name: &str, value: &Value) -> Option<Self> {
		let table = value.table()?;
		let function = |key| Some(table.get_str(key)).filter(operators::callable);
		Some(Self::Defined {
			name: table.get_str("name").coerce_to_string().unwrap_or_else(|| name.to_owned()),
			description: table.get_str("description").coerce_to_string(),
			initialize: function("initialize")?,
			iterate: function("iterate")?,
			finish: function("finish")
		})
	}

	pub fn name(&self) -> &str {
		match self {
			Self::Builtin(builtin) => builtin.name(),
			Self::Defined {name, ..} => name
		}
	}

	pub fn description(&self) -> Option<&str> {
		match self {
			Self::Builtin(builtin) => Some(builtin.description()),
			Self::Defined {description, ..} => description.as_deref()
		}
	}

	/// Folds the values of one group.
	pub async fn run(&self, values: Vec<Value>, config: &Config, frame: &StackFrame)
			-> Result<Value> {
		match self {
			Self::Builtin(builtin) => fold(*builtin, values, frame).await,
			Self::Defined {name, initialize, iterate, finish, ..} => {
				let context: Value = lua_table! {
					name = name.as_str(),
					config = config.aggregate_config(name)
				}.into();

				let call = |function: &Value, arguments| operators::call(frame, function, arguments);
				let mut state = operators::first(call(initialize, vec![context.clone()])?
					.resolve().await?);
				for value in values {
					state = operators::first(call(iterate, vec![state, value, context.clone()])?
						.resolve().await?);
				}
				match finish {
					Some(finish) => Ok(operators::first(call(finish, vec![state, context])?
						.resolve().await?)),
					None => Ok(state)
				}
			}
		}
	}
}

async fn add(frame: &StackFrame, left: Value, right: Value) -> Result<Value> {
	operators::arithmetic(frame, BinaryOperator::Add, left, right)?.resolve().await
}

async fn fold(builtin: Builtin, values: Vec<Value>, frame: &StackFrame) -> Result<Value> {
	let values = values.into_iter().filter(|value| !value.is_nil());
	Ok(match builtin {
		Builtin::Sum => {
			let mut sum = Value::Integer(0);
			for value in values {sum = add(frame, sum, value).await?}
			sum
		},
		Builtin::Count => Value::from(values.count()),
		Builtin::Min | Builtin::Max => {
			let mut best = Value::Nil;
			for value in values {
				let replaces = best.is_nil() || match builtin {
					Builtin::Min => operators::less_than(frame, value.clone(), best.clone())?,
					_ => operators::less_than(frame, best.clone(), value.clone())?
				}.resolve().await?;
				if replaces {best = value}
			}
			best
		},
		Builtin::Avg => {
			let (mut sum, mut count) = (Value::Integer(0), 0usize);
			for value in values {
				sum = add(frame, sum, value).await?;
				count += 1;
			}
			match count {
				0 => Value::Nil,
				count => operators::arithmetic(frame, BinaryOperator::Divide, sum,
					Value::from(count))?.resolve().await?
			}
		},
		Builtin::ArrayAgg => Table::from_values(values.collect()).into()
	})
}

#[cfg(test)]
mod tests {
	use super::{Aggregate, Builtin};
	use crate::{
		ast::Context,
		lua_table, lua_tuple,
		query::config::{Config, TableConfig},
		vm::{frame::StackFrame, value::{Function, Value}}
	};
	use std::sync::Arc;

	#[tokio::test]
	async fn test_builtins() {
		let frame = StackFrame::detached(Context::default());
		let config = Config::default();
		let run = |name: &str, values: Vec<Value>| {
			let aggregate = Aggregate::lookup(&config, name).unwrap();
			let frame = frame.clone();
			let config = config.clone();
			async move {aggregate.run(values, &config, &frame).await.unwrap()}
		};

		assert_eq!(run("sum", lua_tuple![1, 2, (), 3]).await, Value::Integer(6));
		assert_eq!(run("count", lua_tuple![1, (), 3]).await, Value::Integer(2));
		assert_eq!(run("min", lua_tuple![4, 2, 8]).await, Value::Integer(2));
		assert_eq!(run("max", lua_tuple!["a", "c", "b"]).await, Value::from("c"));
		assert_eq!(run("max", lua_tuple![]).await, Value::Nil);
		assert_eq!(run("avg", lua_tuple![1, 2]).await, Value::Float(1.5));
		assert_eq!(run("avg", lua_tuple![]).await, Value::Nil);
		let collected = run("array_agg", lua_tuple![1, 2]).await;
		assert_eq!(collected.table().unwrap().array(), lua_tuple![1, 2]);
	}

	#[tokio::test]
	async fn test_overrides() {
		let initialize = Function::sync("initialize", |_, _| Ok(lua_tuple![1]));
		let iterate = Function::sync("iterate", |_, arguments| Ok(vec![Value::Integer(
			arguments[0].integer().unwrap_or(0) * arguments[1].integer().unwrap_or(1))]));
		let config = Config::new(Arc::new(TableConfig(lua_table! {
			aggregates = lua_table! {
				product = lua_table! {initialize = initialize, iterate = iterate},
				sum = lua_table! {name = "broken"}
			}
		}.arc())));

		let product = Aggregate::lookup(&config, "product").unwrap();
		assert_eq!(product.name(), "product");
		let frame = StackFrame::detached(Context::default());
		assert_eq!(product.run(lua_tuple![2, 3, 4], &config, &frame).await.unwrap(),
			Value::Integer(24));

		assert!(matches!(Aggregate::lookup(&config, "sum"), Some(Aggregate::Builtin(Builtin::Sum))));
		assert!(Aggregate::lookup(&config, "median").is_none());
	}
}
