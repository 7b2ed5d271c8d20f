//! Queries: `query[[from p = pages where p.size > 1 select p.name]]`.
//!
//! A query expression resolves the collection its `from` clause names and
//! hands it a [Query] describing every other clause. Collections that can't
//! do better scan their items and let [apply] run the clauses in memory, in
//! this order:
//!
//! 1. `where` filters items.
//! 2. `group by` buckets the remaining items into `{key, group}` rows.
//! 3. `having` filters rows.
//! 4. `order by` sorts, stably, by each key in turn.
//! 5. `select` projects, dropping rows that project to `nil`.
//! 6. Duplicates are removed.
//! 7. `limit` and its offset slice the result.
//!
//! Expressions see the fields of the item they're evaluated for as locals,
//! or the item alone under its name when the `from` clause names it. After
//! grouping, calls to aggregate functions such as `sum(salary)` run over the
//! items of the row's group, see [aggregates].

pub mod aggregates;
pub mod collection;
pub mod config;

pub use self::config::Config;

use self::{
	aggregates::{Aggregate, Builtin},
	config::StringOrder
};
use crate::{
	ast::syntax::{BinaryOperator, Expression, ExpressionKind, OrderKey, QueryClause, TableField},
	error::{LuaError, Result},
	lua_table,
	vm::{
		convert,
		deferred::{Deferred, LocalFuture},
		env::Env,
		eval::eval_single,
		frame::StackFrame,
		number,
		operators,
		table::Table,
		value::Value
	}
};
use hashbrown::HashMap;
use itertools::Itertools;
use log::debug;
use std::{cmp::Ordering, sync::Arc};

/// Every clause of a query but `from`, borrowed from the syntax tree.
#[derive(Clone, Debug, Default)]
pub struct Query<'a> {
	/// The name items are bound to, if the `from` clause gives one.
	pub object_variable: Option<&'a str>,
	pub filter: Option<&'a Expression>,
	pub group_by: Option<&'a [Arc<Expression>]>,
	pub having: Option<&'a Expression>,
	pub order_by: &'a [OrderKey],
	pub select: Option<&'a Expression>,
	pub limit: Option<usize>,
	pub offset: Option<usize>,
	pub distinct: bool
}

/// Evaluates a query expression to a sequence of results.
pub fn evaluate<'a>(clauses: &'a [QueryClause], env: &Env, frame: &StackFrame)
		-> Result<Deferred<'a, Value>> {
	let mut query = Query {distinct: true, ..Query::default()};
	let (mut from, mut bounds) = (None, None);
	for clause in clauses {
		match clause {
			QueryClause::From {name, expression} => {
				query.object_variable = name.as_deref();
				from = Some(expression);
			},
			QueryClause::Where(filter) => query.filter = Some(filter.as_ref()),
			QueryClause::GroupBy(keys) => query.group_by = Some(keys.as_slice()),
			QueryClause::Having(condition) => query.having = Some(condition.as_ref()),
			QueryClause::OrderBy(keys) => query.order_by = keys,
			QueryClause::Select(projection) => query.select = Some(projection.as_ref()),
			QueryClause::Limit {limit, offset} => bounds = Some((limit, offset.as_ref()))
		}
	}
	let from = from.ok_or_else(|| LuaError::runtime("No from clause found.", frame))?;
	debug!("query: {}", clauses.iter().join(" "));

	let (env, frame) = (env.clone(), frame.clone());
	Deferred::poll_once(async move {
		let source = eval_single(from, &env, &frame)?.resolve().await?;
		if let Some((limit, offset)) = bounds {
			query.limit = Some(bound(limit, &env, &frame, "limit").await?);
			if let Some(offset) = offset {
				query.offset = Some(bound(offset, &env, &frame, "offset").await?);
			}
		}

		let collection = collection::resolve(&frame, source)?.resolve().await?;
		let rows = collection.query(&query, &env, &frame)?.resolve().await?;
		Ok(Value::Table(Table::from_values(rows).arc()))
	})
}

async fn bound(expression: &Expression, env: &Env, frame: &StackFrame, clause: &str)
		-> Result<usize> {
	let value = eval_single(expression, env, frame)?.resolve().await?;
	number::to_integer(&value)
		.and_then(|count| usize::try_from(count).ok())
		.ok_or_else(|| LuaError::runtime(
			format!("{} must be a non-negative integer, got {}", clause, value), frame))
}

/// Runs every clause of `query` over `items`.
pub fn apply<'a>(items: Vec<Value>, query: Query<'a>, env: Env, frame: StackFrame)
		-> Result<Deferred<'a, Vec<Value>>> {
	Deferred::poll_once(async move {
		Pipeline::new(query, env, frame).run(items).await
	})
}

/// Binds an item for evaluating an expression about it.
fn item_env(object_variable: Option<&str>, item: &Value, env: &Env) -> Env {
	let scope = env.child();
	match object_variable {
		Some(name) => scope.set_local(name, item.clone()),
		None => {
			scope.set_local("_", item.clone());
			if let Value::Table(table) = item {bind_fields(&scope, table)}
		}
	}
	scope
}

fn bind_fields(scope: &Env, table: &Table) {
	for (key, value) in table.pairs() {
		if let Value::String(key) = key {scope.set_local(&*key, value)}
	}
}

/// The name a group by key is bound to after grouping, if it has one.
fn key_name(expression: &Expression) -> Option<&str> {
	match &expression.kind {
		ExpressionKind::Variable(name) => Some(name),
		ExpressionKind::PropertyAccess {property, ..} => Some(property),
		_ => None
	}
}

/// Identifies values that are the same once serialized, for grouping and
/// removing duplicates.
fn fingerprint(value: &Value) -> String {
	let value = match value {
		Value::Float(float) => number::float_to_integer(*float)
			.map_or(Value::Float(*float), Value::Integer),
		other => other.clone()
	};
	format!("{}:{}", value.type_name(), convert::to_json(&value))
}

fn is_aggregate(config: &Config, name: &str) -> bool {
	Builtin::from_name(name).is_some() || config.get(&format!("aggregates.{}", name)).is_some()
}

/// Whether evaluating `expression` after grouping needs to run an aggregate.
fn contains_aggregate(expression: &Expression, config: &Config) -> bool {
	match &expression.kind {
		ExpressionKind::Call {prefix, arguments} => matches!(&prefix.kind,
				ExpressionKind::Variable(name) if is_aggregate(config, name))
			|| arguments.iter().any(|argument| contains_aggregate(argument, config)),
		ExpressionKind::Binary {left, right, ..} =>
			contains_aggregate(left, config) || contains_aggregate(right, config),
		ExpressionKind::Unary {operand, ..} => contains_aggregate(operand, config),
		ExpressionKind::Parenthesized(inner) => contains_aggregate(inner, config),
		ExpressionKind::Table(fields) => fields.iter().any(|field| match field {
			TableField::Positional(value) | TableField::Named(_, value) =>
				contains_aggregate(value, config),
			TableField::Keyed(key, value) =>
				contains_aggregate(key, config) || contains_aggregate(value, config)
		}),
		_ => false
	}
}

/// Orders two values of an `order by` key. `nil` sorts last, and values of
/// types that don't order against each other compare equal.
fn compare(a: &Value, b: &Value, descending: bool, order: &StringOrder) -> Ordering {
	let ordering = match (a, b) {
		(Value::Nil, Value::Nil) => return Ordering::Equal,
		(Value::Nil, _) => return if descending {Ordering::Less} else {Ordering::Greater},
		(_, Value::Nil) => return if descending {Ordering::Greater} else {Ordering::Less},
		(Value::Integer(a), Value::Integer(b)) => a.cmp(b),
		(Value::String(a), Value::String(b)) => order.compare(a, b),
		(Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
		(a, b) => match (a.number(), b.number()) {
			(Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
			_ => Ordering::Equal
		}
	};
	if descending {ordering.reverse()} else {ordering}
}

struct Row {
	item: Value,
	selected: Option<Value>,
	keys: Vec<Value>
}

#[derive(Clone)]
struct Pipeline<'a> {
	query: Query<'a>,
	env: Env,
	frame: StackFrame,
	config: Arc<Config>,
	/// The names group by keys are bound to after grouping.
	group_names: Vec<&'a str>
}

impl<'a> Pipeline<'a> {
	fn new(query: Query<'a>, env: Env, frame: StackFrame) -> Self {
		let group_names = query.group_by.unwrap_or_default().iter()
			.filter_map(|key| key_name(key))
			.collect();
		let config = frame.config().clone();
		Self {query, env, frame, config, group_names}
	}

	fn grouped(&self) -> bool {
		self.query.group_by.is_some()
	}

	async fn eval(&self, expression: &'a Expression, env: &Env) -> Result<Value> {
		eval_single(expression, env, &self.frame)?.resolve().await
	}

	async fn run(&self, items: Vec<Value>) -> Result<Vec<Value>> {
		let mut items = items;
		if let Some(filter) = self.query.filter {
			let mut kept = Vec::with_capacity(items.len());
			for item in items {
				let env = item_env(self.query.object_variable, &item, &self.env);
				if self.eval(filter, &env).await?.coerce_to_bool() {kept.push(item)}
			}
			items = kept;
		}

		if let Some(keys) = self.query.group_by {
			items = self.group(items, keys).await?;
		}

		if let Some(having) = self.query.having {
			let mut kept = Vec::with_capacity(items.len());
			for item in items {
				if self.row_value(having, &item, None).await?.coerce_to_bool() {kept.push(item)}
			}
			items = kept;
		}

		let mut rows = Vec::with_capacity(items.len());
		for item in items {
			// Grouped rows are projected before sorting so that keys can name
			// the projected fields.
			let selected = match self.query.select {
				Some(select) if self.grouped() => Some(self.row_value(select, &item, None).await?),
				_ => None
			};
			rows.push(Row {item, selected, keys: Vec::new()});
		}

		if !self.query.order_by.is_empty() {
			let order = self.config.collation().order();
			for row in &mut rows {
				let mut keys = Vec::with_capacity(self.query.order_by.len());
				for key in self.query.order_by {
					keys.push(self.row_value(&key.expression, &row.item, row.selected.as_ref()).await?);
				}
				row.keys = keys;
			}

			let order_by = self.query.order_by;
			rows.sort_by(|a, b| a.keys.iter().zip(&b.keys).zip(order_by)
				.map(|((a, b), key)| compare(a, b, key.descending, &order))
				.find(|ordering| ordering.is_ne())
				.unwrap_or(Ordering::Equal));
		}

		let mut results = Vec::with_capacity(rows.len());
		for row in rows {
			let result = match (self.query.select, row.selected) {
				(_, Some(selected)) => selected,
				(Some(select), None) => self.row_value(select, &row.item, None).await?,
				(None, None) => row.item
			};
			if !result.is_nil() {results.push(result)}
		}

		if self.query.distinct {
			let mut seen = HashMap::new();
			results.retain(|result| seen.insert(fingerprint(result), ()).is_none());
		}

		let offset = self.query.offset.unwrap_or(0).min(results.len());
		let mut results = results.split_off(offset);
		if let Some(limit) = self.query.limit {results.truncate(limit)}
		Ok(results)
	}

	/// Buckets items by the values of the group by keys, keeping the order
	/// each bucket was first seen in.
	async fn group(&self, items: Vec<Value>, keys: &'a [Arc<Expression>]) -> Result<Vec<Value>> {
		let mut index = HashMap::new();
		let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();

		for item in items {
			let env = item_env(self.query.object_variable, &item, &self.env);
			let mut parts = Vec::with_capacity(keys.len());
			for key in keys {
				parts.push(self.eval(key, &env).await?);
			}

			let id = parts.iter().map(fingerprint).join("\u{1f}");
			let position = *index.entry(id).or_insert_with(|| {
				let key = match parts.as_slice() {
					[single] => single.clone(),
					_ => {
						let table = Table::from_values(parts.clone());
						for (key, part) in keys.iter().zip(&parts) {
							if let Some(name) = key_name(key) {table.set_str(name, part.clone())}
						}
						table.into()
					}
				};
				groups.push((key, Vec::new()));
				groups.len() - 1
			});
			groups[position].1.push(item);
		}

		Ok(groups.into_iter()
			.map(|(key, group)| lua_table! {key = key, group = Table::from_values(group)}.into())
			.collect())
	}

	/// Binds a `{key, group}` row: the fields of its first item, the first
	/// item under the object variable, `key` and `group`, and the key's
	/// fields or, for a single named key, the key under that name.
	fn group_env(&self, row: &Value) -> Env {
		let scope = self.env.child();
		scope.set_local("_", row.clone());
		let Value::Table(table) = row else {return scope};

		let (key, group) = (table.get_str("key"), table.get_str("group"));
		let first = group.table().map(|group| group.get(&Value::Integer(1))).unwrap_or_default();
		if let Value::Table(first) = &first {bind_fields(&scope, first)}
		if let Some(name) = self.query.object_variable {
			scope.set_local(name, if first.is_nil() {row.clone()} else {first.clone()});
		}
		if !key.is_nil() {scope.set_local("key", key.clone())}
		if !group.is_nil() {scope.set_local("group", group)}

		match (&key, self.group_names.as_slice()) {
			(Value::Table(key), _) => bind_fields(&scope, key),
			(key, [name]) => scope.set_local(*name, key.clone()),
			_ => ()
		}
		scope
	}

	/// Evaluates an expression about a row, which is a group after grouping
	/// and an item otherwise. The fields of `selected` are visible too.
	async fn row_value(&self, expression: &'a Expression, row: &Value, selected: Option<&Value>)
			-> Result<Value> {
		let env = if self.grouped() {
			self.group_env(row)
		} else {
			item_env(self.query.object_variable, row, &self.env)
		};
		if let Some(Value::Table(selected)) = selected {bind_fields(&env, selected)}

		if !self.grouped() {return self.eval(expression, &env).await}
		let group = match row {
			Value::Table(table) => table.get_str("group"),
			_ => Value::Nil
		};
		self.aggregated(expression, &env, &group).await
	}

	/// Evaluates an expression with calls to aggregates folding `group`.
	fn aggregated(&self, expression: &'a Expression, env: &Env, group: &Value)
			-> LocalFuture<'a, Value> {
		let (this, env, group) = (self.clone(), env.clone(), group.clone());
		Box::pin(async move {
			if !contains_aggregate(expression, &this.config) {
				return this.eval(expression, &env).await
			}
			let at = this.frame.with_context(&expression.context);

			let call = match &expression.kind {
				ExpressionKind::Call {prefix, arguments} => match &prefix.kind {
					ExpressionKind::Variable(name) => Aggregate::lookup(&this.config, name)
						.map(|aggregate| (aggregate, arguments.first())),
					_ => None
				},
				_ => None
			};
			if let Some((aggregate, argument)) = call {
				let items = group.table().map(|group| group.array()).unwrap_or_default();
				let mut values = Vec::with_capacity(items.len());
				for item in items {
					values.push(match argument {
						Some(argument) => this.eval(argument,
							&item_env(this.query.object_variable, &item, &this.env)).await?,
						// count() counts rows.
						None => item
					});
				}
				return aggregate.run(values, &this.config, &at).await
			}

			match &expression.kind {
				ExpressionKind::Parenthesized(inner) => this.aggregated(inner, &env, &group).await,

				ExpressionKind::Binary {left, operator, right} => {
					let left = this.aggregated(left, &env, &group).await?;
					match operator {
						BinaryOperator::LogicalAnd if !left.coerce_to_bool() => Ok(left),
						BinaryOperator::LogicalOr if left.coerce_to_bool() => Ok(left),
						BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr =>
							this.aggregated(right, &env, &group).await,
						operator => {
							let right = this.aggregated(right, &env, &group).await?;
							operators::binary(&at, *operator, left, right)?.resolve().await
						}
					}
				},

				ExpressionKind::Unary {operator, operand} => {
					let operand = this.aggregated(operand, &env, &group).await?;
					operators::unary(&at, *operator, operand)?.resolve().await
				},

				ExpressionKind::Table(fields) => {
					let table = Table::new();
					let mut positional = Vec::new();
					for field in fields {
						match field {
							TableField::Positional(value) =>
								positional.push(this.aggregated(value, &env, &group).await?),
							TableField::Named(name, value) =>
								table.set_str(name, this.aggregated(value, &env, &group).await?),
							TableField::Keyed(key, value) => {
								let key = this.aggregated(key, &env, &group).await?;
								let value = this.aggregated(value, &env, &group).await?;
								table.set(key, value).map_err(|message| LuaError::runtime(message, &at))?;
							}
						}
					}
					for (index, value) in positional.into_iter().enumerate() {
						table.set(Value::from(index + 1), value)
							.map_err(|message| LuaError::runtime(message, &at))?;
					}
					Ok(table.into())
				},

				_ => this.eval(expression, &env).await
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::{Config, config::TableConfig};
	use crate::{
		ast,
		lua_lib::standard_globals,
		lua_table,
		vm::{
			deferred::Deferred,
			env::Env,
			eval,
			frame::{StackFrame, ThreadState},
			operators,
			table::Table,
			value::Value
		}
	};
	use std::sync::Arc;

	fn run_with(source: &str, config: Config) -> Result<Vec<Value>, String> {
		let globals = standard_globals();
		let thread = ThreadState::new(globals.clone(), Table::new().arc(), Arc::new(config),
			Arc::new(|path: &str| std::fs::read_to_string(path)));
		let frame = StackFrame::new(Arc::new(thread));
		let block = ast::parse(source, None).map_err(|error| error.to_string())?;
		let chunk = eval::chunk(block, Env::new(globals));
		match operators::call_function(&frame, &chunk, Vec::new()) {
			Ok(Deferred::Ready(values)) => Ok(values),
			Ok(Deferred::Pending(_)) => panic!("unexpectedly pending"),
			Err(error) => Err(error.to_string())
		}
	}

	fn run(source: &str) -> Vec<Value> {
		run_with(source, Config::default()).unwrap()
	}

	fn results_of(values: &[Value]) -> Vec<Value> {
		values[0].table().unwrap().array()
	}

	const EMPLOYEES: &str = "local employees = {
		{dept = 'eng', salary = 100, name = 'ada'},
		{dept = 'eng', salary = 200, name = 'bob'},
		{dept = 'sales', salary = 150, name = 'cy'}
	}";

	#[test]
	fn test_grouping_with_aggregates() {
		let result = run(&format!("{}
			return query[[from employees group by dept
				select {{dept = key, total = sum(salary), n = count(salary)}}]]", EMPLOYEES));
		let rows = results_of(&result);
		assert_eq!(rows.len(), 2);
		let eng = rows[0].table().unwrap();
		assert_eq!(eng.get_str("dept"), Value::from("eng"));
		assert_eq!(eng.get_str("total"), Value::Integer(300));
		assert_eq!(eng.get_str("n"), Value::Integer(2));
		let sales = rows[1].table().unwrap();
		assert_eq!(sales.get_str("dept"), Value::from("sales"));
		assert_eq!(sales.get_str("total"), Value::Integer(150));
		assert_eq!(sales.get_str("n"), Value::Integer(1));
	}

	#[test]
	fn test_filter_order_select_limit() {
		let result = run(&format!("{}
			return query[[from e = employees where e.salary > 100
				order by e.salary desc select e.name]]", EMPLOYEES));
		assert_eq!(results_of(&result), vec![Value::from("bob"), Value::from("cy")]);

		let result = run(&format!("{}
			return query[[from employees order by name select name limit 1, 1]]", EMPLOYEES));
		assert_eq!(results_of(&result), vec![Value::from("bob")]);
	}

	#[test]
	fn test_having_and_ordering_by_aggregates() {
		let result = run(&format!("{}
			return query[[from employees group by dept having count() > 1
				select {{dept = dept, top = max(salary)}}]]", EMPLOYEES));
		let rows = results_of(&result);
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].table().unwrap().get_str("top"), Value::Integer(200));

		let result = run(&format!("{}
			return query[[from employees group by dept order by total
				select {{dept = dept, total = sum(salary)}}]]", EMPLOYEES));
		let depts: Vec<Value> = results_of(&result).iter()
			.map(|row| row.table().unwrap().get_str("dept")).collect();
		assert_eq!(depts, vec![Value::from("sales"), Value::from("eng")]);
	}

	#[test]
	fn test_distinct_and_nil_projection() {
		let result = run("return query[[from n = {1, 2, 2, 3, 1.0} select n ~= 3 and n or nil]]");
		assert_eq!(results_of(&result), vec![Value::Integer(1), Value::Integer(2)]);
	}

	#[test]
	fn test_nil_sorts_last() {
		let result = run("return query[[from t = {{v = 2}, {}, {v = 1}} order by t.v
			select t.v or 'none']]");
		assert_eq!(results_of(&result), vec![Value::Integer(1), Value::Integer(2), Value::from("none")]);

		let result = run("return query[[from t = {{v = 2}, {}, {v = 1}} order by t.v desc
			select t.v or 'none']]");
		assert_eq!(results_of(&result), vec![Value::from("none"), Value::Integer(2), Value::Integer(1)]);
	}

	#[test]
	fn test_scalars_and_nil_collections() {
		assert_eq!(results_of(&run("return query[[from 5]]")), vec![Value::Integer(5)]);
		assert!(results_of(&run("return query[[from nil]]")).is_empty());
	}

	#[test]
	fn test_errors() {
		let error = run_with("return query[[where true]]", Config::default()).unwrap_err();
		assert!(error.contains("No from clause found."), "{}", error);
		let error = run_with("return query[[from {1} limit -1]]", Config::default()).unwrap_err();
		assert!(error.contains("limit must be a non-negative integer"), "{}", error);
	}

	#[test]
	fn test_collation() {
		let source = "return query[[from w = {'b', 'B', 'a', 'A'} order by w]]";
		assert_eq!(results_of(&run(source)), vec![Value::from("A"), Value::from("B"),
			Value::from("a"), Value::from("b")]);

		let config = Config::new(Arc::new(TableConfig(lua_table! {
			queryCollation = lua_table! {enabled = true}
		}.arc())));
		assert_eq!(results_of(&run_with(source, config).unwrap()), vec![Value::from("a"),
			Value::from("A"), Value::from("b"), Value::from("B")]);

		let source = "return query[[from w = {'f', 'é', 'e', 'z'} order by w]]";
		let config = Config::new(Arc::new(TableConfig(lua_table! {
			queryCollation = lua_table! {enabled = true, locale = "fr"}
		}.arc())));
		assert_eq!(results_of(&run_with(source, config).unwrap()), vec![Value::from("e"),
			Value::from("é"), Value::from("f"), Value::from("z")]);
	}
}
