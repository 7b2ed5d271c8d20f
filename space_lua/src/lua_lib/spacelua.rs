//! The `spacelua` library, for evaluating Lua expressions that live in
//! strings, such as templates.
//!
//! A parsed expression is a function. Calling it, or handing it to
//! `evalExpression`, evaluates the expression against the globals, with the
//! fields of an optional table visible as locals. The table itself is
//! visible as `_`.

use self::super::{argument, bad_argument, check_string};
use crate::{
	ast::{self, syntax::Block},
	error::{LuaError, Result},
	lua_table,
	vm::{
		deferred::Deferred,
		env::Env,
		eval,
		frame::StackFrame,
		operators,
		table::Table,
		value::{Function, Value}
	}
};
use std::sync::Arc;

/// A chunk of template text, or the source of an expression in `${...}`.
#[derive(Clone, Debug, PartialEq)]
enum Piece {
	Text(String),
	Expression(String)
}

fn split_template(template: &str) -> std::result::Result<Vec<Piece>, &'static str> {
	let mut pieces = Vec::new();
	let mut rest = template;

	while let Some(start) = rest.find("${") {
		pieces.push(Piece::Text(rest[..start].to_owned()));
		let body = &rest[start + 2..];

		// Braces nest, so tables can appear inside the expression.
		let mut depth = 1;
		let end = body.char_indices().find_map(|(index, character)| {
			match character {
				'{' => depth += 1,
				'}' => depth -= 1,
				_ => ()
			}
			(depth == 0).then_some(index)
		}).ok_or("Unclosed interpolation expression")?;

		pieces.push(Piece::Expression(body[..end].to_owned()));
		rest = &body[end + 1..];
	}

	pieces.push(Piece::Text(rest.to_owned()));
	Ok(pieces)
}

/// A scope over the globals exposing the fields of `augmentation`.
fn augmented(frame: &StackFrame, augmentation: &Value) -> Env {
	let env = Env::new(frame.globals().clone());
	if let Value::Table(table) = augmentation {
		env.set_local("_", Value::Table(table.clone()));
		for (key, value) in table.pairs() {
			if let Value::String(key) = key {
				env.set_local(&*key, value);
			}
		}
	}
	env
}

fn evaluate(frame: &StackFrame, block: Arc<Block>, augmentation: &Value)
		-> Result<Deferred<'static, Value>> {
	let chunk = eval::chunk(block, augmented(frame, augmentation));
	Ok(operators::call_function(frame, &chunk, Vec::new())?.map(operators::first))
}

fn expression(block: Arc<Block>) -> Function {
	Function::builtin("expression", move |frame, arguments| {
		Ok(evaluate(frame, block.clone(), &argument(&arguments, 0))?.map(|value| vec![value]))
	})
}

/// `spacelua.parseExpression(source)`
pub fn parse_expression(frame: &StackFrame, arguments: Vec<Value>) -> Result<Vec<Value>> {
	let source = check_string(frame, &arguments, 0, "parseExpression")?;
	let block = ast::parse_expression(&source, None)
		.map_err(|error| LuaError::from(error).within(frame))?;
	Ok(vec![Value::Function(expression(block))])
}

/// `spacelua.evalExpression(parsed [, env])`
pub fn eval_expression(frame: &StackFrame, arguments: Vec<Value>)
		-> Result<Deferred<'static, Vec<Value>>> {
	match argument(&arguments, 0) {
		Value::Function(parsed) => Ok(operators::call_function(frame, &parsed,
			vec![argument(&arguments, 1)])?.map(|values| vec![operators::first(values)])),
		other => Err(bad_argument(frame, 1, "evalExpression",
			format!("parsed expression expected, got {}", other.type_name())))
	}
}

/// `spacelua.interpolate(template [, env])` replaces every `${expression}`
/// in `template` with the string form of its value.
pub fn interpolate(frame: &StackFrame, arguments: Vec<Value>)
		-> Result<Deferred<'static, Vec<Value>>> {
	let template = check_string(frame, &arguments, 0, "interpolate")?;
	let augmentation = argument(&arguments, 1);
	let pieces = split_template(&template)
		.map_err(|message| LuaError::runtime(message, frame))?;

	let frame = frame.clone();
	Deferred::poll_once(async move {
		let mut result = String::new();
		for piece in pieces {
			let source = match piece {
				Piece::Text(text) => {
					result.push_str(&text);
					continue
				},
				Piece::Expression(source) => source
			};

			let value = async {
				let block = ast::parse_expression(&source, None).map_err(LuaError::from)?;
				let value = evaluate(&frame, block, &augmentation)?.resolve().await?;
				operators::to_string(&frame, value)?.resolve().await
			}.await.map_err(|error| LuaError::runtime(
				format!("Error evaluating \"{}\": {}", source, error), &frame))?;
			result.push_str(&value);
		}
		Ok(vec![Value::from(result)])
	})
}

pub fn library() -> Table {
	lua_table! {
		parseExpression = Function::sync("parseExpression", parse_expression),
		evalExpression = Function::builtin("evalExpression", eval_expression),
		interpolate = Function::builtin("interpolate", interpolate)
	}
}

#[cfg(test)]
mod tests {
	use super::{Piece, split_template};

	#[test]
	fn test_split_template() {
		assert_eq!(split_template("a ${x} b ${ {1}[1] }").unwrap(), vec![
			Piece::Text("a ".into()), Piece::Expression("x".into()),
			Piece::Text(" b ".into()), Piece::Expression(" {1}[1] ".into()),
			Piece::Text(String::new())
		]);
		assert_eq!(split_template("plain").unwrap(), vec![Piece::Text("plain".into())]);
		assert_eq!(split_template("${open").unwrap_err(), "Unclosed interpolation expression");
	}
}
