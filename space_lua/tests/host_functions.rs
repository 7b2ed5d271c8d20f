use serde_json::json;
use space_lua::{
	Runtime,
	lua_tuple,
	vm::{convert::{Callback, HostFunction, HostValue}, table::Table, value::Value}
};

#[test]
fn values_cross_as_json() {
	let runtime = Runtime::new();
	runtime.register_host("space.echo", HostFunction::sync("echo",
		|arguments| Ok(HostValue::Object([("arguments".to_owned(), HostValue::Array(arguments))]
			.into_iter().collect())))).unwrap();

	let result = runtime.execute_sync("
		local result = space.echo(1, 'two', {3, 4}, {five = 5})
		local arguments = result.arguments
		return arguments[1], arguments[2], arguments[3][2], arguments[4].five
	", None).unwrap();
	assert_eq!(result, lua_tuple![1, "two", 4, 5]);
}

#[test]
fn host_errors_are_catchable() {
	let runtime = Runtime::new();
	runtime.register_host("fail", HostFunction::sync("fail",
		|_| Err::<HostValue, _>("no such page".to_owned()))).unwrap();
	let result = runtime.execute_sync("
		local ok, message = pcall(fail)
		return ok, message
	", None).unwrap();
	assert_eq!(result[0], Value::Boolean(false));
	assert!(result[1].to_string().contains("no such page"), "{}", result[1]);

	let error = runtime.execute_sync("fail()", None).unwrap_err();
	assert!(error.to_string().contains("no such page"), "{}", error);
}

#[tokio::test]
async fn asynchronous_functions_resume_evaluation() {
	let runtime = Runtime::new();
	runtime.register_host("space.slow", HostFunction::asynchronous("slow", |arguments| async move {
		tokio::task::yield_now().await;
		let number = arguments.first().and_then(|value| value.as_i64()).unwrap_or(0);
		Ok::<_, String>(json!(number + 1))
	})).unwrap();

	let result = runtime.execute("
		local total = 0
		for i = 1, 3 do total = total + space.slow(i) end
		return total
	", None).await.unwrap();
	assert_eq!(result, lua_tuple![9]);
}

#[test]
fn context_is_visible_as_ctx() {
	let context = Table::new().arc();
	context.set_str("user", "ada".into());
	let runtime = Runtime::new().with_context(context);
	let result = runtime.execute_sync("return _CTX.user", None).unwrap();
	assert_eq!(result, lua_tuple!["ada"]);
}

#[tokio::test]
async fn callbacks_cross_both_ways() {
	let runtime = Runtime::new();
	runtime.register_host("space.each", HostFunction::asynchronous("each", |arguments| async move {
		let callback = arguments.get(1).and_then(HostValue::as_callback).cloned()
			.ok_or_else(|| "expected a function".to_owned())?;
		let mut results = Vec::new();
		if let Some(HostValue::Array(items)) = arguments.first() {
			for item in items {
				results.push(callback.call(vec![item.clone()]).await?);
			}
		}
		Ok::<_, String>(HostValue::Array(results))
	})).unwrap();
	runtime.register_host("space.adder", HostFunction::sync("adder", |arguments| {
		let step = arguments.first().and_then(HostValue::as_i64).unwrap_or(0);
		Ok(Callback::new(HostFunction::sync("add", move |arguments|
			Ok(json!(arguments.first().and_then(HostValue::as_i64).unwrap_or(0) + step)))))
	})).unwrap();

	let result = runtime.execute("
		local doubled = space.each({1, 2, 3}, function(n) return n * 2 end)
		local add = space.adder(10)
		return doubled[1] + doubled[2] + doubled[3], add(5)
	", None).await.unwrap();
	assert_eq!(result, lua_tuple![12, 15]);
}
