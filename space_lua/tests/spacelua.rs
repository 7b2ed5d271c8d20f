use serde_json::json;
use space_lua::{Runtime, lua_tuple, vm::convert::HostFunction};

#[test]
fn parsed_expressions_see_the_environment() {
	let result = Runtime::new().execute_sync("
		rate = 3
		local parsed = spacelua.parseExpression('price * rate + #_')
		return spacelua.evalExpression(parsed, {price = 2}), parsed({price = 5}), type(parsed)
	", None).unwrap();
	assert_eq!(result, lua_tuple![6, 15, "function"]);
}

#[test]
fn malformed_expressions_are_errors() {
	let result = Runtime::new().execute_sync("
		local ok, message = pcall(spacelua.parseExpression, '1 +')
		return ok, message
	", None).unwrap();
	assert_eq!(result[0], space_lua::vm::value::Value::Boolean(false));

	let error = Runtime::new().execute_sync("return spacelua.evalExpression(5)", None).unwrap_err();
	assert!(error.to_string().contains("parsed expression expected, got number"), "{}", error);
}

#[test]
fn templates_interpolate() {
	let result = Runtime::new().execute_sync(r#"
		local point = setmetatable({x = 1}, {__tostring = function(p) return "P" .. p.x end})
		return spacelua.interpolate("${name} has ${#items} items: ${table.concat(items, ', ')}",
				{name = "cart", items = {"a", "b"}}),
			spacelua.interpolate("${p} and ${ ({1, 2})[2] }", {p = point}),
			spacelua.interpolate("no expressions")
	"#, None).unwrap();
	assert_eq!(result, lua_tuple!["cart has 2 items: a, b", "P1 and 2", "no expressions"]);

	let error = Runtime::new().execute_sync("return spacelua.interpolate('${oops')", None)
		.unwrap_err();
	assert!(error.to_string().contains("Unclosed interpolation expression"), "{}", error);
}

#[tokio::test]
async fn interpolation_waits_for_host_functions() {
	let runtime = Runtime::new();
	runtime.register_host("space.title", HostFunction::asynchronous("title", |arguments| async move {
		tokio::task::yield_now().await;
		let name = arguments.first().and_then(|value| value.as_str().map(str::to_uppercase))
			.unwrap_or_default();
		Ok::<_, String>(json!(name))
	})).unwrap();

	let result = runtime.execute("
		return spacelua.interpolate('[${space.title(page)}]', {page = 'index'})
	", None).await.unwrap();
	assert_eq!(result, lua_tuple!["[INDEX]"]);
}

#[test]
fn binary_packing() {
	let result = Runtime::new().execute_sync("
		local data = string.pack('<i4 s1 d', 1000, 'hey', 2.5)
		local number, text, float, next = string.unpack('<i4 s1 d', data)
		return #string.pack('>I2', 513), number, text, float, next, string.packsize('i4 i8 !8 d')
	", None).unwrap();
	assert_eq!(result, lua_tuple![2, 1000, "hey", 2.5, 17, 24]);
}
