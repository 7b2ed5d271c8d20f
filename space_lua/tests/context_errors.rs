use space_lua::{Runtime, error::LuaError};

#[test]
fn runtime_errors_point_at_the_source() {
	let source = "local t = nil\nreturn t.field\n";
	let error = Runtime::new().execute_sync(source, Some("page.lua")).unwrap_err();
	let printed = error.pretty_print(source);
	assert!(printed.starts_with("LuaRuntimeError: "), "{}", printed);
	assert!(printed.contains("* page.lua @ 2:"), "{}", printed);
	assert!(printed.contains("return t.field"), "{}", printed);
}

#[test]
fn syntax_errors_fail_before_running() {
	let runtime = Runtime::new();
	let error = runtime.execute_sync("print('ran') x = = 1", None).unwrap_err();
	assert!(matches!(error, LuaError::Syntax(_)), "{:?}", error);
	assert!(error.to_string().contains("unexpected symbol"), "{}", error);

	let error = runtime.load("return +1", None).unwrap_err();
	assert!(error.to_string().contains("unexpected symbol near '+'"), "{}", error);
}

#[test]
fn error_values_survive_pcall() {
	let result = Runtime::new().execute_sync("
		local ok, value = pcall(error, {code = 42})
		return ok, value.code
	", None).unwrap();
	assert_eq!(result, space_lua::lua_tuple![false, 42]);
}

#[test]
fn metatable_loops_are_bounded() {
	let error = Runtime::new().execute_sync("
		local loop = setmetatable({}, {})
		getmetatable(loop).__index = loop
		return loop.missing
	", None).unwrap_err();
	assert!(error.to_string().contains("'__index' chain too long"), "{}", error);
}

#[test]
fn runaway_recursion_is_an_error() {
	let error = Runtime::new().execute_sync("
		local function forever(n) return 1 + forever(n + 1) end
		return forever(1)
	", None).unwrap_err();
	assert!(error.to_string().contains("stack overflow"), "{}", error);
}

#[test]
fn deep_recursion_fits_a_small_thread_stack() {
	let worker = std::thread::Builder::new().stack_size(512 * 1024).spawn(|| {
		Runtime::new().execute_sync("
			local function forever(n) return 1 + forever(n + 1) end
			local function count(n) if n == 0 then return 0 end return 1 + count(n - 1) end
			local ok, message = pcall(forever, 1)
			return ok, string.find(message, 'stack overflow') ~= nil, count(40)
		", None)
			.map(|values| values.iter().map(ToString::to_string).collect::<Vec<_>>())
			.map_err(|error| error.to_string())
	}).unwrap();

	let result = worker.join().unwrap().unwrap();
	assert_eq!(result, ["false", "true", "40"]);
}
