use space_lua::{Runtime, vm::value::Value};
use std::sync::{Arc, Mutex};

fn recording() -> (Runtime, Arc<Mutex<Vec<String>>>) {
	let lines = Arc::new(Mutex::new(Vec::new()));
	let sink = lines.clone();
	let runtime = Runtime::new()
		.with_output(Arc::new(move |line: &str| sink.lock().unwrap().push(line.to_owned())));
	runtime.execute_sync("
		function closable(name)
			return setmetatable({}, {__close = function(_, err)
				print(name .. ':' .. tostring(err))
			end})
		end
	", None).unwrap();
	(runtime, lines)
}

fn printed(lines: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
	std::mem::take(&mut *lines.lock().unwrap())
}

#[test]
fn closes_in_reverse_on_every_exit() {
	let (runtime, lines) = recording();

	runtime.execute_sync("do
		local a <close> = closable('a')
		local b <close> = closable('b')
	end", None).unwrap();
	assert_eq!(printed(&lines), vec!["b:nil", "a:nil"]);

	runtime.execute_sync("while true do
		local a <close> = closable('a')
		local b <close> = closable('b')
		break
	end", None).unwrap();
	assert_eq!(printed(&lines), vec!["b:nil", "a:nil"]);

	let result = runtime.execute_sync("return (function()
		local a <close> = closable('a')
		local b <close> = closable('b')
		return 'done'
	end)()", None).unwrap();
	assert_eq!(result, vec![Value::from("done")]);
	assert_eq!(printed(&lines), vec!["b:nil", "a:nil"]);

	let result = runtime.execute_sync("return pcall(function()
		local a <close> = closable('a')
		local b <close> = closable('b')
		error('oops')
	end)", None).unwrap();
	assert_eq!(result, vec![Value::Boolean(false), Value::from("oops")]);
	assert_eq!(printed(&lines), vec!["b:oops", "a:oops"]);
}

#[test]
fn closes_through_goto() {
	let (runtime, lines) = recording();
	runtime.execute_sync("
		local i = 0
		::again::
		do
			local x <close> = closable('x' .. i)
			i = i + 1
			if i < 3 then goto again end
		end
	", None).unwrap();
	assert_eq!(printed(&lines), vec!["x0:nil", "x1:nil", "x2:nil"]);
}

#[test]
fn close_errors_replace_the_error_in_flight() {
	let (runtime, lines) = recording();
	let result = runtime.execute_sync("return pcall(function()
		local a <close> = closable('a')
		local b <close> = setmetatable({}, {__close = function() error('from close', 0) end})
		error('from body', 0)
	end)", None).unwrap();
	assert_eq!(result, vec![Value::Boolean(false), Value::from("from close")]);
	assert_eq!(printed(&lines), vec!["a:from close"]);
}

#[test]
fn nil_is_accepted_but_false_is_not() {
	let (runtime, _) = recording();
	assert!(runtime.execute_sync("local x <close> = nil", None).is_ok());

	let error = runtime.execute_sync("local x <close> = false", None).unwrap_err();
	assert!(error.to_string().contains("non-closable"), "{}", error);
	let error = runtime.execute_sync("local x <close> = {}", None).unwrap_err();
	assert!(error.to_string().contains("variable 'x' got a non-closable value"), "{}", error);
}

#[test]
fn close_variables_are_constant() {
	let (runtime, _) = recording();
	let error = runtime.execute_sync("local x <close> = nil; x = 1", None).unwrap_err();
	assert!(error.to_string().contains("attempt to assign to const variable 'x'"), "{}", error);
}

#[test]
fn one_close_per_declaration() {
	let error = Runtime::new().load("local a <close>, b <close> = nil, nil", None).unwrap_err();
	assert!(error.to_string().contains("multiple <close> variables"), "{}", error);
}

#[test]
fn arguments_close_before_the_call() {
	let (runtime, lines) = recording();
	runtime.execute_sync("
		local function argument()
			local value <close> = closable('argument')
			return 1
		end
		pcall(function() print('called') end, argument())
	", None).unwrap();
	assert_eq!(printed(&lines), vec!["argument:nil", "called"]);
}

#[tokio::test]
async fn asynchronous_close_handlers_are_awaited() {
	let (runtime, lines) = recording();
	runtime.register_host("later", space_lua::vm::convert::HostFunction::asynchronous("later",
		|arguments| async move {
			tokio::task::yield_now().await;
			Ok::<_, String>(arguments.into_iter().next().unwrap_or_default())
		})).unwrap();

	runtime.execute("
		do
			local a <close> = setmetatable({}, {__close = function() print(later('async')) end})
		end
		print('after')
	", None).await.unwrap();
	assert_eq!(printed(&lines), vec!["async", "after"]);
}

#[test]
fn close_metamethods_are_looked_up_when_closing() {
	let (runtime, lines) = recording();
	runtime.execute_sync("
		local meta = {__close = function() print('declared') end}
		do
			local x <close> = setmetatable({}, meta)
			meta.__close = function() print('replaced') end
		end
		do
			local y <close> = setmetatable({}, {__close = function() print('old') end})
			setmetatable(y, {__close = function() print('new') end})
		end
	", None).unwrap();
	assert_eq!(printed(&lines), vec!["replaced", "new"]);

	let result = runtime.execute_sync("return pcall(function()
		local z <close> = setmetatable({}, {__close = function() end})
		setmetatable(z, {})
	end)", None).unwrap();
	assert_eq!(result[0], Value::Boolean(false));
	assert!(result[1].to_string().contains("metamethod 'close' of variable 'z' is not callable"),
		"{}", result[1]);
}

#[test]
fn generic_for_closes_its_fourth_value_once() {
	let (runtime, lines) = recording();
	runtime.execute_sync("
		function counting(name, limit)
			local i = 0
			return function()
				i = i + 1
				if i <= limit then return i end
			end, nil, nil, closable(name)
		end
	", None).unwrap();

	runtime.execute_sync("for i in counting('finished', 3) do end", None).unwrap();
	assert_eq!(printed(&lines), vec!["finished:nil"]);

	runtime.execute_sync("for i in counting('broken', 5) do
		if i == 2 then break end
	end", None).unwrap();
	assert_eq!(printed(&lines), vec!["broken:nil"]);

	let result = runtime.execute_sync("return (function()
		for i in counting('returned', 5) do return i end
	end)()", None).unwrap();
	assert_eq!(result, vec![Value::Integer(1)]);
	assert_eq!(printed(&lines), vec!["returned:nil"]);

	let result = runtime.execute_sync("return pcall(function()
		for i in counting('failed', 5) do
			if i == 3 then error('stop', 0) end
		end
	end)", None).unwrap();
	assert_eq!(result, vec![Value::Boolean(false), Value::from("stop")]);
	assert_eq!(printed(&lines), vec!["failed:stop"]);
}
