use space_lua::{Runtime, lua_tuple};

#[test]
fn reassigning_a_const_fails() {
	let runtime = Runtime::new();
	let error = runtime.execute_sync("local x <const> = 1; x = 2", None).unwrap_err();
	assert!(error.to_string().contains("attempt to assign to const variable 'x'"), "{}", error);

	let error = runtime.execute_sync("local x <const> = 1
		local function f() x = 3 end
		f()", None).unwrap_err();
	assert!(error.to_string().contains("attempt to assign to const variable 'x'"), "{}", error);
}

#[test]
fn fields_of_const_tables_are_mutable() {
	let result = Runtime::new().execute_sync("
		local t <const> = {a = 1}
		t.a = 2
		return t.a
	", None).unwrap();
	assert_eq!(result, lua_tuple![2]);
}

#[test]
fn shadowing_a_const_is_allowed() {
	let result = Runtime::new().execute_sync("
		local x <const> = 1
		do local x = 5; x = x + 1; return x end
	", None).unwrap();
	assert_eq!(result, lua_tuple![6]);
}

#[test]
fn unknown_attributes_fail_to_load() {
	let error = Runtime::new().load("local x <shiny> = 1", None).unwrap_err();
	assert!(error.to_string().contains("unknown attribute 'shiny'"), "{}", error);
}
