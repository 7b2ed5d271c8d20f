use space_lua::{Runtime, lua_tuple};

#[test]
fn continue_idiom() {
	let result = Runtime::new().execute_sync("
		local sum = 0
		for i = 1, 10 do
			if i % 2 == 0 then goto continue end
			sum = sum + i
			::continue::
		end
		return sum
	", None).unwrap();
	assert_eq!(result, lua_tuple![25]);
}

#[test]
fn backward_jumps_loop() {
	let result = Runtime::new().execute_sync("
		local n, product = 1, 1
		::top::
		product = product * n
		n = n + 1
		if n <= 5 then goto top end
		return product
	", None).unwrap();
	assert_eq!(result, lua_tuple![120]);
}

#[test]
fn jumping_out_of_nested_loops() {
	let result = Runtime::new().execute_sync("
		local found
		for i = 1, 3 do
			for j = 1, 3 do
				if i * j == 6 then
					found = i .. ',' .. j
					goto done
				end
			end
		end
		::done::
		return found
	", None).unwrap();
	assert_eq!(result, lua_tuple!["2,3"]);
}

#[test]
fn static_errors() {
	let runtime = Runtime::new();
	let message = |source: &str| runtime.load(source, None).unwrap_err().to_string();

	assert!(message("goto nowhere").contains("no visible label 'nowhere' for goto"));
	assert!(message("::a:: ::a::").contains("label 'a' already defined"));
	assert!(message("goto skip; local x <close> = nil; ::skip:: print(x)")
		.contains("jumps into the scope of a local"));
}
