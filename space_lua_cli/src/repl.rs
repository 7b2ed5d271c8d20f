use self::super::{block_on, handle_io};
use space_lua::{Runtime, ast, error::LuaError, vm::value::Value};
use std::io::{BufRead, Write, stdin, stdout};

/// Reads lines until they parse as an expression or a chunk, then runs them.
/// Lines that end mid statement are continued with a `>>` prompt.
pub fn repl(runtime: Runtime) {
	loop {
		let mut code = String::new();

		let (source, expression) = loop {
			let line = {
				let mut stdout = stdout().lock();
				let prompt: &[u8] = if code.is_empty() {b"> "} else {b">> "};
				handle_io(stdout.write_all(prompt));
				handle_io(stdout.flush());

				let mut line = String::with_capacity(80);
				handle_io(stdin().lock().read_line(&mut line));
				line
			};
			if line.is_empty() {return}
			code.push_str(&line);

			if ast::parse_expression(&code, None).is_ok() {break (code, true)}
			match ast::parse(&code, None) {
				Err(error) if error.is_end_of_file() => (),
				_ => break (code, false)
			}
		};

		let result = if expression {
			block_on(runtime.evaluate(&source, Some("stdin"))).map(|value| vec![value])
		} else {
			block_on(runtime.execute(&source, Some("stdin")))
		};
		match result {
			Ok(values) => if !values.iter().all(Value::is_nil) {
				let line: Vec<String> = values.iter().map(Value::to_string).collect();
				println!("{}", line.join("\t"));
			},
			Err(error @ LuaError::Syntax(_)) => eprintln!("syntax error: {}", error),
			Err(error) => eprintln!("{}", error.pretty_print(&source))
		}
	}
}
