// This file builds an integration test for each Lua script in the lua
// directory. Each test runs the script and compares everything it prints with
// the `.out` file next to it. Scripts should not print anything that varies
// between runs, such as table addresses or the time.

use std::{fs::{File, create_dir_all, read_dir}, io::{Error, Write}, path::Path};

static HEADER: &str = "\
use space_lua::Runtime;
use diff::{Result as Diff, lines};
use std::sync::{Arc, Mutex};

/// Executes [code], returning what it printed. An error ends the output
/// with an `error:` line.
fn space_lua(code: &str, reference: &str) -> String {
	let output = Arc::new(Mutex::new(String::new()));
	let sink = output.clone();
	let runtime = Runtime::new().with_output(Arc::new(move |line: &str| {
		let mut output = sink.lock().unwrap();
		output.push_str(line); output.push('\\n');
	}));

	let outcome = tokio::runtime::Builder::new_current_thread()
		.enable_time()
		.build()
		.unwrap()
		.block_on(async move {runtime.execute(code, Some(reference)).await});
	let mut result = output.lock().unwrap().clone();
	if let Err(error) = outcome {
		result.push_str(&format!(\"error: {}\\n\", error));
	}
	result
}
";

/// The source of one test comparing what `lua` prints against `out`.
fn golden_test(name: &str, lua: &Path, out: &Path) -> String {
	let file = lua.file_name().map(|file| file.to_string_lossy().into_owned())
		.unwrap_or_default();
	format!(
"\
\n#[test]
fn {name}() -> Result<(), ()> {{
	static CODE: &str = include_str!({lua:?});
	static EXPECTED: &str = include_str!({out:?});

	let actual = space_lua(CODE, {file:?});
	if actual == EXPECTED {{return Ok(())}}

	eprintln!(\"The output of {{:?}} differs from what was expected.\", {file:?});
	for result in lines(&actual, EXPECTED) {{
		match result {{
			Diff::Left(left) => eprintln!(\"\\x1B[31m-{{}}\\x1B[0m\", left),
			Diff::Right(right) => eprintln!(\"\\x1B[32m+{{}}\\x1B[0m\", right),
			Diff::Both(both, _) => eprintln!(\" {{}}\", both)
		}}
	}}
	Err(())
}}
")
}

/// `closuresAndGoto.lua` runs as `closures_and_goto`.
fn test_name(stem: &str) -> String {
	let mut name = String::with_capacity(stem.len() + 4);
	for character in stem.chars() {
		match character {
			'-' | '.' | ' ' => name.push('_'),
			upper if upper.is_uppercase() => {
				name.push('_');
				name.extend(upper.to_lowercase());
			},
			other => name.push(other)
		}
	}
	name
}

/// Writes the tests for every `.lua` file in `scripts` to `output`.
pub fn generate(scripts: &Path, output: &Path) -> Result<(), Error> {
	println!("cargo:rerun-if-changed={}", scripts.display());

	let mut paths = Vec::new();
	for entry in read_dir(scripts)? {
		let path = entry?.path();
		if path.extension().map_or(false, |extension| extension == "lua") {
			paths.push(path);
		}
	}
	paths.sort();

	let mut source = HEADER.to_owned();
	for path in &paths {
		let stem = path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
			.unwrap_or_default();
		source.push_str(&golden_test(&test_name(&stem), path, &path.with_extension("out")));
	}

	let directory = output.join("codegen");
	create_dir_all(&directory)?;
	File::create(directory.join("space_lua-tests-golden-main"))?.write_all(source.as_bytes())
}
