//! Generates the golden integration tests, one per script in
//! `tests/golden/lua`.

use std::{env::var, error::Error, path::PathBuf};

mod golden {
	include!("./tests/golden/build.rs");
}

fn main() -> Result<(), Box<dyn Error>> {
	let output = PathBuf::from(var("OUT_DIR")?);
	let scripts = PathBuf::from(var("CARGO_MANIFEST_DIR")?).join("tests/golden/lua");
	golden::generate(&scripts, &output)?;
	Ok(())
}
