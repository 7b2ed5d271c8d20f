include!(concat!(env!("OUT_DIR"), "/codegen/space_lua-tests-golden-main"));
