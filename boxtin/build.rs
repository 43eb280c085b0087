fn main() {
	let crate_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();

	// Header for the JVMTI shim; a failed generation (e.g. during early
	// refactors) should not fail the build.
	if let Ok(bindings) = cbindgen::Builder::new().with_crate(&crate_dir).generate() {
		bindings.write_to_file(format!("{crate_dir}/include/boxtin.h"));
	}
}
