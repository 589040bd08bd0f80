use std::env;

fn main() {
	let out_dir = env::var("OUT_DIR").unwrap();
	// Adopted from https://github.com/uutils/coreutils/blob/main/src/uu/stdbuf/build.rs
	let profile_name = out_dir
		.split(std::path::MAIN_SEPARATOR)
		.nth_back(3)
		.unwrap();

	// Release builds stamp a real version through the VERSION env var; everything
	// else falls back to the crate version.
	let version = env::var("VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

	println!("cargo:rustc-env=MESHLANE_BUILD_VERSION={version}");
	println!(
		"cargo:rustc-env=MESHLANE_BUILD_RUSTC_VERSION={}",
		rustc_version::version().unwrap()
	);
	println!("cargo:rustc-env=MESHLANE_BUILD_PROFILE_NAME={profile_name}");
	println!("cargo:rerun-if-env-changed=VERSION");
}
