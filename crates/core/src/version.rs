use std::fmt;
use std::fmt::{Display, Formatter};

const BUILD_VERSION: &str = env!("MESHLANE_BUILD_VERSION");
const BUILD_RUST_VERSION: &str = env!("MESHLANE_BUILD_RUSTC_VERSION");
const BUILD_RUST_PROFILE: &str = env!("MESHLANE_BUILD_PROFILE_NAME");

#[derive(serde::Serialize, Clone, Debug, Default)]
pub struct BuildInfo {
	pub version: String,
	pub rust_version: String,
	pub build_profile: String,
}

impl BuildInfo {
	pub fn new() -> Self {
		BuildInfo {
			version: BUILD_VERSION.to_string(),
			rust_version: BUILD_RUST_VERSION.to_string(),
			build_profile: BUILD_RUST_PROFILE.to_string(),
		}
	}
}

impl Display for BuildInfo {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"version.BuildInfo{{Version:\"{}\", RustVersion:\"{}\", BuildProfile:\"{}\"}}",
			self.version, self.rust_version, self.build_profile
		)
	}
}
