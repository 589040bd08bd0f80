//! Serde helpers shared by the config surface.

pub mod serde_dur {
	use std::time::Duration;

	use duration_str::HumanFormat;
	pub use duration_str::deserialize_duration as deserialize;
	use serde::Serializer;

	pub fn serialize<S: Serializer>(t: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&t.human_format())
	}
}

pub mod serde_dur_option {
	use std::time::Duration;

	use duration_str::HumanFormat;
	pub use duration_str::deserialize_option_duration as deserialize;
	use serde::Serializer;

	pub fn serialize<S: Serializer>(
		t: &Option<Duration>,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		match t {
			None => serializer.serialize_none(),
			Some(t) => serializer.serialize_str(&t.human_format()),
		}
	}
}
