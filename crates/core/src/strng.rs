use std::fmt::Write;
use std::ops::Deref;

use arcstr::ArcStr;
use prometheus_client::encoding::{EncodeLabelValue, LabelValueEncoder};

/// Strng is the string type used for values that are cloned on every request
/// path: lane names, hosts, service names, attribute keys. Clones are
/// reference-counted, not copied.
pub type Strng = ArcStr;

pub fn new<A: AsRef<str>>(s: A) -> Strng {
	ArcStr::from(s.as_ref())
}

pub use arcstr::format;
pub use arcstr::literal;

pub const EMPTY: Strng = literal!("");

/// RichStrng wraps Strng to allow implementing foreign traits on it.
#[derive(Clone, Hash, Default, Debug, PartialEq, Eq)]
pub struct RichStrng(Strng);

impl Deref for RichStrng {
	type Target = Strng;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl<T: Into<Strng>> From<T> for RichStrng {
	fn from(value: T) -> Self {
		RichStrng(value.into())
	}
}

impl std::fmt::Display for RichStrng {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl EncodeLabelValue for RichStrng {
	fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
		write!(encoder, "{}", self.0)
	}
}
