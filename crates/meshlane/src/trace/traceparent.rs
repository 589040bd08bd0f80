use std::fmt;

use super::ParseError;

pub const TRACEPARENT_HEADER: &str = "traceparent";

/// A `traceparent` header, as defined by https://www.w3.org/TR/trace-context/.
/// Only version 00 is accepted; the canonical rendering is the `Debug` form.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct TraceParent {
	pub trace_id: u128,
	pub span_id: u64,
	pub flags: u8,
}

const VERSION: &str = "00";

impl TraceParent {
	pub fn is_sampled(&self) -> bool {
		(self.flags & 0x01) == 0x01
	}
}

impl fmt::Debug for TraceParent {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"{VERSION}-{:032x}-{:016x}-{:02x}",
			self.trace_id, self.span_id, self.flags
		)
	}
}

impl fmt::Display for TraceParent {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:032x}", self.trace_id)
	}
}

impl TryFrom<&str> for TraceParent {
	type Error = ParseError;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		let value = value.trim();
		if value.is_empty() {
			return Err(ParseError::InvalidTraceparent("blank"));
		}
		let segs: Vec<&str> = value.split('-').collect();
		if segs.len() != 4 {
			return Err(ParseError::InvalidTraceparent("expected 4 segments"));
		}
		if segs[0] != VERSION {
			return Err(ParseError::InvalidTraceparent("unsupported version"));
		}
		let trace_id = hex_field(segs[1], 32)?;
		let span_id = hex_field(segs[2], 16)? as u64;
		let flags = hex_field(segs[3], 2)? as u8;
		if trace_id == 0 {
			return Err(ParseError::InvalidTraceparent("zero trace id"));
		}
		if span_id == 0 {
			return Err(ParseError::InvalidTraceparent("zero span id"));
		}
		Ok(TraceParent {
			trace_id,
			span_id,
			flags,
		})
	}
}

fn hex_field(s: &str, width: usize) -> Result<u128, ParseError> {
	if s.len() != width {
		return Err(ParseError::InvalidTraceparent("wrong segment width"));
	}
	if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
		return Err(ParseError::InvalidTraceparent("non-hex character"));
	}
	u128::from_str_radix(s, 16).map_err(|_| ParseError::InvalidTraceparent("non-hex character"))
}

#[cfg(test)]
mod tests {
	use super::*;

	const CANONICAL: &str = "00-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-01";

	#[test]
	fn parse_canonical() {
		let tp = TraceParent::try_from(CANONICAL).unwrap();
		assert_eq!(tp.trace_id, 0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa);
		assert_eq!(tp.span_id, 0xbbbbbbbbbbbbbbbb);
		assert_eq!(tp.flags, 0x01);
		assert!(tp.is_sampled());
	}

	#[test]
	fn round_trip_is_canonical() {
		let tp = TraceParent::try_from(CANONICAL).unwrap();
		assert_eq!(format!("{tp:?}"), CANONICAL);
		assert_eq!(TraceParent::try_from(format!("{tp:?}").as_str()), Ok(tp));
	}

	#[test]
	fn uppercase_hex_parses_to_lowercase_rendering() {
		let tp =
			TraceParent::try_from("00-AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA-BBBBBBBBBBBBBBBB-01").unwrap();
		assert_eq!(format!("{tp:?}"), CANONICAL);
	}

	#[test]
	fn rejects_unsupported_version() {
		assert!(TraceParent::try_from("ff-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-01").is_err());
	}

	#[test]
	fn rejects_non_hex_character() {
		assert!(TraceParent::try_from("00-gaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-01").is_err());
	}

	#[test]
	fn rejects_wrong_widths() {
		// short trace id
		assert!(TraceParent::try_from("00-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-01").is_err());
		// short span id
		assert!(TraceParent::try_from("00-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbb-01").is_err());
		// long flags
		assert!(TraceParent::try_from("00-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-011").is_err());
	}

	#[test]
	fn rejects_wrong_segment_count() {
		assert!(TraceParent::try_from("00-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb").is_err());
		assert!(TraceParent::try_from(&format!("{CANONICAL}-00")[..]).is_err());
	}

	#[test]
	fn rejects_zero_ids() {
		assert!(TraceParent::try_from("00-00000000000000000000000000000000-bbbbbbbbbbbbbbbb-01").is_err());
		assert!(TraceParent::try_from("00-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-0000000000000000-01").is_err());
	}

	#[test]
	fn rejects_blank() {
		assert!(TraceParent::try_from("").is_err());
		assert!(TraceParent::try_from("   ").is_err());
	}
}
