use std::fmt;

use super::ParseError;
use crate::*;

pub const TRACESTATE_HEADER: &str = "tracestate";

const CTX_KEY: &str = "ctx";
const LANE_PREFIX: &str = "lane:";

/// A `tracestate` header as an ordered member list. The `ctx` member carries
/// this library's lane tag; every other member is carried verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceState {
	members: Vec<Member>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Member {
	raw: String,
}

impl Member {
	fn parse(raw: &str) -> Result<Member, ParseError> {
		if raw.trim().is_empty() || !raw.contains('=') {
			return Err(ParseError::InvalidTracestate);
		}
		Ok(Member {
			raw: raw.to_string(),
		})
	}

	fn key(&self) -> &str {
		self.raw.split('=').next().unwrap_or("").trim()
	}

	fn value(&self) -> &str {
		self.raw.split_once('=').map(|(_, v)| v).unwrap_or("")
	}

	fn is_ctx(&self) -> bool {
		self.key() == CTX_KEY
	}
}

impl TraceState {
	/// Parses a header value. Empty and malformed members are dropped;
	/// everything else keeps its exact bytes.
	pub fn parse(s: &str) -> TraceState {
		TraceState {
			members: s.split(',').filter_map(|m| Member::parse(m).ok()).collect(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}

	/// The lane carried by the first `ctx` member with a `lane:` value.
	pub fn lane(&self) -> Option<Strng> {
		self.members.iter().find_map(|m| {
			if !m.is_ctx() {
				return None;
			}
			m.value()
				.trim()
				.strip_prefix(LANE_PREFIX)
				.map(|l| strng::new(l.trim()))
		})
	}

	/// Returns a copy with the `ctx` member set to `lane`. An empty lane
	/// removes the member entirely. The first existing `ctx` member is
	/// replaced in place (duplicates dropped); a missing one is prepended.
	/// All other members keep their position and bytes.
	pub fn with_lane(&self, lane: &str) -> TraceState {
		let lane = lane.trim();
		let mut members = Vec::with_capacity(self.members.len() + 1);
		let mut placed = false;
		for m in &self.members {
			if m.is_ctx() {
				if !lane.is_empty() && !placed {
					members.push(Member {
						raw: format!("{CTX_KEY}={LANE_PREFIX}{lane}"),
					});
					placed = true;
				}
				continue;
			}
			members.push(m.clone());
		}
		if !lane.is_empty() && !placed {
			members.insert(
				0,
				Member {
					raw: format!("{CTX_KEY}={LANE_PREFIX}{lane}"),
				},
			);
		}
		TraceState { members }
	}
}

impl fmt::Display for TraceState {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, m) in self.members.iter().enumerate() {
			if i > 0 {
				f.write_str(",")?;
			}
			f.write_str(&m.raw)?;
		}
		Ok(())
	}
}
