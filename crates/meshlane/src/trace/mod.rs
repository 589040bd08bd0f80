pub mod context;
mod traceparent;
mod tracestate;

use rand::Rng;
pub use traceparent::{TRACEPARENT_HEADER, TraceParent};
pub use tracestate::{TRACESTATE_HEADER, TraceState};

use crate::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
	#[error("invalid traceparent: {0}")]
	InvalidTraceparent(&'static str),
	#[error("invalid tracestate member")]
	InvalidTracestate,
}

/// The trace identity threaded along one logical request's call graph.
/// Immutable: every hop builds a new value via [TraceInfo::derived].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceInfo {
	pub trace_id: u128,
	pub parent_span_id: Option<u64>,
	pub span_id: u64,
	pub flags: u8,
	/// Empty is the default lane.
	pub lane: Strng,
}

impl TraceInfo {
	/// A fresh root: no upstream, sampled by default.
	pub fn root(lane: Strng) -> Self {
		TraceInfo {
			trace_id: fresh_trace_id(),
			parent_span_id: None,
			span_id: fresh_span_id(),
			flags: 0x01,
			lane,
		}
	}

	/// The server side of a call that arrived with `parent`: same trace,
	/// fresh span, parented to the caller's span.
	pub fn from_remote(parent: &TraceParent, lane: Strng) -> Self {
		TraceInfo {
			trace_id: parent.trace_id,
			parent_span_id: Some(parent.span_id),
			span_id: fresh_span_id(),
			flags: parent.flags,
			lane,
		}
	}

	/// The next hop's identity: inherits trace id, flags and lane, records
	/// this span as the parent, and mints a fresh span id.
	pub fn derived(&self) -> Self {
		let mut span_id = fresh_span_id();
		while span_id == self.span_id {
			span_id = fresh_span_id();
		}
		TraceInfo {
			trace_id: self.trace_id,
			parent_span_id: Some(self.span_id),
			span_id,
			flags: self.flags,
			lane: self.lane.clone(),
		}
	}

	pub fn traceparent(&self) -> TraceParent {
		TraceParent {
			trace_id: self.trace_id,
			span_id: self.span_id,
			flags: self.flags,
		}
	}

	pub fn trace_id_hex(&self) -> String {
		format!("{:032x}", self.trace_id)
	}

	pub fn span_id_hex(&self) -> String {
		format!("{:016x}", self.span_id)
	}

	pub fn flags_hex(&self) -> String {
		format!("{:02x}", self.flags)
	}

	pub fn is_sampled(&self) -> bool {
		(self.flags & 0x01) == 0x01
	}

	/// The logging bridge: a span carrying the four context keys. Entering
	/// through [Instrument] guarantees the prior logging context is restored
	/// on every exit path, including panics.
	pub fn span(&self) -> tracing::Span {
		tracing::info_span!(
			"request",
			trace_id = %self.trace_id_hex(),
			span_id = %self.span_id_hex(),
			flags = %self.flags_hex(),
			lane = %self.lane,
		)
	}
}

fn fresh_trace_id() -> u128 {
	let mut rng = rand::rng();
	loop {
		let id: u128 = rng.random();
		if id != 0 {
			return id;
		}
	}
}

fn fresh_span_id() -> u64 {
	let mut rng = rand::rng();
	loop {
		let id: u64 = rng.random();
		if id != 0 {
			return id;
		}
	}
}
