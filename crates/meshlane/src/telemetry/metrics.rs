use mesh_core::strng::RichStrng;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Hash, Default, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct ResolveLabels {
	pub outcome: ResolveOutcome,
}

#[derive(Clone, Copy, Hash, Default, Debug, PartialEq, Eq, EncodeLabelValue)]
pub enum ResolveOutcome {
	#[default]
	Registry,
	Fallback,
	Error,
}

#[derive(Clone, Hash, Default, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct PickLabels {
	pub lane: RichStrng,
	pub result: PickResult,
}

#[derive(Clone, Copy, Hash, Default, Debug, PartialEq, Eq, EncodeLabelValue)]
pub enum PickResult {
	#[default]
	Primary,
	Fallback,
	Unavailable,
}

#[derive(Clone, Hash, Default, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct RegisterLabels {
	pub result: RegisterResult,
}

#[derive(Clone, Copy, Hash, Default, Debug, PartialEq, Eq, EncodeLabelValue)]
pub enum RegisterResult {
	#[default]
	Ok,
	Retry,
	Exhausted,
}

/// Counters for the background loops. `Default` builds an unregistered set,
/// which is what tests and embedders without a registry use.
#[derive(Debug, Default)]
pub struct Metrics {
	pub resolves: Family<ResolveLabels, Counter>,
	pub resolver_updates: Counter,
	pub picks: Family<PickLabels, Counter>,
	pub registrations: Family<RegisterLabels, Counter>,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let m = Metrics::default();
		registry.register(
			"resolves",
			"The total number of discovery refreshes",
			m.resolves.clone(),
		);
		registry.register(
			"resolver_updates",
			"The total number of snapshots published to balancers",
			m.resolver_updates.clone(),
		);
		registry.register(
			"picks",
			"The total number of balancer pick decisions",
			m.picks.clone(),
		);
		registry.register(
			"registrations",
			"The total number of instance registration attempts",
			m.registrations.clone(),
		);
		m
	}
}
