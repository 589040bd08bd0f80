//! The lane-aware balancer. One subchannel per (host, port, lane); READY
//! subchannels are bucketed by lane and picked round-robin, falling back to
//! the default lane when the requested lane has nothing ready.

mod subchannel;

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use itertools::Itertools;
pub use subchannel::{Connection, Connectivity, Connector, Subchannel, TcpConnector};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{StreamExt, StreamMap};

use crate::resolve::{Endpoint, ResolverState};
use crate::telemetry::metrics::{Metrics, PickLabels, PickResult};
use crate::trace;
use crate::*;

pub const DEFAULT_LANE: Strng = strng::literal!("");

/// Endpoint selection discipline for one channel.
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BalancerPolicy {
	#[default]
	LaneRoundRobin,
	PickFirst,
}

impl FromStr for BalancerPolicy {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"lane_round_robin" => Ok(BalancerPolicy::LaneRoundRobin),
			"pick_first" => Ok(BalancerPolicy::PickFirst),
			other => anyhow::bail!("unknown balancer policy {other}"),
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum PickError {
	#[error("no available backend (lane={0})")]
	NoAvailableBackend(Strng),
}

/// Owns the subchannel set for one resolved target and serves lock-free
/// picks against the latest published bucket snapshot.
pub struct LaneBalancer {
	shared: Arc<Shared>,
	states: watch::Receiver<Connectivity>,
	task: tokio::task::JoinHandle<()>,
	policy: BalancerPolicy,
	metrics: Arc<Metrics>,
}

struct Shared {
	buckets: ArcSwap<BucketMap>,
}

#[derive(Default)]
struct BucketMap {
	by_lane: HashMap<Strng, Bucket>,
	/// Every READY subchannel in (lane, host, port) order, for pick_first.
	all_ready: Vec<Arc<Subchannel>>,
}

struct Bucket {
	ready: Vec<Arc<Subchannel>>,
	cursor: Arc<AtomicUsize>,
}

impl Bucket {
	fn next(&self) -> Arc<Subchannel> {
		let i = self.cursor.fetch_add(1, Ordering::Relaxed);
		self.ready[i % self.ready.len()].clone()
	}
}

impl LaneBalancer {
	pub fn spawn(
		updates: watch::Receiver<ResolverState>,
		connector: Arc<dyn Connector>,
		policy: BalancerPolicy,
		metrics: Arc<Metrics>,
	) -> LaneBalancer {
		let shared = Arc::new(Shared {
			buckets: ArcSwap::from_pointee(BucketMap::default()),
		});
		let (aggregate_tx, aggregate_rx) = watch::channel(Connectivity::Idle);
		let worker = Worker {
			connector,
			shared: shared.clone(),
			aggregate: aggregate_tx,
			subchannels: HashMap::new(),
			cursors: HashMap::new(),
			states: StreamMap::new(),
			updates,
			updates_open: true,
		};
		let task = tokio::spawn(worker.run());
		LaneBalancer {
			shared,
			states: aggregate_rx,
			task,
			policy,
			metrics,
		}
	}

	/// Aggregate connectivity of the whole channel.
	pub fn states(&self) -> watch::Receiver<Connectivity> {
		self.states.clone()
	}

	/// Picks a subchannel for the current request, routing by the lane in
	/// the ambient trace context. Never blocks: reads the latest snapshot.
	pub fn pick(&self) -> Result<Arc<Subchannel>, PickError> {
		self.pick_lane(&trace::context::current_lane())
	}

	pub fn pick_lane(&self, lane: &str) -> Result<Arc<Subchannel>, PickError> {
		let map = self.shared.buckets.load();
		let picked = match self.policy {
			BalancerPolicy::PickFirst => map
				.all_ready
				.first()
				.cloned()
				.map(|s| (s, PickResult::Primary)),
			BalancerPolicy::LaneRoundRobin => lane_round_robin(&map, lane),
		};
		match picked {
			Some((sub, result)) => {
				self.count_pick(lane, result);
				Ok(sub)
			},
			None => {
				self.count_pick(lane, PickResult::Unavailable);
				let described = if lane.is_empty() {
					strng::literal!("default")
				} else {
					strng::new(lane)
				};
				Err(PickError::NoAvailableBackend(described))
			},
		}
	}

	fn count_pick(&self, lane: &str, result: PickResult) {
		self
			.metrics
			.picks
			.get_or_create(&PickLabels {
				lane: lane.into(),
				result,
			})
			.inc();
	}

	pub fn shutdown(&self) {
		self.task.abort();
		self.shared.buckets.store(Arc::new(BucketMap::default()));
	}
}

impl Drop for LaneBalancer {
	fn drop(&mut self) {
		self.task.abort();
	}
}

fn lane_round_robin(map: &BucketMap, lane: &str) -> Option<(Arc<Subchannel>, PickResult)> {
	if let Some(b) = map.by_lane.get(lane)
		&& !b.ready.is_empty()
	{
		return Some((b.next(), PickResult::Primary));
	}
	// Lanes without a ready backend spill into the default bucket.
	if !lane.is_empty()
		&& let Some(b) = map.by_lane.get("")
		&& !b.ready.is_empty()
	{
		return Some((b.next(), PickResult::Fallback));
	}
	None
}

struct Worker {
	connector: Arc<dyn Connector>,
	shared: Arc<Shared>,
	aggregate: watch::Sender<Connectivity>,
	subchannels: HashMap<Endpoint, Arc<Subchannel>>,
	// Round robin positions outlive bucket republication so fairness holds
	// across updates.
	cursors: HashMap<Strng, Arc<AtomicUsize>>,
	states: StreamMap<Endpoint, WatchStream<Connectivity>>,
	updates: watch::Receiver<ResolverState>,
	updates_open: bool,
}

impl Worker {
	/// The balancer's synchronization context: resolver updates and
	/// subchannel state transitions are serialized here, each followed by an
	/// atomic republication of the bucket snapshot.
	async fn run(mut self) {
		loop {
			tokio::select! {
				changed = self.updates.changed(), if self.updates_open => {
					match changed {
						Ok(()) => {
							let state = self.updates.borrow_and_update().clone();
							self.apply_update(state);
						},
						Err(_) => {
							// Resolver is gone; keep serving the last set.
							self.updates_open = false;
							continue;
						},
					}
				},
				Some((endpoint, state)) = self.states.next() => {
					self.on_state(endpoint, state);
				},
				else => return,
			}
			self.republish();
		}
	}

	fn apply_update(&mut self, state: ResolverState) {
		if let Some(err) = state.error {
			debug!(err = %err, "resolver reported an error");
		}
		let desired: HashSet<Endpoint> = state.endpoints.iter().cloned().collect();
		// Shut down whatever disappeared from the snapshot.
		let removed: Vec<Endpoint> = self
			.subchannels
			.keys()
			.filter(|k| !desired.contains(k))
			.cloned()
			.collect();
		for key in removed {
			if let Some(sub) = self.subchannels.remove(&key) {
				debug!(endpoint = %key, "removing subchannel");
				self.states.remove(&key);
				sub.shutdown();
			}
		}
		// Create what is new and ask for a connection right away.
		for key in desired {
			if self.subchannels.contains_key(&key) {
				continue;
			}
			debug!(endpoint = %key, "creating subchannel");
			let sub = Arc::new(Subchannel::spawn(key.clone(), self.connector.clone()));
			sub.request_connect();
			self.states.insert(key.clone(), WatchStream::new(sub.watch()));
			self.subchannels.insert(key, sub);
		}
	}

	fn on_state(&mut self, endpoint: Endpoint, state: Connectivity) {
		let Some(sub) = self.subchannels.get(&endpoint) else {
			return;
		};
		trace!(endpoint = %endpoint, state = %state, "subchannel state");
		// An idle subchannel should always be dialing; transient failures
		// reconnect from inside the driver with backoff.
		if state == Connectivity::Idle {
			sub.request_connect();
		}
	}

	fn republish(&mut self) {
		let mut by_lane: HashMap<Strng, Bucket> = HashMap::new();
		let mut all_ready: Vec<Arc<Subchannel>> = vec![];
		// Ring order is (lane, host, port) so it is stable regardless of
		// update arrival order.
		for sub in self
			.subchannels
			.values()
			.sorted_by(|a, b| a.endpoint().cmp(b.endpoint()))
		{
			if sub.state() != Connectivity::Ready {
				continue;
			}
			let lane = sub.endpoint().lane.clone();
			let cursor = self.cursors.entry(lane.clone()).or_default().clone();
			by_lane
				.entry(lane)
				.or_insert_with(|| Bucket {
					ready: vec![],
					cursor,
				})
				.ready
				.push(sub.clone());
			all_ready.push(sub.clone());
		}
		self.shared.buckets.store(Arc::new(BucketMap { by_lane, all_ready }));

		let next = self.rollup();
		self.aggregate.send_if_modified(|agg| {
			if *agg == next {
				false
			} else {
				*agg = next;
				true
			}
		});
	}

	fn rollup(&self) -> Connectivity {
		let mut connecting = false;
		let mut idle = false;
		for sub in self.subchannels.values() {
			match sub.state() {
				Connectivity::Ready => return Connectivity::Ready,
				Connectivity::Connecting => connecting = true,
				Connectivity::Idle => idle = true,
				Connectivity::TransientFailure | Connectivity::Shutdown => {},
			}
		}
		if connecting {
			Connectivity::Connecting
		} else if idle {
			Connectivity::Idle
		} else {
			Connectivity::TransientFailure
		}
	}
}

#[cfg(test)]
#[path = "balance_tests.rs"]
mod tests;
