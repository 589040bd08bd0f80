//! Name resolution for `cloud:///` targets: periodic registry discovery with
//! an SRV/A fallback, snapshot diffing, and publication to the balancer.

mod dns;

use std::cmp::Ordering as CmpOrdering;
use std::fmt;

pub use dns::{Dns, SrvTarget};
use itertools::Itertools;
use tokio::sync::watch;

use crate::registry::{self, Instance, RegistryClient};
use crate::telemetry::metrics::{Metrics, ResolveLabels, ResolveOutcome};
use crate::*;

/// Resolvable port of last resort when neither the instance attributes nor
/// the target name a port.
const DEFAULT_PORT: u16 = 80;

const SCHEME_PREFIX: &str = "cloud://";

/// A `cloud:///{service}.{namespace}[:{port}]` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTarget {
	pub service: Strng,
	pub namespace: Strng,
	pub port: Option<u16>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TargetError {
	#[error("invalid target {0}: {1}")]
	InvalidTarget(String, &'static str),
}

impl CloudTarget {
	/// The DNS name the fallback resolves: `service.namespace`.
	pub fn hostname(&self) -> Strng {
		strng::format!("{}.{}", self.service, self.namespace)
	}
}

impl TryFrom<&str> for CloudTarget {
	type Error = TargetError;

	fn try_from(raw: &str) -> Result<Self, Self::Error> {
		let err = |why: &'static str| TargetError::InvalidTarget(raw.to_string(), why);
		let rest = raw
			.strip_prefix(SCHEME_PREFIX)
			.ok_or_else(|| err("scheme must be cloud"))?;
		// The authority must be empty: the name lives in the first path
		// segment.
		let path = rest
			.strip_prefix('/')
			.ok_or_else(|| err("authority must be empty"))?;
		let segment = path.split('/').next().unwrap_or("");
		if segment.is_empty() {
			return Err(err("missing service.namespace"));
		}
		let (name, port) = match segment.rsplit_once(':') {
			Some((n, p)) => (n, Some(p.parse::<u16>().map_err(|_| err("invalid port"))?)),
			None => (segment, None),
		};
		let (service, namespace) = name
			.split_once('.')
			.ok_or_else(|| err("expected service.namespace"))?;
		if service.is_empty() || !service.bytes().all(valid_service_byte) {
			return Err(err("invalid service name"));
		}
		if namespace.is_empty() || !namespace.bytes().all(valid_namespace_byte) {
			return Err(err("invalid namespace"));
		}
		Ok(CloudTarget {
			service: strng::new(service),
			namespace: strng::new(namespace),
			port,
		})
	}
}

impl fmt::Display for CloudTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "cloud:///{}.{}", self.service, self.namespace)?;
		if let Some(port) = self.port {
			write!(f, ":{port}")?;
		}
		Ok(())
	}
}

fn valid_service_byte(b: u8) -> bool {
	b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn valid_namespace_byte(b: u8) -> bool {
	valid_service_byte(b) || b == b'.'
}

/// One routable backend instance. The triple is the identity: the balancer
/// keys subchannels on it and the resolver dedups on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
	pub host: Strng,
	pub port: u16,
	/// Empty is the default lane.
	pub lane: Strng,
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)?;
		if !self.lane.is_empty() {
			write!(f, "@{}", self.lane)?;
		}
		Ok(())
	}
}

impl Ord for Endpoint {
	fn cmp(&self, other: &Self) -> CmpOrdering {
		(&self.lane, &self.host, self.port).cmp(&(&other.lane, &other.host, other.port))
	}
}

impl PartialOrd for Endpoint {
	fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
		Some(self.cmp(other))
	}
}

/// A full snapshot of resolved backends. Each refresh replaces the previous
/// snapshot wholesale; the balancer diffs consecutive snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverState {
	/// Deduplicated, in (lane, host, port) order.
	pub endpoints: Vec<Endpoint>,
	pub error: Option<ResolverError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
	#[error("no backends available from the registry or dns")]
	Unavailable,
}

/// Periodically discovers instances for one target and publishes snapshots.
/// Owns its refresh task; `shutdown` (or drop) stops it.
pub struct Resolver {
	target: CloudTarget,
	task: tokio::task::JoinHandle<()>,
	rx: watch::Receiver<ResolverState>,
}

impl Resolver {
	pub fn spawn(
		target: CloudTarget,
		registry: Arc<dyn RegistryClient>,
		dns: Arc<Dns>,
		settings: crate::ResolverSettings,
		metrics: Arc<Metrics>,
	) -> Resolver {
		let (tx, rx) = watch::channel(ResolverState::default());
		let worker = Worker {
			target: target.clone(),
			registry,
			dns,
			settings,
			metrics,
			tx,
		};
		let task = tokio::spawn(worker.run());
		Resolver { target, task, rx }
	}

	pub fn target(&self) -> &CloudTarget {
		&self.target
	}

	pub fn subscribe(&self) -> watch::Receiver<ResolverState> {
		self.rx.clone()
	}

	pub fn shutdown(&self) {
		self.task.abort();
	}
}

impl Drop for Resolver {
	fn drop(&mut self) {
		self.task.abort();
	}
}

struct Worker {
	target: CloudTarget,
	registry: Arc<dyn RegistryClient>,
	dns: Arc<Dns>,
	settings: crate::ResolverSettings,
	metrics: Arc<Metrics>,
	tx: watch::Sender<ResolverState>,
}

impl Worker {
	async fn run(self) {
		let mut interval = tokio::time::interval(self.settings.refresh_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		let mut last: Option<ResolverState> = None;
		loop {
			interval.tick().await;
			let state = self.refresh().await;
			if last.as_ref() == Some(&state) {
				trace!(target = %self.target, "refresh produced no change");
				continue;
			}
			debug!(
				target = %self.target,
				endpoints = state.endpoints.len(),
				error = state.error.is_some(),
				"publishing update"
			);
			self.metrics.resolver_updates.inc();
			last = Some(state.clone());
			if self.tx.send(state).is_err() {
				// Every receiver is gone; nothing left to resolve for.
				return;
			}
		}
	}

	/// One discovery pass. Never fails: registry errors degrade to the DNS
	/// fallback or an Unavailable marker in the snapshot.
	async fn refresh(&self) -> ResolverState {
		let discovered = self
			.registry
			.discover_instances(&self.target.namespace, &self.target.service)
			.await;
		let (instances, registry_error) = match discovered {
			Ok(list) => (list, false),
			Err(e) => {
				warn!(target = %self.target, err = %e, "registry discovery failed");
				(vec![], true)
			},
		};

		let endpoints = self.to_endpoints(instances);
		if !endpoints.is_empty() {
			self.count_resolve(ResolveOutcome::Registry);
			return ResolverState {
				endpoints,
				error: None,
			};
		}

		if !self.settings.dns_fallback {
			self.count_resolve(if registry_error {
				ResolveOutcome::Error
			} else {
				ResolveOutcome::Registry
			});
			return ResolverState {
				endpoints: vec![],
				error: registry_error.then_some(ResolverError::Unavailable),
			};
		}

		let endpoints = self.dns_fallback().await;
		if endpoints.is_empty() {
			self.count_resolve(ResolveOutcome::Error);
			ResolverState {
				endpoints: vec![],
				error: Some(ResolverError::Unavailable),
			}
		} else {
			self.count_resolve(ResolveOutcome::Fallback);
			ResolverState {
				endpoints,
				error: None,
			}
		}
	}

	fn to_endpoints(&self, instances: Vec<Instance>) -> Vec<Endpoint> {
		instances
			.into_iter()
			.filter_map(|i| {
				let host = i.effective_host();
				if host.is_empty() {
					debug!(target = %self.target, "dropping instance with no host");
					return None;
				}
				let port = i
					.numeric_attr(registry::ATTR_GRPC_PORT)
					.or_else(|| i.numeric_attr(registry::ATTR_PORT))
					.or(self.target.port)
					.unwrap_or(DEFAULT_PORT);
				Some(Endpoint {
					host,
					port,
					lane: i.lane(),
				})
			})
			.sorted()
			.dedup()
			.collect()
	}

	/// SRV preferred (it names ports), then plain A records on the service
	/// hostname. Fallback endpoints always land in the default lane.
	async fn dns_fallback(&self) -> Vec<Endpoint> {
		let host = self.target.hostname();
		for name in [format!("_grpc._tcp.{host}"), format!("_tcp.{host}")] {
			match self.dns.lookup_srv(&name).await {
				Ok(targets) if !targets.is_empty() => {
					debug!(target = %self.target, %name, count = targets.len(), "srv fallback answered");
					return targets
						.into_iter()
						.map(|t| Endpoint {
							host: t.host,
							port: t.port,
							lane: Strng::default(),
						})
						.sorted()
						.dedup()
						.collect();
				},
				Ok(_) => {},
				Err(e) => debug!(target = %self.target, %name, err = %e, "srv lookup failed"),
			}
		}
		match self.dns.lookup_a(&host).await {
			Ok(ips) if !ips.is_empty() => {
				let port = self.target.port.unwrap_or(DEFAULT_PORT);
				ips
					.into_iter()
					.map(|ip| Endpoint {
						host: strng::format!("{ip}"),
						port,
						lane: Strng::default(),
					})
					.sorted()
					.dedup()
					.collect()
			},
			Ok(_) => vec![],
			Err(e) => {
				debug!(target = %self.target, host = %host, err = %e, "a lookup failed");
				vec![]
			},
		}
	}

	fn count_resolve(&self, outcome: ResolveOutcome) {
		self
			.metrics
			.resolves
			.get_or_create(&ResolveLabels { outcome })
			.inc();
	}
}

#[cfg(test)]
#[path = "resolve_tests.rs"]
mod tests;
