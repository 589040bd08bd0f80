//! Top-level wiring: one [Mesh] builds per-target channels (resolver plus
//! balancer) and the registrar from a single config and registry client.

use prometheus_client::registry::Registry;
use tokio::sync::watch;

use crate::balance::{BalancerPolicy, Connectivity, Connector, LaneBalancer, PickError, Subchannel, TcpConnector};
use crate::register::Registrar;
use crate::registry::{MetadataSource, RegistryClient};
use crate::resolve::{CloudTarget, Dns, Resolver};
use crate::telemetry::metrics::Metrics;
use crate::*;

pub struct Mesh {
	config: Arc<Config>,
	registry: Arc<dyn RegistryClient>,
	dns: Arc<Dns>,
	connector: Arc<dyn Connector>,
	metrics: Arc<Metrics>,
}

impl Mesh {
	pub fn new(
		config: Arc<Config>,
		registry_client: Arc<dyn RegistryClient>,
		registry: &mut Registry,
	) -> anyhow::Result<Mesh> {
		let dns = Arc::new(Dns::system().context("system resolver config")?);
		let metrics = Arc::new(Metrics::new(mesh_core::metrics::sub_registry(registry)));
		info!(
			version = %mesh_core::version::BuildInfo::new(),
			"mesh client initialized"
		);
		Ok(Mesh {
			config,
			registry: registry_client,
			dns,
			connector: Arc::new(TcpConnector),
			metrics,
		})
	}

	/// Swaps the transport runtime; RPC embeddings provide their own.
	pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Mesh {
		self.connector = connector;
		self
	}

	pub fn with_dns(mut self, dns: Arc<Dns>) -> Mesh {
		self.dns = dns;
		self
	}

	/// Builds a resolved, balanced channel for a `cloud:///` target.
	pub fn channel(&self, target: &str) -> anyhow::Result<LaneChannel> {
		let target = CloudTarget::try_from(target)?;
		// Lane routing is the only channel default that makes sense for
		// registry-resolved targets; reject anything else early.
		if self.config.balancer.policy != BalancerPolicy::LaneRoundRobin {
			anyhow::bail!(
				"cloud targets require the lane_round_robin balancer policy, got {:?}",
				self.config.balancer.policy
			);
		}
		let policy = self
			.config
			.balancer
			.client_policy
			.get(target.service.as_str())
			.copied()
			.unwrap_or(self.config.balancer.policy);
		debug!(target = %target, ?policy, "building channel");
		let resolver = Resolver::spawn(
			target,
			self.registry.clone(),
			self.dns.clone(),
			self.config.resolver.clone(),
			self.metrics.clone(),
		);
		let balancer = LaneBalancer::spawn(
			resolver.subscribe(),
			self.connector.clone(),
			policy,
			self.metrics.clone(),
		);
		Ok(LaneChannel { resolver, balancer })
	}

	/// Builds the registrar; `run` it with the host's ready signal.
	pub fn registrar(&self, metadata: Arc<dyn MetadataSource>) -> Registrar {
		Registrar::new(
			self.registry.clone(),
			metadata,
			self.config.registrar.clone(),
			self.metrics.clone(),
		)
	}
}

/// One resolved and balanced target.
pub struct LaneChannel {
	resolver: Resolver,
	balancer: LaneBalancer,
}

impl LaneChannel {
	pub fn target(&self) -> &CloudTarget {
		self.resolver.target()
	}

	/// Picks a backend for the current request, routing by the ambient lane.
	pub fn pick(&self) -> Result<Arc<Subchannel>, PickError> {
		self.balancer.pick()
	}

	pub fn pick_lane(&self, lane: &str) -> Result<Arc<Subchannel>, PickError> {
		self.balancer.pick_lane(lane)
	}

	pub fn states(&self) -> watch::Receiver<Connectivity> {
		self.balancer.states()
	}

	pub fn shutdown(&self) {
		self.resolver.shutdown();
		self.balancer.shutdown();
	}
}
