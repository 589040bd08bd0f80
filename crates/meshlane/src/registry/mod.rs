//! The service registry and local metadata collaborators. Both are
//! capability traits: the resolver and registrar are generic over whatever
//! store the deployment actually uses.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::*;

/// Canonical instance attribute names. The IPV4/PORT pair follows the cloud
/// registry's own naming; `ipv4` is accepted on read for registrations
/// written by older clients, and `grpcPort` overrides the generic port.
pub const ATTR_IPV4: &str = "AWS_INSTANCE_IPV4";
pub const ATTR_IPV4_COMPAT: &str = "ipv4";
pub const ATTR_PORT: &str = "AWS_INSTANCE_PORT";
pub const ATTR_GRPC_PORT: &str = "grpcPort";
pub const ATTR_LANE: &str = "lane";

/// One instance as the registry reports it.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
	#[serde(default)]
	pub host: Strng,
	#[serde(default)]
	pub port: Option<u16>,
	#[serde(default)]
	pub attributes: HashMap<Strng, Strng>,
}

impl Instance {
	pub fn attr(&self, key: &str) -> Option<&str> {
		self.attributes.get(key).map(|v| v.as_str())
	}

	/// A numeric attribute; empty or non-numeric values read as absent.
	pub fn numeric_attr(&self, key: &str) -> Option<u16> {
		self.attr(key).and_then(|v| v.trim().parse().ok())
	}

	/// The address attribute wins over the host field.
	pub fn effective_host(&self) -> Strng {
		self
			.attr(ATTR_IPV4)
			.or_else(|| self.attr(ATTR_IPV4_COMPAT))
			.map(strng::new)
			.unwrap_or_else(|| self.host.clone())
	}

	/// Empty is the default lane.
	pub fn lane(&self) -> Strng {
		self.attr(ATTR_LANE).map(strng::new).unwrap_or_default()
	}
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("registry unavailable: {0}")]
	Unavailable(String),
	#[error("registry rejected the request: {0}")]
	Rejected(String),
	#[error("no registry found for service {0}")]
	NotFound(Strng),
}

/// The managed service discovery store.
#[async_trait]
pub trait RegistryClient: Send + Sync + 'static {
	/// Lists the instances registered under `service` in `namespace`.
	async fn discover_instances(
		&self,
		namespace: &str,
		service: &str,
	) -> Result<Vec<Instance>, RegistryError>;

	/// Maps a service name to the id of the registry that owns it.
	async fn find_registry(&self, service: &str) -> Result<Strng, RegistryError>;

	/// Registers (or re-registers) one instance with the given attributes.
	async fn register_instance(
		&self,
		registry_id: &str,
		instance_id: &str,
		attributes: HashMap<Strng, Strng>,
	) -> Result<(), RegistryError>;
}

/// What the local process knows about itself, as reported by the
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMetadata {
	pub cluster_id: Strng,
	pub task_id: Strng,
	pub service_name: Strng,
	pub host: Strng,
	pub port: u16,
	pub lane: Strng,
}

impl LocalMetadata {
	/// Registration requires every field; a blank anywhere disables it.
	pub fn is_complete(&self) -> bool {
		!(self.cluster_id.is_empty()
			|| self.task_id.is_empty()
			|| self.service_name.is_empty()
			|| self.host.is_empty()
			|| self.port == 0
			|| self.lane.trim().is_empty())
	}
}

pub trait MetadataSource: Send + Sync + 'static {
	fn read_local(&self) -> Option<LocalMetadata>;
}

pub const ECS_METADATA_ENV: &str = "ECS_CONTAINER_METADATA_URI_V4";

/// Reads task metadata from the environment. Active only when the container
/// metadata endpoint variable is present; its absence means the process is
/// not running under the orchestrator and registration stays off.
#[derive(Debug, Default, Clone)]
pub struct EnvMetadataSource;

impl MetadataSource for EnvMetadataSource {
	fn read_local(&self) -> Option<LocalMetadata> {
		if std::env::var(ECS_METADATA_ENV).is_err() {
			return None;
		}
		let var = |k: &str| std::env::var(k).map(strng::new).unwrap_or_default();
		Some(LocalMetadata {
			cluster_id: var("CLUSTER_ID"),
			task_id: var("TASK_ID"),
			service_name: var("SERVICE_NAME"),
			host: var("INSTANCE_IP"),
			port: std::env::var("SERVICE_PORT")
				.ok()
				.and_then(|p| p.parse().ok())
				.unwrap_or(0),
			lane: var("LANE"),
		})
	}
}

#[cfg(test)]
pub(crate) mod mock {
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

	use async_trait::async_trait;

	use super::*;

	/// Scriptable in-memory registry shared by the resolver, registrar and
	/// wiring tests.
	#[derive(Default)]
	pub(crate) struct MockRegistry {
		pub(crate) instances: Mutex<HashMap<(String, String), Vec<Instance>>>,
		pub(crate) fail_discover: AtomicBool,
		pub(crate) discover_calls: AtomicUsize,
		/// Fail this many register calls before succeeding.
		pub(crate) register_failures: AtomicUsize,
		pub(crate) register_calls: AtomicUsize,
		pub(crate) registered: Mutex<Vec<(Strng, Strng, HashMap<Strng, Strng>)>>,
	}

	impl MockRegistry {
		pub(crate) fn set_instances(&self, namespace: &str, service: &str, instances: Vec<Instance>) {
			self
				.instances
				.lock()
				.unwrap()
				.insert((namespace.to_string(), service.to_string()), instances);
		}
	}

	#[async_trait]
	impl RegistryClient for MockRegistry {
		async fn discover_instances(
			&self,
			namespace: &str,
			service: &str,
		) -> Result<Vec<Instance>, RegistryError> {
			self.discover_calls.fetch_add(1, Ordering::SeqCst);
			if self.fail_discover.load(Ordering::SeqCst) {
				return Err(RegistryError::Unavailable("mock outage".to_string()));
			}
			Ok(
				self
					.instances
					.lock()
					.unwrap()
					.get(&(namespace.to_string(), service.to_string()))
					.cloned()
					.unwrap_or_default(),
			)
		}

		async fn find_registry(&self, service: &str) -> Result<Strng, RegistryError> {
			Ok(strng::format!("registry-{service}"))
		}

		async fn register_instance(
			&self,
			registry_id: &str,
			instance_id: &str,
			attributes: HashMap<Strng, Strng>,
		) -> Result<(), RegistryError> {
			let n = self.register_calls.fetch_add(1, Ordering::SeqCst);
			if n < self.register_failures.load(Ordering::SeqCst) {
				return Err(RegistryError::Unavailable("mock register outage".to_string()));
			}
			self.registered.lock().unwrap().push((
				strng::new(registry_id),
				strng::new(instance_id),
				attributes,
			));
			Ok(())
		}
	}

	pub(crate) fn instance(host: &str, attrs: &[(&str, &str)]) -> Instance {
		Instance {
			host: strng::new(host),
			port: None,
			attributes: attrs
				.iter()
				.map(|(k, v)| (strng::new(k), strng::new(v)))
				.collect(),
		}
	}
}
