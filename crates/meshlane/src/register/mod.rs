//! One-shot registration of the local process into the service registry,
//! driven by the host's "application ready" signal.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::registry::{self, LocalMetadata, MetadataSource, RegistryClient, RegistryError};
use crate::telemetry::metrics::{Metrics, RegisterLabels, RegisterResult};
use crate::*;

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
	#[error("registration exhausted after {attempts} attempts")]
	Exhausted { attempts: u32 },
}

/// Advertises the local instance (address, port, lane) once the host is
/// ready. Transient failures retry on a fixed delay; exhaustion logs and
/// gives up without touching the process lifecycle.
pub struct Registrar {
	registry: Arc<dyn RegistryClient>,
	metadata: Arc<dyn MetadataSource>,
	settings: crate::RegistrarSettings,
	metrics: Arc<Metrics>,
}

impl Registrar {
	pub fn new(
		registry: Arc<dyn RegistryClient>,
		metadata: Arc<dyn MetadataSource>,
		settings: crate::RegistrarSettings,
		metrics: Arc<Metrics>,
	) -> Registrar {
		Registrar {
			registry,
			metadata,
			settings,
			metrics,
		}
	}

	/// Waits for the ready signal, then registers. A dropped sender means
	/// the process never became ready; there is nothing to advertise.
	/// Registration failure never propagates into the host lifecycle.
	pub async fn run(self, ready: oneshot::Receiver<()>) {
		if ready.await.is_err() {
			debug!("ready signal dropped; skipping registration");
			return;
		}
		let _ = self.register().await;
	}

	pub async fn register(&self) -> Result<(), RegisterError> {
		let Some(meta) = self.metadata.read_local() else {
			debug!("no local metadata source; registration disabled");
			return Ok(());
		};
		if !meta.is_complete() {
			info!(
				service = %meta.service_name,
				lane = %meta.lane,
				"metadata incomplete; skipping registration"
			);
			return Ok(());
		}
		let attributes: HashMap<Strng, Strng> = HashMap::from([
			(strng::new(registry::ATTR_IPV4), meta.host.clone()),
			(strng::new(registry::ATTR_PORT), strng::format!("{}", meta.port)),
			(strng::new(registry::ATTR_LANE), meta.lane.clone()),
		]);

		for attempt in 1..=self.settings.attempts {
			match self.attempt(&meta, attributes.clone()).await {
				Ok(()) => {
					info!(
						service = %meta.service_name,
						lane = %meta.lane,
						attempt,
						"instance registered"
					);
					self.count(RegisterResult::Ok);
					return Ok(());
				},
				Err(e) => {
					warn!(
						service = %meta.service_name,
						attempt,
						err = %e,
						"registration attempt failed"
					);
					self.count(RegisterResult::Retry);
					if attempt < self.settings.attempts {
						tokio::time::sleep(self.settings.backoff).await;
					}
				},
			}
		}
		warn!(
			service = %meta.service_name,
			attempts = self.settings.attempts,
			"registration exhausted; giving up"
		);
		self.count(RegisterResult::Exhausted);
		Err(RegisterError::Exhausted {
			attempts: self.settings.attempts,
		})
	}

	async fn attempt(
		&self,
		meta: &LocalMetadata,
		attributes: HashMap<Strng, Strng>,
	) -> Result<(), RegistryError> {
		let registry_id = self.registry.find_registry(&meta.service_name).await?;
		self
			.registry
			.register_instance(&registry_id, &meta.task_id, attributes)
			.await
	}

	fn count(&self, result: RegisterResult) {
		self
			.metrics
			.registrations
			.get_or_create(&RegisterLabels { result })
			.inc();
	}
}
