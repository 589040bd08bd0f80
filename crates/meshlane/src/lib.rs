use std::collections::HashMap;

pub use mesh_core::prelude::*;

pub mod balance;
pub mod config;
pub mod interceptor;
pub mod mesh;
pub mod register;
pub mod registry;
pub mod resolve;
pub mod serdes;
pub mod telemetry;
pub mod trace;

pub use mesh::{LaneChannel, Mesh};

use crate::balance::BalancerPolicy;

/// RawConfig represents the inputs a user can pass in. [Config] is the
/// internal representation after applying environment overrides and
/// defaults.
#[derive(serde::Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawConfig {
	resolver: Option<RawResolver>,
	balancer: Option<RawBalancer>,
	registrar: Option<RawRegistrar>,
}

#[derive(serde::Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawResolver {
	#[serde(default, with = "serdes::serde_dur_option")]
	refresh_interval: Option<Duration>,
	log_dns_fallback: Option<bool>,
}

#[derive(serde::Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawBalancer {
	policy: Option<BalancerPolicy>,
	/// Per service policy overrides, keyed by service name.
	#[serde(default)]
	client_policy: HashMap<String, BalancerPolicy>,
}

#[derive(serde::Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawRegistrar {
	attempts: Option<u32>,
	#[serde(default, with = "serdes::serde_dur_option")]
	backoff: Option<Duration>,
}

#[derive(serde::Serialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
	pub resolver: ResolverSettings,
	pub balancer: BalancerSettings,
	pub registrar: RegistrarSettings,
}

#[derive(serde::Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolverSettings {
	/// How often the registry is polled for the current instance set.
	#[serde(with = "serdes::serde_dur")]
	pub refresh_interval: Duration,
	/// Fall back to SRV/A lookups when the registry errors or comes back
	/// empty.
	#[serde(rename = "logDnsFallback")]
	pub dns_fallback: bool,
}

impl Default for ResolverSettings {
	fn default() -> Self {
		ResolverSettings {
			refresh_interval: Duration::from_secs(10),
			dns_fallback: false,
		}
	}
}

#[derive(serde::Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalancerSettings {
	pub policy: BalancerPolicy,
	pub client_policy: HashMap<Strng, BalancerPolicy>,
}

#[derive(serde::Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrarSettings {
	pub attempts: u32,
	#[serde(with = "serdes::serde_dur")]
	pub backoff: Duration,
}

impl Default for RegistrarSettings {
	fn default() -> Self {
		RegistrarSettings {
			attempts: 10,
			backoff: Duration::from_secs(1),
		}
	}
}
