use std::env;
use std::str::FromStr;

use crate::*;

/// Parses a YAML config document and applies environment overrides. An empty
/// document yields the defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
	let raw: RawConfig = if contents.trim().is_empty() {
		RawConfig::default()
	} else {
		serde_yaml::from_str(contents)?
	};
	resolve_config(raw)
}

fn resolve_config(raw: RawConfig) -> anyhow::Result<Config> {
	let resolver = raw.resolver.unwrap_or_default();
	let balancer = raw.balancer.unwrap_or_default();
	let registrar = raw.registrar.unwrap_or_default();

	Ok(Config {
		resolver: ResolverSettings {
			refresh_interval: env_override_duration("REFRESH_INTERVAL")?
				.or(resolver.refresh_interval)
				.unwrap_or(Duration::from_secs(10)),
			dns_fallback: env_override::<bool>("LOG_DNS_FALLBACK")?
				.or(resolver.log_dns_fallback)
				.unwrap_or(false),
		},
		balancer: BalancerSettings {
			policy: env_override("BALANCER_POLICY")?
				.or(balancer.policy)
				.unwrap_or_default(),
			client_policy: balancer
				.client_policy
				.into_iter()
				.map(|(k, v)| (strng::new(k), v))
				.collect(),
		},
		registrar: RegistrarSettings {
			attempts: env_override::<u32>("REGISTRAR_ATTEMPTS")?
				.or(registrar.attempts)
				.unwrap_or(10),
			backoff: env_override_duration("REGISTRAR_BACKOFF")?
				.or(registrar.backoff)
				.unwrap_or(Duration::from_secs(1)),
		},
	})
}

/// An environment override for one setting. Unset and empty variables both
/// read as "no override"; anything else must parse.
fn env_override<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
	T::Err: Display,
{
	let Ok(raw) = env::var(name) else {
		return Ok(None);
	};
	if raw.is_empty() {
		return Ok(None);
	}
	raw
		.parse()
		.map(Some)
		.map_err(|e: T::Err| anyhow::anyhow!("{name}={raw} is not valid: {e}"))
}

fn env_override_duration(name: &str) -> anyhow::Result<Option<Duration>> {
	let Some(raw) = env_override::<String>(name)? else {
		return Ok(None);
	};
	duration_str::parse(&raw)
		.map(Some)
		.map_err(|e| anyhow::anyhow!("{name}={raw} is not a valid duration: {e}"))
}
