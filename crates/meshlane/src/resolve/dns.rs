use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::net::NetError as ResolveError;
use hickory_resolver::net::runtime::TokioRuntimeProvider;
use hickory_resolver::proto::rr::RData;
use hickory_resolver::TokioResolver;

use crate::*;

/// Host/port pair from an SRV answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
	pub host: Strng,
	pub port: u16,
}

#[derive(Debug)]
pub enum Dns {
	Real(TokioResolver),
	#[cfg(test)]
	Mock(Arc<tests::Mock>),
}

impl Dns {
	pub fn new(config: ResolverConfig, opts: ResolverOpts) -> anyhow::Result<Dns> {
		let mut rb =
			hickory_resolver::Resolver::builder_with_config(config, TokioRuntimeProvider::default());
		*rb.options_mut() = opts;
		Ok(Dns::Real(rb.build()?))
	}

	pub fn system() -> anyhow::Result<Dns> {
		let (config, opts) = hickory_resolver::system_conf::read_system_conf()?;
		Self::new(config, opts)
	}

	pub async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, ResolveError> {
		match self {
			Dns::Real(resolver) => resolver.srv_lookup(name).await.map(|lookup| {
				lookup
					.answers()
					.iter()
					.filter_map(|record| match &record.data {
						RData::SRV(srv) => Some(SrvTarget {
							host: strng::new(srv.target.to_utf8().trim_end_matches('.')),
							port: srv.port,
						}),
						_ => None,
					})
					.collect()
			}),
			#[cfg(test)]
			Dns::Mock(mock) => mock.lookup_srv(name),
		}
	}

	pub async fn lookup_a(&self, name: &str) -> Result<Vec<IpAddr>, ResolveError> {
		match self {
			Dns::Real(resolver) => resolver
				.lookup_ip(name)
				.await
				.map(|lookup| lookup.iter().collect()),
			#[cfg(test)]
			Dns::Mock(mock) => mock.lookup_a(name),
		}
	}
}

#[cfg(test)]
#[path = "dns_tests.rs"]
pub(crate) mod tests;
