use tokio::sync::watch;

use super::dns::tests::Mock as DnsMock;
use super::*;
use crate::ResolverSettings;
use crate::registry::mock::{MockRegistry, instance};

#[test]
fn parses_target_without_port() {
	let t = CloudTarget::try_from("cloud:///billing.prod").unwrap();
	assert_eq!(t.service, "billing");
	assert_eq!(t.namespace, "prod");
	assert_eq!(t.port, None);
	assert_eq!(t.hostname(), "billing.prod");
	assert_eq!(t.to_string(), "cloud:///billing.prod");
}

#[test]
fn parses_target_with_port_and_dotted_namespace() {
	let t = CloudTarget::try_from("cloud:///billing.prod.internal:7000").unwrap();
	assert_eq!(t.service, "billing");
	assert_eq!(t.namespace, "prod.internal");
	assert_eq!(t.port, Some(7000));
}

#[test]
fn rejects_malformed_targets() {
	for raw in [
		"dns:///billing.prod",
		"cloud://authority/billing.prod",
		"cloud:///",
		"cloud:///billing",
		"cloud:///billing.prod:",
		"cloud:///billing.prod:notaport",
		"cloud:///bil ling.prod",
		"cloud:///billing.pr od",
	] {
		assert!(
			matches!(CloudTarget::try_from(raw), Err(TargetError::InvalidTarget(..))),
			"{raw} should not parse"
		);
	}
}

fn worker(registry: Arc<MockRegistry>, dns: Arc<DnsMock>, settings: ResolverSettings) -> Worker {
	let (tx, _rx) = watch::channel(ResolverState::default());
	Worker {
		target: CloudTarget::try_from("cloud:///billing.prod:9000").unwrap(),
		registry,
		dns: Arc::new(Dns::Mock(dns)),
		settings,
		metrics: Arc::new(Metrics::default()),
		tx,
	}
}

#[tokio::test]
async fn refresh_maps_instances_to_endpoints() {
	let registry = Arc::new(MockRegistry::default());
	registry.set_instances(
		"prod",
		"billing",
		vec![
			instance("1.1.1.2", &[("lane", "canary"), ("grpcPort", "7000")]),
			instance("1.1.1.1", &[("lane", "canary"), ("grpcPort", "7000")]),
			instance("1.1.1.3", &[]),
		],
	);
	let w = worker(registry, Arc::new(DnsMock::default()), ResolverSettings::default());
	let state = w.refresh().await;
	assert_eq!(state.error, None);
	assert_eq!(
		state.endpoints,
		vec![
			Endpoint { host: "1.1.1.3".into(), port: 9000, lane: "".into() },
			Endpoint { host: "1.1.1.1".into(), port: 7000, lane: "canary".into() },
			Endpoint { host: "1.1.1.2".into(), port: 7000, lane: "canary".into() },
		]
	);
}

#[tokio::test]
async fn port_resolution_order() {
	let registry = Arc::new(MockRegistry::default());
	registry.set_instances(
		"prod",
		"billing",
		vec![
			// grpcPort beats the generic port attribute
			instance("a", &[("grpcPort", "7000"), ("AWS_INSTANCE_PORT", "8000")]),
			instance("b", &[("AWS_INSTANCE_PORT", "8000")]),
			// only the canonical attributes count; a stray `port` does not
			instance("c", &[("port", "8500")]),
			// non numeric and empty attribute values are skipped, not errors
			instance("d", &[("grpcPort", "x"), ("AWS_INSTANCE_PORT", "")]),
		],
	);
	let w = worker(registry, Arc::new(DnsMock::default()), ResolverSettings::default());
	let by_host: std::collections::HashMap<_, _> = w
		.refresh()
		.await
		.endpoints
		.into_iter()
		.map(|e| (e.host.clone(), e.port))
		.collect();
	assert_eq!(by_host["a"], 7000);
	assert_eq!(by_host["b"], 8000);
	// both fall through to the target port
	assert_eq!(by_host["c"], 9000);
	assert_eq!(by_host["d"], 9000);
}

#[tokio::test]
async fn ipv4_attribute_wins_and_empty_hosts_drop() {
	let registry = Arc::new(MockRegistry::default());
	registry.set_instances(
		"prod",
		"billing",
		vec![
			instance("ignored", &[("AWS_INSTANCE_IPV4", "10.0.0.1")]),
			instance("", &[("ipv4", "10.0.0.2")]),
			instance("", &[]),
		],
	);
	let w = worker(registry, Arc::new(DnsMock::default()), ResolverSettings::default());
	let hosts: Vec<_> = w
		.refresh()
		.await
		.endpoints
		.into_iter()
		.map(|e| e.host)
		.collect();
	assert_eq!(hosts, vec![strng::new("10.0.0.1"), strng::new("10.0.0.2")]);
}

#[tokio::test]
async fn duplicate_instances_collapse() {
	let registry = Arc::new(MockRegistry::default());
	registry.set_instances(
		"prod",
		"billing",
		vec![instance("1.1.1.1", &[("lane", "canary")]); 1000],
	);
	let w = worker(registry, Arc::new(DnsMock::default()), ResolverSettings::default());
	assert_eq!(w.refresh().await.endpoints.len(), 1);
}

#[tokio::test]
async fn registry_error_without_fallback_is_unavailable() {
	let registry = Arc::new(MockRegistry::default());
	registry.fail_discover.store(true, std::sync::atomic::Ordering::SeqCst);
	let w = worker(registry, Arc::new(DnsMock::default()), ResolverSettings::default());
	let state = w.refresh().await;
	assert!(state.endpoints.is_empty());
	assert_eq!(state.error, Some(ResolverError::Unavailable));
}

#[tokio::test]
async fn empty_registry_without_fallback_is_not_an_error() {
	let registry = Arc::new(MockRegistry::default());
	let w = worker(registry, Arc::new(DnsMock::default()), ResolverSettings::default());
	let state = w.refresh().await;
	assert!(state.endpoints.is_empty());
	assert_eq!(state.error, None);
}

fn fallback_settings() -> ResolverSettings {
	ResolverSettings {
		dns_fallback: true,
		..Default::default()
	}
}

#[tokio::test]
async fn fallback_prefers_grpc_srv() {
	let registry = Arc::new(MockRegistry::default());
	registry.fail_discover.store(true, std::sync::atomic::Ordering::SeqCst);
	let dns = Arc::new(DnsMock::default());
	dns.add_srv("_grpc._tcp.billing.prod", vec![("10.0.0.1", 7001), ("10.0.0.2", 7002)]);
	dns.add_srv("_tcp.billing.prod", vec![("10.0.0.9", 9999)]);
	let w = worker(registry, dns, fallback_settings());
	let state = w.refresh().await;
	assert_eq!(state.error, None);
	assert_eq!(
		state.endpoints,
		vec![
			Endpoint { host: "10.0.0.1".into(), port: 7001, lane: "".into() },
			Endpoint { host: "10.0.0.2".into(), port: 7002, lane: "".into() },
		]
	);
}

#[tokio::test]
async fn fallback_uses_tcp_srv_when_grpc_absent() {
	let registry = Arc::new(MockRegistry::default());
	let dns = Arc::new(DnsMock::default());
	dns.add_srv("_tcp.billing.prod", vec![("10.0.0.9", 9999)]);
	let w = worker(registry, dns, fallback_settings());
	let state = w.refresh().await;
	assert_eq!(
		state.endpoints,
		vec![Endpoint { host: "10.0.0.9".into(), port: 9999, lane: "".into() }]
	);
}

#[tokio::test]
async fn fallback_uses_a_records_with_target_port() {
	let registry = Arc::new(MockRegistry::default());
	let dns = Arc::new(DnsMock::default());
	dns.add_a("billing.prod", vec!["10.1.0.1".parse().unwrap()]);
	let w = worker(registry, dns, fallback_settings());
	let state = w.refresh().await;
	assert_eq!(
		state.endpoints,
		vec![Endpoint { host: "10.1.0.1".into(), port: 9000, lane: "".into() }]
	);
}

#[tokio::test]
async fn exhausted_fallback_reports_unavailable() {
	let registry = Arc::new(MockRegistry::default());
	registry.fail_discover.store(true, std::sync::atomic::Ordering::SeqCst);
	let w = worker(registry, Arc::new(DnsMock::default()), fallback_settings());
	let state = w.refresh().await;
	assert!(state.endpoints.is_empty());
	assert_eq!(state.error, Some(ResolverError::Unavailable));
}

#[tokio::test(start_paused = true)]
async fn unchanged_registry_produces_no_new_emission() {
	let registry = Arc::new(MockRegistry::default());
	registry.set_instances("prod", "billing", vec![instance("1.1.1.1", &[("AWS_INSTANCE_PORT", "80")])]);
	let metrics = Arc::new(Metrics::default());
	let resolver = Resolver::spawn(
		CloudTarget::try_from("cloud:///billing.prod").unwrap(),
		registry.clone(),
		Arc::new(Dns::Mock(Arc::new(DnsMock::default()))),
		ResolverSettings::default(),
		metrics.clone(),
	);
	let mut rx = resolver.subscribe();

	// First refresh publishes.
	tokio::time::timeout(Duration::from_secs(5), rx.changed())
		.await
		.expect("first emission")
		.unwrap();
	assert_eq!(rx.borrow_and_update().endpoints.len(), 1);

	// Several more ticks against an unchanged registry: refreshes happen,
	// nothing is emitted.
	tokio::time::sleep(Duration::from_secs(35)).await;
	assert!(registry.discover_calls.load(std::sync::atomic::Ordering::SeqCst) >= 3);
	assert_eq!(metrics.resolver_updates.get(), 1);
	assert!(!rx.has_changed().unwrap());

	// A registry change is picked up on the next tick.
	registry.set_instances(
		"prod",
		"billing",
		vec![
			instance("1.1.1.1", &[("AWS_INSTANCE_PORT", "80")]),
			instance("1.1.1.2", &[("AWS_INSTANCE_PORT", "80")]),
		],
	);
	tokio::time::timeout(Duration::from_secs(15), rx.changed())
		.await
		.expect("second emission")
		.unwrap();
	assert_eq!(rx.borrow_and_update().endpoints.len(), 2);
	resolver.shutdown();
}
