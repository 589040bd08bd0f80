use prometheus_client::registry::Registry;

/// Scopes all library metrics under one prefix so embedders can merge the
/// registry with their own without collisions.
pub fn sub_registry(registry: &mut Registry) -> &mut Registry {
	registry.sub_registry_with_prefix("meshlane")
}
