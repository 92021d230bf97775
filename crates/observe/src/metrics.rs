use {
    prometheus::Registry,
    prometheus_metric_storage::StorageRegistry,
    std::sync::OnceLock,
};

static REGISTRY: OnceLock<StorageRegistry> = OnceLock::new();

/// Configures the global metrics registry. Call once at startup before
/// any metric storage is instantiated; later calls (e.g. from tests
/// sharing a process) keep the first registry.
pub fn setup_registry(prefix: Option<String>) {
    let registry = Registry::new_custom(prefix, None).expect("invalid metrics prefix");
    let _ = REGISTRY.set(StorageRegistry::new(registry));
}

pub fn get_storage_registry() -> &'static StorageRegistry {
    REGISTRY.get_or_init(|| StorageRegistry::new(Registry::new()))
}

pub fn get_registry() -> &'static Registry {
    get_storage_registry().registry()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_usable_without_setup() {
        let gauge = prometheus::IntGauge::new("observe_test_gauge", "test").unwrap();
        get_registry().register(Box::new(gauge.clone())).unwrap();
        gauge.set(1);
    }
}
