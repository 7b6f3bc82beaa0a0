// Copyright 2025 Cowboy AI, LLC.

//! Output destination resolution

use std::collections::HashMap;

use crate::config::AggregatorConfig;
use crate::errors::{CorrelationError, CorrelationResult};

/// Default prefix for dynamically computed destinations
pub const DEFAULT_DYNAMIC_DESTINATION_PREFIX: &str = "commandConsumer_";

/// Resolves the downstream destination for a released aggregate
///
/// A statically bound destination wins; otherwise the destination is
/// computed deterministically as `{prefix}{target_service}` with the
/// service name lower-cased.
#[derive(Debug, Clone)]
pub struct OutputRouter {
    bindings: HashMap<String, String>,
    dynamic_prefix: Option<String>,
}

impl OutputRouter {
    /// Create a router from a binding table and an optional dynamic prefix
    pub fn new(bindings: HashMap<String, String>, dynamic_prefix: Option<String>) -> Self {
        Self {
            bindings,
            dynamic_prefix,
        }
    }

    /// Create a router from the aggregator configuration
    pub fn from_config(config: &AggregatorConfig) -> Self {
        Self::new(
            config.destination_bindings.clone(),
            config.dynamic_destination_prefix.clone(),
        )
    }

    /// Resolve the destination for a target service
    ///
    /// Fails with [`CorrelationError::UnresolvableDestination`] only when no
    /// static binding matches and the dynamic fallback is disabled.
    pub fn resolve(&self, target_service: &str) -> CorrelationResult<String> {
        if let Some(bound) = self.bindings.get(target_service) {
            return Ok(bound.clone());
        }
        match &self.dynamic_prefix {
            Some(prefix) => Ok(format!("{prefix}{}", target_service.to_lowercase())),
            None => Err(CorrelationError::UnresolvableDestination(
                target_service.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn router_with_binding() -> OutputRouter {
        let mut bindings = HashMap::new();
        bindings.insert("payment".to_string(), "namespace.payment".to_string());
        OutputRouter::new(
            bindings,
            Some(DEFAULT_DYNAMIC_DESTINATION_PREFIX.to_string()),
        )
    }

    #[test_case("payment", "namespace.payment" ; "static binding wins")]
    #[test_case("rb", "commandConsumer_rb" ; "dynamic fallback")]
    #[test_case("Audit-Service", "commandConsumer_audit-service" ; "dynamic fallback lower-cases")]
    fn test_resolution(target: &str, expected: &str) {
        let router = router_with_binding();
        assert_eq!(router.resolve(target).unwrap(), expected);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let router = router_with_binding();
        assert_eq!(
            router.resolve("payment").unwrap(),
            router.resolve("payment").unwrap()
        );
        assert_eq!(router.resolve("rb").unwrap(), router.resolve("rb").unwrap());
    }

    #[test]
    fn test_unresolvable_without_dynamic_fallback() {
        let router = OutputRouter::new(HashMap::new(), None);
        let err = router.resolve("payment").unwrap_err();
        assert!(matches!(
            err,
            CorrelationError::UnresolvableDestination(service) if service == "payment"
        ));
    }

    #[test]
    fn test_static_binding_still_resolves_without_dynamic_fallback() {
        let mut bindings = HashMap::new();
        bindings.insert("payment".to_string(), "namespace.payment".to_string());
        let router = OutputRouter::new(bindings, None);

        assert_eq!(router.resolve("payment").unwrap(), "namespace.payment");
    }
}
