//! Routing key to function mapping
//!
//! A routing key `<function>.<marker>[...]` names the function to invoke and
//! whether the message is critical. Functions are reached through the
//! cluster-local service naming convention; the function name is used as-is.
//!
//! ```rust
//! use function_relay::routing::route;
//!
//! let route = route("orders.critical.v2").unwrap();
//! assert_eq!(route.destination, "http://orders.default.svc.cluster.local/");
//! assert!(route.critical);
//! ```

use thiserror::Error;

/// Second-segment value that marks a message as critical
pub const CRITICAL_MARKER: &str = "critical";

const SERVICE_SCHEME: &str = "http://";
const SERVICE_DOMAIN: &str = ".default.svc.cluster.local/";

/// Destination derived from a routing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// First segment of the routing key
    pub function: String,
    /// URL the task is posted to
    pub destination: String,
    pub critical: bool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("routing key '{key}' has {segments} segment(s), expected at least 2")]
    MalformedKey { key: String, segments: usize },
}

/// Map a routing key to its function destination and criticality
pub fn route(routing_key: &str) -> Result<Route, RoutingError> {
    let segments: Vec<&str> = routing_key.split('.').collect();
    if segments.len() < 2 {
        return Err(RoutingError::MalformedKey {
            key: routing_key.to_string(),
            segments: segments.len(),
        });
    }

    let function = segments[0];
    Ok(Route {
        function: function.to_string(),
        destination: destination_for(function),
        critical: segments[1] == CRITICAL_MARKER,
    })
}

/// Cluster-local URL of a function
pub fn destination_for(function: &str) -> String {
    format!("{SERVICE_SCHEME}{function}{SERVICE_DOMAIN}")
}

/// Whether a topic binding pattern matches a routing key
///
/// `*` stands for exactly one segment and `#` for zero or more, as in a
/// topic exchange.
pub fn binding_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    segments_match(&pattern, &key)
}

fn segments_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| segments_match(rest, &key[skip..])),
        Some((&segment, rest)) => match key.split_first() {
            Some((&word, key_rest)) => {
                (segment == "*" || segment == word) && segments_match(rest, key_rest)
            }
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_critical_route() {
        let route = route("orders.critical.v2").unwrap();
        assert_eq!(route.function, "orders");
        assert_eq!(route.destination, "http://orders.default.svc.cluster.local/");
        assert!(route.critical);
    }

    #[test]
    fn test_non_critical_markers() {
        for key in ["orders.function", "orders.Critical", "orders.critical-ish", "orders."] {
            assert!(!route(key).unwrap().critical, "{key} must not be critical");
        }
    }

    #[test]
    fn test_criticality_only_reads_second_segment() {
        assert!(!route("orders.normal.critical").unwrap().critical);
    }

    #[test]
    fn test_single_segment_is_malformed() {
        assert_eq!(
            route("orders"),
            Err(RoutingError::MalformedKey {
                key: "orders".to_string(),
                segments: 1,
            })
        );
        assert!(route("").is_err());
    }

    #[test]
    fn test_function_name_is_not_validated() {
        let route = route(".critical").unwrap();
        assert_eq!(route.destination, "http://.default.svc.cluster.local/");
        assert!(route.critical);
    }

    #[test]
    fn test_binding_matches() {
        assert!(binding_matches("#.function", "orders.function"));
        assert!(binding_matches("#.function", "function"));
        assert!(binding_matches("#.function", "orders.critical.function"));
        assert!(!binding_matches("#.function", "function.dead-letter"));
        assert!(binding_matches("*.critical.#", "orders.critical"));
        assert!(!binding_matches("orders.*", "orders.a.b"));
        assert!(binding_matches("#", "anything.at.all"));
    }

    proptest! {
        #[test]
        fn prop_route_matches_segments(
            function in "[a-z0-9-]{0,16}",
            marker in prop_oneof![Just("critical".to_string()), "[a-z]{0,10}"],
            rest in proptest::collection::vec("[a-z0-9]{0,6}", 0..3),
        ) {
            let mut key = format!("{function}.{marker}");
            for segment in &rest {
                key.push('.');
                key.push_str(segment);
            }

            let route = route(&key).unwrap();
            prop_assert_eq!(route.critical, marker == "critical");
            prop_assert_eq!(
                route.destination,
                format!("http://{function}.default.svc.cluster.local/")
            );
        }

        #[test]
        fn prop_keys_without_dots_are_rejected(key in "[a-z0-9-]{0,24}") {
            prop_assert!(route(&key).is_err());
        }

        #[test]
        fn prop_hash_binding_matches_every_key(key in "[a-z0-9]{1,6}(\\.[a-z0-9]{1,6}){0,4}") {
            prop_assert!(binding_matches("#", &key));
            prop_assert!(binding_matches(&key, &key));
        }
    }
}
