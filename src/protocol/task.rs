//! Task records exchanged with functions and callbacks
//!
//! Both records share the wire shape `{owner, body, critical, correlationId}`.
//! The outbound [`Task`] carries the function's own URL in `body`; the decoded
//! [`TaskResult`] carries the function's result there. Keeping them as
//! separate types means code past the dispatch step cannot mistake one for
//! the other.

use crate::protocol::Delivery;
use crate::routing::Route;
use serde::{Deserialize, Deserializer, Serialize};

/// Request sent to a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Callback URL, seeded from the delivery's reply-to
    pub owner: String,
    /// Function URL; serialized as `body`
    #[serde(rename = "body")]
    pub destination: String,
    pub critical: bool,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
}

impl Task {
    /// Build the request for a routed delivery
    pub fn from_delivery(delivery: &Delivery, route: &Route) -> Self {
        Self {
            owner: delivery.reply_to_or_empty().to_string(),
            destination: route.destination.clone(),
            critical: route.critical,
            correlation_id: delivery.correlation_id_or_empty().to_string(),
        }
    }
}

/// Reply decoded from a function and forwarded to the callback
///
/// The reply replaces the request wholesale. Fields the function leaves out
/// or sets to `null` decode to their zero value, so a reply without `owner`
/// has an empty owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskResult {
    #[serde(deserialize_with = "null_as_default")]
    pub owner: String,
    /// Result payload produced by the function
    #[serde(deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(deserialize_with = "null_as_default")]
    pub critical: bool,
    #[serde(rename = "correlationId", deserialize_with = "null_as_default")]
    pub correlation_id: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::route;
    use serde_json::json;

    #[test]
    fn test_task_from_delivery() {
        let delivery = Delivery::new(1, "orders.critical.v2")
            .with_reply_to("http://caller.example/cb")
            .with_correlation_id("cid-1");
        let route = route(&delivery.routing_key).unwrap();

        let task = Task::from_delivery(&delivery, &route);

        assert_eq!(
            task,
            Task {
                owner: "http://caller.example/cb".to_string(),
                destination: "http://orders.default.svc.cluster.local/".to_string(),
                critical: true,
                correlation_id: "cid-1".to_string(),
            }
        );
    }

    #[test]
    fn test_task_wire_shape() {
        let task = Task {
            owner: "http://caller.example/cb".to_string(),
            destination: "http://orders.default.svc.cluster.local/".to_string(),
            critical: true,
            correlation_id: "cid-1".to_string(),
        };

        assert_eq!(
            serde_json::to_value(&task).unwrap(),
            json!({
                "owner": "http://caller.example/cb",
                "body": "http://orders.default.svc.cluster.local/",
                "critical": true,
                "correlationId": "cid-1"
            })
        );
    }

    #[test]
    fn test_result_omitting_owner_blanks_it() {
        let result: TaskResult =
            serde_json::from_str(r#"{"body":"42","critical":true,"correlationId":"cid-1"}"#)
                .unwrap();

        assert_eq!(result.owner, "");
        assert_eq!(result.body, "42");
        assert!(result.critical);
    }

    #[test]
    fn test_empty_result_is_all_zero_values() {
        let result: TaskResult = serde_json::from_str("{}").unwrap();
        assert_eq!(result, TaskResult::default());
    }

    #[test]
    fn test_null_fields_decode_as_zero_values() {
        let result: TaskResult = serde_json::from_str(
            r#"{"owner":null,"body":"42","critical":null,"correlationId":null}"#,
        )
        .unwrap();

        assert_eq!(
            result,
            TaskResult {
                body: "42".to_string(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_result_rejects_non_string_body() {
        let result = serde_json::from_str::<TaskResult>(r#"{"body": 42}"#);
        assert!(result.is_err());
    }
}
