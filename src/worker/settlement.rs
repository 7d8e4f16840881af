//! Settlement decisions for a processed delivery
//!
//! Pure functions only. The worker applies the returned [`Settlement`] to the
//! subscription, so every policy here is testable without a broker.

use crate::callback::CallbackOutcome;
use crate::config::DeliveryMode;

/// How a delivery is settled with the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Nack with requeue; the broker redelivers it with `redelivered` set
    Requeue { reason: String },
    /// Nack without requeue; the queue routes it to its dead-letter exchange
    DeadLetter { reason: String },
}

impl Settlement {
    pub fn is_ack(&self) -> bool {
        matches!(self, Settlement::Ack)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Settlement::Ack => "ack",
            Settlement::Requeue { .. } => "requeue",
            Settlement::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// One retry is allowed before a failing delivery is dead-lettered
///
/// `failed_before` covers both broker redeliveries and dead-lettered copies
/// that came back, see [`Delivery::has_failed_before`].
///
/// [`Delivery::has_failed_before`]: crate::protocol::Delivery::has_failed_before
pub fn retry_or_dead_letter(failed_before: bool, reason: impl Into<String>) -> Settlement {
    let reason = reason.into();
    if failed_before {
        Settlement::DeadLetter { reason }
    } else {
        Settlement::Requeue { reason }
    }
}

/// Criticality used for the callback step
///
/// In `fail_fast` the function's reply replaces the whole record, so its
/// `critical` flag wins. In `guarded` a reply cannot downgrade a task the
/// routing key marked critical.
pub fn effective_criticality(mode: DeliveryMode, routed: bool, replied: bool) -> bool {
    match mode {
        DeliveryMode::FailFast => replied,
        DeliveryMode::Guarded => routed || replied,
    }
}

/// Settlement once dispatch succeeded and the callback step has run
pub fn settlement_after_callback(
    mode: DeliveryMode,
    critical: bool,
    outcome: &CallbackOutcome,
    failed_before: bool,
) -> Settlement {
    match (mode, critical, outcome) {
        (DeliveryMode::Guarded, true, CallbackOutcome::Failed { attempts, reason }) => {
            retry_or_dead_letter(
                failed_before,
                format!("critical callback failed after {attempts} attempts: {reason}"),
            )
        }
        // A retry cannot produce an address
        (DeliveryMode::Guarded, true, CallbackOutcome::Skipped) => Settlement::DeadLetter {
            reason: "critical result has no callback address".to_string(),
        },
        _ => Settlement::Ack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> CallbackOutcome {
        CallbackOutcome::Failed {
            attempts: 4,
            reason: "callback returned status 503".to_string(),
        }
    }

    #[test]
    fn test_first_failure_requeues() {
        assert!(matches!(
            retry_or_dead_letter(false, "boom"),
            Settlement::Requeue { .. }
        ));
    }

    #[test]
    fn test_redelivered_failure_dead_letters() {
        assert_eq!(
            retry_or_dead_letter(true, "boom"),
            Settlement::DeadLetter {
                reason: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_non_critical_callback_failure_acks() {
        for mode in [DeliveryMode::Guarded, DeliveryMode::FailFast] {
            assert_eq!(
                settlement_after_callback(mode, false, &failed(), false),
                Settlement::Ack
            );
        }
    }

    #[test]
    fn test_critical_callback_failure_in_fail_fast_acks() {
        assert_eq!(
            settlement_after_callback(DeliveryMode::FailFast, true, &failed(), false),
            Settlement::Ack
        );
    }

    #[test]
    fn test_critical_callback_failure_in_guarded_is_not_acked() {
        let first = settlement_after_callback(DeliveryMode::Guarded, true, &failed(), false);
        assert_eq!(first.label(), "requeue");

        let second = settlement_after_callback(DeliveryMode::Guarded, true, &failed(), true);
        assert_eq!(second.label(), "dead_letter");
        if let Settlement::DeadLetter { reason } = second {
            assert!(reason.contains("4 attempts"));
        }
    }

    #[test]
    fn test_delivered_callback_acks() {
        let delivered = CallbackOutcome::Delivered { attempts: 1 };
        assert!(settlement_after_callback(DeliveryMode::Guarded, true, &delivered, false).is_ack());
        assert!(settlement_after_callback(DeliveryMode::FailFast, true, &delivered, true).is_ack());
    }

    #[test]
    fn test_skipped_callback_settlement() {
        let skipped = CallbackOutcome::Skipped;

        assert!(settlement_after_callback(DeliveryMode::Guarded, false, &skipped, false).is_ack());
        assert!(settlement_after_callback(DeliveryMode::FailFast, true, &skipped, false).is_ack());
        assert_eq!(
            settlement_after_callback(DeliveryMode::Guarded, true, &skipped, false).label(),
            "dead_letter"
        );
    }

    #[test]
    fn test_effective_criticality() {
        assert!(effective_criticality(DeliveryMode::Guarded, true, false));
        assert!(effective_criticality(DeliveryMode::Guarded, false, true));
        assert!(!effective_criticality(DeliveryMode::Guarded, false, false));

        assert!(!effective_criticality(DeliveryMode::FailFast, true, false));
        assert!(effective_criticality(DeliveryMode::FailFast, false, true));
    }
}
