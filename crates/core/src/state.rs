//! Delivery outcome tracked per event, per side.

use serde::{Deserialize, Serialize};

/// Delivery state of an event on one side of the bus (producer send-state or
/// consumer consume-state).
///
/// `Pending` moves to exactly one terminal state. A terminal state is not re-entered
/// for the same id unless the event is resubmitted as a new logical attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Recorded, outcome not yet known.
    Pending,
    /// Transmitted (producer) or handled (consumer).
    Succeeded,
    /// Transport or handler failure.
    Failed,
    /// Dropped by policy (TTL elapsed, blacklisted) without being processed.
    Expired,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryState::Pending)
    }

    /// Numeric code used by storage schemas (1 = pending .. 4 = expired).
    pub fn code(&self) -> u8 {
        match self {
            DeliveryState::Pending => 1,
            DeliveryState::Succeeded => 2,
            DeliveryState::Failed => 3,
            DeliveryState::Expired => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DeliveryState::Pending),
            2 => Some(DeliveryState::Succeeded),
            3 => Some(DeliveryState::Failed),
            4 => Some(DeliveryState::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Succeeded => "succeeded",
            DeliveryState::Failed => "failed",
            DeliveryState::Expired => "expired",
        }
    }
}

impl core::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for state in [
            DeliveryState::Pending,
            DeliveryState::Succeeded,
            DeliveryState::Failed,
            DeliveryState::Expired,
        ] {
            assert_eq!(DeliveryState::from_code(state.code()), Some(state));
        }
        assert_eq!(DeliveryState::from_code(0), None);
        assert_eq!(DeliveryState::from_code(5), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!DeliveryState::Pending.is_terminal());
        assert!(DeliveryState::Succeeded.is_terminal());
        assert!(DeliveryState::Failed.is_terminal());
        assert!(DeliveryState::Expired.is_terminal());
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&DeliveryState::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
    }
}
