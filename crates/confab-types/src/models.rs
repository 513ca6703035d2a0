use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery status of a direct message. Transitions are monotonic:
/// sent -> delivered -> read, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct StatusTransitionError {
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown delivery status: {0}")]
pub struct ParseStatusError(String);

impl DeliveryStatus {
    /// Validate a forward transition. Same-state and backward moves are rejected.
    pub fn advance_to(self, next: DeliveryStatus) -> Result<DeliveryStatus, StatusTransitionError> {
        if next > self {
            Ok(next)
        } else {
            Err(StatusTransitionError {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Marketplace role announced by the client when it joins the gateway.
/// Unknown role strings fail deserialization at the broker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Developer,
    Organization,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Developer => "developer",
            Self::Organization => "organization",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A direct message between two participants. Immutable once created,
/// except for the delivery status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_name: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_orders_forward() {
        assert!(DeliveryStatus::Sent < DeliveryStatus::Delivered);
        assert!(DeliveryStatus::Delivered < DeliveryStatus::Read);
    }

    #[test]
    fn advance_moves_forward_only() {
        assert_eq!(
            DeliveryStatus::Sent
                .advance_to(DeliveryStatus::Delivered)
                .unwrap(),
            DeliveryStatus::Delivered
        );
        assert_eq!(
            DeliveryStatus::Sent.advance_to(DeliveryStatus::Read).unwrap(),
            DeliveryStatus::Read
        );

        assert!(DeliveryStatus::Read
            .advance_to(DeliveryStatus::Sent)
            .is_err());
        assert!(DeliveryStatus::Read
            .advance_to(DeliveryStatus::Delivered)
            .is_err());
        assert!(DeliveryStatus::Delivered
            .advance_to(DeliveryStatus::Delivered)
            .is_err());
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Read,
        ] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>().unwrap(), status);
        }
        assert!("seen".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Role::Organization).unwrap(),
            "\"organization\""
        );
        assert!(serde_json::from_str::<Role>("\"admin\"").is_err());
    }
}
