use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use diesel::expression::AsExpression;
use diesel::deserialize::FromSqlRow;
use diesel::sql_types::Text;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod clock;
pub mod retry;
mod sql;

/// Header carrying the shared secret on inventory -> order status callbacks.
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Confirmed,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// CONFIRMED and FAILED are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Failed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// Outcome stored in the reservation ledger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReservationStatus {
    Success,
    Failed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Success => "SUCCESS",
            ReservationStatus::Failed => "FAILED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReservationStatus::Success)
    }

    /// The order status a decision of this kind resolves to.
    pub fn order_status(&self) -> OrderStatus {
        match self {
            ReservationStatus::Success => OrderStatus::Confirmed,
            ReservationStatus::Failed => OrderStatus::Failed,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(ReservationStatus::Success),
            "FAILED" => Ok(ReservationStatus::Failed),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("quantity must be a positive integer, got {0}")]
    InvalidQuantity(String),
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
    #[error("malformed body: {0}")]
    Malformed(String),
}

/// A validated reservation request, as carried by tasks and RPC calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveTask {
    pub order_id: String,
    pub product_id: String,
    pub quantity: i32,
}

/// Reservation request exactly as received off the wire.
///
/// Quantity is kept loose so that numeric strings (`"2"`) are accepted the
/// same way numbers are; everything is checked in [`ReserveTaskPayload::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReserveTaskPayload {
    pub order_id: Option<String>,
    pub product_id: Option<String>,
    pub quantity: Option<serde_json::Value>,
}

impl ReserveTaskPayload {
    pub fn validate(self) -> Result<ReserveTask, ValidationError> {
        let order_id = non_empty(self.order_id).ok_or(ValidationError::MissingField("order_id"))?;
        let product_id =
            non_empty(self.product_id).ok_or(ValidationError::MissingField("product_id"))?;
        let raw = self.quantity.ok_or(ValidationError::MissingField("quantity"))?;
        let quantity = parse_quantity(&raw)?;

        Ok(ReserveTask { order_id, product_id, quantity })
    }
}

/// Accepts a positive integer given either as a JSON number or a numeric string.
pub fn parse_quantity(raw: &serde_json::Value) -> Result<i32, ValidationError> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .filter(|q| *q > 0)
    .and_then(|q| i32::try_from(q).ok())
    .ok_or_else(|| ValidationError::InvalidQuantity(raw.to_string()))
}

/// Trims `value`, treating blank strings as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Acknowledgement returned by the task ingress for every well-formed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveTaskAck {
    pub order_id: String,
    pub success: bool,
    pub replay: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveRpcResponse {
    pub success: bool,
}

/// Body of the status callback sent to the order side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCallback {
    pub status: String,
}

impl StatusCallback {
    pub fn new(status: OrderStatus) -> Self {
        Self { status: status.as_str().to_string() }
    }

    /// Only terminal statuses may be pushed by the inventory side.
    pub fn terminal_status(&self) -> Result<OrderStatus, ValidationError> {
        let status = self.status.parse::<OrderStatus>()?;
        if status.is_terminal() {
            Ok(status)
        } else {
            Err(ValidationError::UnknownStatus(self.status.clone()))
        }
    }
}

/// Read view of a reservation decision, served to the order side's poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationView {
    pub order_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub status: ReservationStatus,
    pub decided_at: DateTime<Utc>,
}
