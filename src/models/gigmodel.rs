use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EscrowError;

pub const NANO_PER_TON: i64 = 1_000_000_000;

/// Price bounds for a gig, in TON.
pub const MIN_PRICE_TON: f64 = 0.5;
pub const MAX_PRICE_TON: f64 = 1000.0;

/// Converts a user-facing TON amount into integer nanotons, enforcing the
/// allowed price range. All internal arithmetic is integer-only; this is the
/// single place a decimal amount crosses the boundary.
pub fn ton_to_nano(amount_ton: f64) -> Result<i64, EscrowError> {
    if !amount_ton.is_finite() || amount_ton < MIN_PRICE_TON || amount_ton > MAX_PRICE_TON {
        return Err(EscrowError::InvalidAmount(amount_ton));
    }
    Ok((amount_ton * NANO_PER_TON as f64).round() as i64)
}

pub fn nano_to_ton(amount_nano: i64) -> f64 {
    amount_nano as f64 / NANO_PER_TON as f64
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "gig_status", rename_all = "snake_case")]
pub enum GigStatus {
    Open,
    PaymentPending,
    InProgress,
    Completed,
    Disputed,
    Cancelled,
}

impl GigStatus {
    pub fn to_str(&self) -> &str {
        match self {
            GigStatus::Open => "open",
            GigStatus::PaymentPending => "payment_pending",
            GigStatus::InProgress => "in_progress",
            GigStatus::Completed => "completed",
            GigStatus::Disputed => "disputed",
            GigStatus::Cancelled => "cancelled",
        }
    }

    /// States in which the gig has a live escrow contract address.
    pub fn has_escrow(&self) -> bool {
        matches!(
            self,
            GigStatus::PaymentPending
                | GigStatus::InProgress
                | GigStatus::Completed
                | GigStatus::Disputed
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "application_status", rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "settlement_kind", rename_all = "snake_case")]
pub enum SettlementKind {
    Deploy,
    Release,
    Refund,
    Resolve,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "settlement_status", rename_all = "snake_case")]
pub enum SettlementStatus {
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "dispute_status", rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Resolved,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "dispute_outcome", rename_all = "snake_case")]
pub enum DisputeOutcome {
    RefundClient,
    PayFreelancer,
    Split,
}

impl DisputeOutcome {
    /// Outcome byte carried in the on-chain resolve payload.
    pub fn to_byte(&self) -> u8 {
        match self {
            DisputeOutcome::RefundClient => 0,
            DisputeOutcome::PayFreelancer => 1,
            DisputeOutcome::Split => 2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub wallet_address: Option<String>,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Gig {
    pub id: i64,
    pub client_id: i64,
    pub title: String,
    pub description: String,
    pub price_nano: i64,
    pub status: GigStatus,
    pub escrow_address: Option<String>,
    pub freelancer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Application {
    pub id: i64,
    pub gig_id: i64,
    pub freelancer_id: i64,
    pub proposal: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Settlement {
    pub id: i64,
    pub gig_id: i64,
    pub kind: SettlementKind,
    pub amount_nano: i64,
    pub destination: String,
    pub tx_ref: Option<String>,
    pub status: SettlementStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Dispute {
    pub id: i64,
    pub gig_id: i64,
    pub raised_by: i64,
    pub reason: String,
    pub status: DisputeStatus,
    pub outcome: Option<DisputeOutcome>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
