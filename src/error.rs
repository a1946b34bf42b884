use thiserror::Error;

use crate::models::gigmodel::GigStatus;

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("price {0} TON is outside the allowed range")]
    InvalidAmount(f64),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("gig {0} has no accepted application yet")]
    NoAcceptedApplication(i64),

    #[error("user {0} has no payout address on file")]
    MissingPayoutAddress(i64),

    #[error("gig {0} is already disputed")]
    AlreadyDisputed(i64),

    #[error("user {1} already applied to gig {0}")]
    DuplicateApplication(i64, i64),

    #[error("custody wallet cannot cover {required_nano} nanotons (available: {available_nano})")]
    InsufficientCustodyBalance {
        required_nano: i64,
        available_nano: i64,
    },

    #[error("chain endpoint unavailable: {0}")]
    ChainUnavailable(String),

    #[error("escrow contract {0} is unreachable")]
    ContractUnreachable(String),

    #[error("settlement {0} timed out waiting for confirmation")]
    ConfirmationTimeout(i64),

    #[error("gig {0} not found")]
    GigNotFound(i64),

    #[error("application {0} not found")]
    ApplicationNotFound(i64),

    #[error("dispute {0} not found")]
    DisputeNotFound(i64),

    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("user {0} is not a party to gig {1}")]
    NotAParty(i64, i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EscrowError {
    pub fn invalid_transition(gig_id: i64, from: GigStatus) -> Self {
        EscrowError::InvalidTransition(format!(
            "gig {} cannot perform this action from state {}",
            gig_id,
            from.to_str()
        ))
    }

    /// Transient errors are retried by the sequencer before a settlement is
    /// marked failed; everything else fails the item immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EscrowError::ChainUnavailable(_) | EscrowError::ContractUnreachable(_)
        )
    }
}
