// ton/wallet.rs
use std::sync::Arc;

use crate::error::EscrowError;
use crate::models::gigmodel::nano_to_ton;
use crate::ton::provider::{OutboundMessage, TonProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceLevel {
    Healthy,
    /// Spend goes through, but the remaining balance is below the warning
    /// threshold and an operator top-up is due.
    Low,
}

/// The single custody wallet every escrow operation is funded from.
#[derive(Clone)]
pub struct CustodyWallet {
    provider: Arc<dyn TonProvider>,
    pub address: String,
    reserve_floor_nano: i64,
    warn_threshold_nano: i64,
}

impl CustodyWallet {
    pub fn new(
        provider: Arc<dyn TonProvider>,
        address: String,
        reserve_floor_nano: i64,
        warn_threshold_nano: i64,
    ) -> Self {
        CustodyWallet {
            provider,
            address,
            reserve_floor_nano,
            warn_threshold_nano,
        }
    }

    pub async fn balance(&self) -> Result<i64, EscrowError> {
        Ok(self.provider.account_state(&self.address).await?.balance_nano)
    }

    /// Checks that `required_nano` can be spent without dropping below the
    /// reserve floor. Call this before recording any state that assumes the
    /// spend will happen.
    pub async fn check_spend(&self, required_nano: i64) -> Result<BalanceLevel, EscrowError> {
        let available_nano = self.balance().await?;
        let remaining = available_nano - required_nano;
        if remaining < self.reserve_floor_nano {
            return Err(EscrowError::InsufficientCustodyBalance {
                required_nano,
                available_nano,
            });
        }
        if remaining < self.warn_threshold_nano {
            tracing::warn!(
                remaining_ton = nano_to_ton(remaining),
                "custody wallet balance is low; top up soon"
            );
            return Ok(BalanceLevel::Low);
        }
        Ok(BalanceLevel::Healthy)
    }

    pub async fn transfer(&self, message: &OutboundMessage) -> Result<String, EscrowError> {
        tracing::debug!(
            destination = %message.destination,
            amount_ton = nano_to_ton(message.amount_nano),
            deploy = message.state_init.is_some(),
            "broadcasting custody transfer"
        );
        self.provider.broadcast(message).await
    }
}
