// service/dispute_service.rs
//
// Admin-side dispute resolution. A verdict queues one on-chain resolve
// message; the dispute and its gig only reach their terminal states once
// the settlement watcher sees that message confirm.

use std::sync::Arc;

use crate::db::gigdb::GigStore;
use crate::error::EscrowError;
use crate::models::gigmodel::*;
use crate::service::notification_service::EscrowNotifier;
use crate::ton::escrow::EscrowProtocol;

/// Ledger kind for a verdict: the row records where the money went, even
/// though the wire message is always a resolve.
fn settlement_kind_for(outcome: DisputeOutcome) -> SettlementKind {
    match outcome {
        DisputeOutcome::RefundClient => SettlementKind::Refund,
        DisputeOutcome::PayFreelancer => SettlementKind::Release,
        DisputeOutcome::Split => SettlementKind::Resolve,
    }
}

pub struct DisputeService {
    store: Arc<dyn GigStore>,
    escrow: Arc<EscrowProtocol>,
    notifier: Arc<dyn EscrowNotifier>,
}

impl DisputeService {
    pub fn new(
        store: Arc<dyn GigStore>,
        escrow: Arc<EscrowProtocol>,
        notifier: Arc<dyn EscrowNotifier>,
    ) -> Self {
        DisputeService {
            store,
            escrow,
            notifier,
        }
    }

    pub async fn dispute(&self, dispute_id: i64) -> Result<Dispute, EscrowError> {
        self.store
            .get_dispute(dispute_id)
            .await?
            .ok_or(EscrowError::DisputeNotFound(dispute_id))
    }

    /// Records the verdict and queues the on-chain resolve. Retryable after
    /// a failed broadcast; refused while a payout is already in flight.
    pub async fn resolve(
        &self,
        dispute_id: i64,
        outcome: DisputeOutcome,
    ) -> Result<Settlement, EscrowError> {
        let dispute = self.dispute(dispute_id).await?;
        if dispute.status != DisputeStatus::Open {
            return Err(EscrowError::InvalidTransition(format!(
                "dispute {dispute_id} is already resolved"
            )));
        }
        let gig = self
            .store
            .get_gig(dispute.gig_id)
            .await?
            .ok_or(EscrowError::GigNotFound(dispute.gig_id))?;
        if gig.status != GigStatus::Disputed {
            return Err(EscrowError::invalid_transition(gig.id, gig.status));
        }
        let contract = gig
            .escrow_address
            .clone()
            .ok_or_else(|| EscrowError::ContractUnreachable(format!("gig {}", gig.id)))?;

        let payout_live = self
            .store
            .settlements_by_gig(gig.id)
            .await?
            .iter()
            .any(|s| s.kind != SettlementKind::Deploy && s.status != SettlementStatus::Failed);
        if payout_live {
            return Err(EscrowError::InvalidTransition(format!(
                "gig {} already has a payout in flight",
                gig.id
            )));
        }

        let settlement = self
            .store
            .record_settlement(
                gig.id,
                settlement_kind_for(outcome),
                gig.price_nano,
                &contract,
            )
            .await?;
        self.store.set_dispute_outcome(dispute_id, outcome).await?;
        if let Err(e) = self.escrow.resolve(&contract, outcome, settlement.id).await {
            self.store
                .fail_settlement(settlement.id, &e.to_string())
                .await?;
            return Err(e);
        }
        tracing::info!(
            dispute_id,
            gig_id = gig.id,
            outcome = ?outcome,
            settlement_id = settlement.id,
            "dispute verdict submitted"
        );
        Ok(settlement)
    }

    /// Applies a confirmed verdict: moves the gig to its terminal state and
    /// closes the dispute. Idempotent for already-resolved disputes.
    pub async fn finalize(&self, dispute_id: i64) -> Result<Dispute, EscrowError> {
        let dispute = self.dispute(dispute_id).await?;
        if dispute.status != DisputeStatus::Open {
            return Ok(dispute);
        }
        let outcome = dispute.outcome.ok_or_else(|| {
            EscrowError::InvalidTransition(format!("dispute {dispute_id} has no verdict"))
        })?;

        match outcome {
            DisputeOutcome::RefundClient => {
                self.store
                    .update_gig_status(dispute.gig_id, GigStatus::Disputed, GigStatus::Cancelled)
                    .await?;
            }
            // A split still closes the gig as delivered; the contract took
            // care of dividing the funds.
            DisputeOutcome::PayFreelancer | DisputeOutcome::Split => {
                self.store
                    .complete_gig(dispute.gig_id, GigStatus::Disputed)
                    .await?;
            }
        }

        let resolved = self.store.resolve_dispute(dispute_id).await?;
        self.notifier.on_dispute_resolved(&resolved, outcome).await;
        Ok(resolved)
    }
}
