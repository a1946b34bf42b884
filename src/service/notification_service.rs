// service/notification_service.rs
use async_trait::async_trait;

use crate::models::gigmodel::{Application, Dispute, DisputeOutcome, Gig, Settlement};

/// Outbound event sink for lifecycle milestones. Implementations must not
/// fail the calling operation; delivery problems are theirs to swallow.
#[async_trait]
pub trait EscrowNotifier: Send + Sync {
    async fn on_gig_funded(&self, gig: &Gig, payment_link: &str);
    async fn on_escrow_deployed(&self, gig: &Gig, tx_ref: Option<&str>);
    async fn on_application_accepted(&self, application: &Application);
    async fn on_payment_released(&self, gig: &Gig, tx_ref: Option<&str>);
    async fn on_dispute_raised(&self, dispute: &Dispute);
    async fn on_dispute_resolved(&self, dispute: &Dispute, outcome: DisputeOutcome);
    async fn on_settlement_failed(&self, settlement: &Settlement);
}

/// Default sink: structured log lines.
pub struct LogNotifier;

#[async_trait]
impl EscrowNotifier for LogNotifier {
    async fn on_gig_funded(&self, gig: &Gig, payment_link: &str) {
        tracing::info!(gig_id = gig.id, payment_link, "gig funding initiated");
    }

    async fn on_escrow_deployed(&self, gig: &Gig, tx_ref: Option<&str>) {
        tracing::info!(
            gig_id = gig.id,
            escrow_address = gig.escrow_address.as_deref(),
            tx_ref,
            "escrow contract deployed"
        );
    }

    async fn on_application_accepted(&self, application: &Application) {
        tracing::info!(
            gig_id = application.gig_id,
            freelancer_id = application.freelancer_id,
            "application accepted"
        );
    }

    async fn on_payment_released(&self, gig: &Gig, tx_ref: Option<&str>) {
        tracing::info!(gig_id = gig.id, tx_ref, "escrow released to freelancer");
    }

    async fn on_dispute_raised(&self, dispute: &Dispute) {
        tracing::warn!(
            gig_id = dispute.gig_id,
            dispute_id = dispute.id,
            raised_by = dispute.raised_by,
            "dispute raised"
        );
    }

    async fn on_dispute_resolved(&self, dispute: &Dispute, outcome: DisputeOutcome) {
        tracing::info!(
            gig_id = dispute.gig_id,
            dispute_id = dispute.id,
            outcome = ?outcome,
            "dispute resolved"
        );
    }

    async fn on_settlement_failed(&self, settlement: &Settlement) {
        tracing::error!(
            gig_id = settlement.gig_id,
            settlement_id = settlement.id,
            kind = ?settlement.kind,
            reason = settlement.failure_reason.as_deref(),
            "settlement failed"
        );
    }
}

#[cfg(test)]
pub use recording::RecordingNotifier;
