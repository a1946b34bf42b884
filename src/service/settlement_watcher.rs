// service/settlement_watcher.rs
//
// Background confirmation loop. Every submitted settlement is re-checked
// against the chain each sweep; confirmations drive the gig and dispute
// state machines forward, and anything stalled past the timeout is failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::db::gigdb::GigStore;
use crate::error::EscrowError;
use crate::models::gigmodel::*;
use crate::service::dispute_service::DisputeService;
use crate::service::gig_service::GigService;
use crate::service::notification_service::EscrowNotifier;
use crate::ton::escrow::{Confirmation, EscrowProtocol};

pub struct SettlementWatcher {
    store: Arc<dyn GigStore>,
    escrow: Arc<EscrowProtocol>,
    gigs: Arc<GigService>,
    disputes: Arc<DisputeService>,
    notifier: Arc<dyn EscrowNotifier>,
    confirmation_timeout: Duration,
}

impl SettlementWatcher {
    pub fn new(
        store: Arc<dyn GigStore>,
        escrow: Arc<EscrowProtocol>,
        gigs: Arc<GigService>,
        disputes: Arc<DisputeService>,
        notifier: Arc<dyn EscrowNotifier>,
        confirmation_timeout: Duration,
    ) -> Self {
        SettlementWatcher {
            store,
            escrow,
            gigs,
            disputes,
            notifier,
            confirmation_timeout,
        }
    }

    pub async fn run(self: Arc<Self>, poll: Duration) {
        let mut interval = tokio::time::interval(poll);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                tracing::error!(error = %e, "settlement sweep failed");
            }
        }
    }

    /// One pass over every submitted settlement. Per-item failures are
    /// logged and do not stop the sweep.
    pub async fn sweep(&self) -> Result<(), EscrowError> {
        for settlement in self.store.list_submitted_settlements().await? {
            if let Err(e) = self.check(&settlement).await {
                tracing::error!(
                    settlement_id = settlement.id,
                    error = %e,
                    "settlement check failed"
                );
            }
        }
        Ok(())
    }

    async fn check(&self, settlement: &Settlement) -> Result<(), EscrowError> {
        let age = Utc::now().signed_duration_since(settlement.created_at);
        let timed_out = age.num_milliseconds() >= self.confirmation_timeout.as_millis() as i64;

        // No transaction reference yet: the sequencer is still broadcasting
        // (or died trying).
        if settlement.tx_ref.is_none() {
            if timed_out {
                self.fail(settlement.id, "broadcast never completed").await?;
            }
            return Ok(());
        }

        match self.escrow.check_settled(settlement).await? {
            Confirmation::Confirmed => {
                self.store.confirm_settlement(settlement.id).await?;
                self.apply(settlement).await?;
            }
            Confirmation::Failed => {
                self.fail(settlement.id, "escrow contract is frozen").await?;
            }
            Confirmation::Pending if timed_out => {
                let reason = EscrowError::ConfirmationTimeout(settlement.id).to_string();
                self.fail(settlement.id, &reason).await?;
            }
            Confirmation::Pending => {}
        }
        Ok(())
    }

    async fn fail(&self, settlement_id: i64, reason: &str) -> Result<(), EscrowError> {
        let failed = self.store.fail_settlement(settlement_id, reason).await?;
        // The row may have confirmed under us; only report a real failure.
        if failed.status == SettlementStatus::Failed {
            self.notifier.on_settlement_failed(&failed).await;
        }
        Ok(())
    }

    /// Side effects of a confirmed settlement.
    async fn apply(&self, settlement: &Settlement) -> Result<(), EscrowError> {
        let gig = self
            .store
            .get_gig(settlement.gig_id)
            .await?
            .ok_or(EscrowError::GigNotFound(settlement.gig_id))?;

        match settlement.kind {
            SettlementKind::Deploy => match gig.status {
                GigStatus::PaymentPending => {
                    match self
                        .gigs
                        .confirm_deployment(gig.id, settlement.tx_ref.as_deref())
                        .await
                    {
                        Ok(_) => {}
                        Err(EscrowError::NoAcceptedApplication(_)) => {
                            tracing::debug!(
                                gig_id = gig.id,
                                "deploy confirmed; waiting for an accepted application"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
                // Client cancelled while the deploy was in flight; the
                // escrowed funds come straight back.
                GigStatus::Cancelled => {
                    self.gigs
                        .schedule_refund(gig.id, &settlement.destination, gig.price_nano)
                        .await?;
                }
                _ => {}
            },
            SettlementKind::Release | SettlementKind::Refund | SettlementKind::Resolve => {
                if let Some(dispute) = self.store.open_dispute_for_gig(gig.id).await? {
                    if dispute.outcome.is_some() {
                        self.disputes.finalize(dispute.id).await?;
                        return Ok(());
                    }
                }
                if settlement.kind == SettlementKind::Release {
                    if let Some(completed) = self
                        .store
                        .complete_gig(gig.id, GigStatus::InProgress)
                        .await?
                    {
                        self.notifier
                            .on_payment_released(&completed, settlement.tx_ref.as_deref())
                            .await;
                    }
                }
                // A confirmed refund outside a dispute belongs to an
                // already-cancelled gig; nothing left to move.
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use crate::service::notification_service::RecordingNotifier;
    use crate::ton::cell::RawAddress;
    use crate::ton::provider::{AccountStatus, MockProvider};
    use crate::ton::sequencer::TransferSequencer;
    use crate::ton::wallet::CustodyWallet;

    const CLIENT: i64 = 1;
    const FREELANCER: i64 = 2;

    fn addr(seed: u8) -> String {
        RawAddress {
            workchain: 0,
            hash: [seed; 32],
        }
        .to_friendly()
    }

    struct Harness {
        provider: Arc<MockProvider>,
        store: Arc<InMemoryStore>,
        notifier: Arc<RecordingNotifier>,
        gigs: Arc<GigService>,
        disputes: Arc<DisputeService>,
        watcher: SettlementWatcher,
    }

    fn harness(confirmation_timeout: Duration) -> Harness {
        let provider = Arc::new(MockProvider::new());
        let custody = addr(0xAA);
        provider.set_account(&custody, AccountStatus::Active, 100_000_000_000);
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let wallet = CustodyWallet::new(
            provider.clone(),
            custody.clone(),
            100_000_000,
            1_000_000_000,
        );
        let sequencer = TransferSequencer::spawn(wallet.clone(), store.clone());
        let escrow = Arc::new(EscrowProtocol::new(
            provider.clone(),
            wallet,
            sequencer,
            custody,
        ));
        let notifier = Arc::new(RecordingNotifier::new());
        let gigs = Arc::new(GigService::new(
            store.clone(),
            escrow.clone(),
            notifier.clone(),
        ));
        let disputes = Arc::new(DisputeService::new(
            store.clone(),
            escrow.clone(),
            notifier.clone(),
        ));
        let watcher = SettlementWatcher::new(
            store.clone(),
            escrow,
            gigs.clone(),
            disputes.clone(),
            notifier.clone(),
            confirmation_timeout,
        );
        Harness {
            provider,
            store,
            notifier,
            gigs,
            disputes,
            watcher,
        }
    }

    async fn users(h: &Harness) {
        h.gigs.register_user(CLIENT, "client").await.unwrap();
        h.gigs.set_wallet(CLIENT, &addr(1)).await.unwrap();
        h.gigs.register_user(FREELANCER, "freelancer").await.unwrap();
        h.gigs.set_wallet(FREELANCER, &addr(2)).await.unwrap();
    }

    async fn wait_for_tx_ref(h: &Harness, gig_id: i64, settlement_id: i64) {
        for _ in 0..200 {
            let settlement = h
                .store
                .settlements_by_gig(gig_id)
                .await
                .unwrap()
                .into_iter()
                .find(|s| s.id == settlement_id)
                .unwrap();
            if settlement.tx_ref.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("settlement {settlement_id} never got a tx ref");
    }

    /// Apply, fund, accept, and confirm the deploy through a sweep.
    async fn in_progress_gig(h: &Harness) -> Gig {
        let gig = h
            .gigs
            .create_gig(CLIENT, "logo", "design a logo", 5.0)
            .await
            .unwrap();
        let application = h
            .gigs
            .apply_to_gig(gig.id, FREELANCER, "pick me")
            .await
            .unwrap();
        let (gig, _) = h.gigs.initiate_funding(gig.id).await.unwrap();
        h.gigs
            .accept_application(application.id, CLIENT)
            .await
            .unwrap();

        let deploy = h.store.settlements_by_gig(gig.id).await.unwrap()[0].clone();
        wait_for_tx_ref(h, gig.id, deploy.id).await;
        let contract = gig.escrow_address.clone().unwrap();
        h.provider
            .set_account(&contract, AccountStatus::Active, gig.price_nano);
        h.watcher.sweep().await.unwrap();

        let gig = h.gigs.gig(gig.id).await.unwrap();
        assert_eq!(gig.status, GigStatus::InProgress);
        gig
    }

    #[tokio::test]
    async fn confirmed_deploy_activates_the_gig() {
        let h = harness(Duration::from_secs(60));
        users(&h).await;
        let gig = in_progress_gig(&h).await;
        assert_eq!(gig.freelancer_id, Some(FREELANCER));
        assert!(h
            .notifier
            .events()
            .contains(&format!("escrow_deployed:{}", gig.id)));
    }

    #[tokio::test]
    async fn confirmed_release_completes_the_gig_once() {
        let h = harness(Duration::from_secs(60));
        users(&h).await;
        let gig = in_progress_gig(&h).await;
        let contract = gig.escrow_address.clone().unwrap();

        let release = h.gigs.mark_complete(gig.id, CLIENT).await.unwrap();
        wait_for_tx_ref(&h, gig.id, release.id).await;

        // Contract paid out and emptied itself.
        h.provider.set_account(&contract, AccountStatus::Active, 0);
        h.watcher.sweep().await.unwrap();
        // Idempotency: a second sweep changes nothing.
        h.watcher.sweep().await.unwrap();

        let gig = h.gigs.gig(gig.id).await.unwrap();
        assert_eq!(gig.status, GigStatus::Completed);
        assert!(gig.completed_at.is_some());

        let confirmed_payouts: Vec<Settlement> = h
            .store
            .settlements_by_gig(gig.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| {
                s.kind != SettlementKind::Deploy && s.status == SettlementStatus::Confirmed
            })
            .collect();
        assert_eq!(confirmed_payouts.len(), 1);
        assert_eq!(
            h.notifier
                .events()
                .iter()
                .filter(|e| *e == &format!("payment_released:{}", gig.id))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn deploy_confirming_after_cancellation_triggers_a_refund() {
        let h = harness(Duration::from_secs(60));
        users(&h).await;
        let gig = h
            .gigs
            .create_gig(CLIENT, "logo", "design a logo", 5.0)
            .await
            .unwrap();
        let (gig, _) = h.gigs.initiate_funding(gig.id).await.unwrap();
        let contract = gig.escrow_address.clone().unwrap();
        let deploy = h.store.settlements_by_gig(gig.id).await.unwrap()[0].clone();
        wait_for_tx_ref(&h, gig.id, deploy.id).await;

        // Cancel while the deploy is still unconfirmed.
        let cancelled = h.gigs.cancel(gig.id, CLIENT).await.unwrap();
        assert_eq!(cancelled.status, GigStatus::Cancelled);
        assert!(cancelled.escrow_address.is_none());

        // The deploy lands anyway; the sweep refunds the contract.
        h.provider
            .set_account(&contract, AccountStatus::Active, gig.price_nano);
        h.watcher.sweep().await.unwrap();

        let refund = h
            .store
            .settlements_by_gig(gig.id)
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.kind == SettlementKind::Refund)
            .unwrap();
        assert_eq!(refund.destination, contract);

        // Once the refund confirms the gig stays Cancelled.
        wait_for_tx_ref(&h, gig.id, refund.id).await;
        h.provider.set_account(&contract, AccountStatus::Active, 0);
        h.watcher.sweep().await.unwrap();
        assert_eq!(h.gigs.gig(gig.id).await.unwrap().status, GigStatus::Cancelled);
    }

    #[tokio::test]
    async fn refund_verdict_cancels_the_gig_and_resolves_the_dispute() {
        let h = harness(Duration::from_secs(60));
        users(&h).await;
        let gig = in_progress_gig(&h).await;
        let contract = gig.escrow_address.clone().unwrap();

        let dispute = h
            .gigs
            .raise_dispute(gig.id, CLIENT, "work not delivered")
            .await
            .unwrap();
        let settlement = h
            .disputes
            .resolve(dispute.id, DisputeOutcome::RefundClient)
            .await
            .unwrap();
        assert_eq!(settlement.kind, SettlementKind::Refund);
        wait_for_tx_ref(&h, gig.id, settlement.id).await;

        h.provider.set_account(&contract, AccountStatus::Active, 0);
        h.watcher.sweep().await.unwrap();

        assert_eq!(h.gigs.gig(gig.id).await.unwrap().status, GigStatus::Cancelled);
        let dispute = h.disputes.dispute(dispute.id).await.unwrap();
        assert_eq!(dispute.status, DisputeStatus::Resolved);
        let refund = h
            .store
            .settlements_by_gig(gig.id)
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.kind == SettlementKind::Refund)
            .unwrap();
        assert_eq!(refund.status, SettlementStatus::Confirmed);
    }

    #[tokio::test]
    async fn stalled_settlements_time_out() {
        let h = harness(Duration::ZERO);
        users(&h).await;
        let gig = h
            .gigs
            .create_gig(CLIENT, "logo", "design a logo", 5.0)
            .await
            .unwrap();
        let (gig, _) = h.gigs.initiate_funding(gig.id).await.unwrap();
        let deploy = h.store.settlements_by_gig(gig.id).await.unwrap()[0].clone();
        wait_for_tx_ref(&h, gig.id, deploy.id).await;

        // Contract never appears on chain; zero timeout fails it at once.
        h.watcher.sweep().await.unwrap();

        let deploy = h.store.settlements_by_gig(gig.id).await.unwrap()[0].clone();
        assert_eq!(deploy.status, SettlementStatus::Failed);
        assert!(deploy.failure_reason.unwrap().contains("timed out"));
        assert!(h
            .notifier
            .events()
            .contains(&format!("settlement_failed:{}", deploy.id)));
    }
}
