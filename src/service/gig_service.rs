// service/gig_service.rs
//
// Gig lifecycle engine. Every status change goes through a conditional
// store write, so concurrent operations on the same gig serialize on the
// database instead of in-process locks.

use std::sync::Arc;

use crate::db::gigdb::GigStore;
use crate::error::EscrowError;
use crate::models::gigmodel::*;
use crate::service::notification_service::EscrowNotifier;
use crate::ton::escrow::{EscrowProtocol, DEPLOY_FEE_NANO};

/// The full transition table. Completed and Cancelled are terminal.
pub fn is_valid_transition(from: GigStatus, to: GigStatus) -> bool {
    use GigStatus::*;
    matches!(
        (from, to),
        (Open, PaymentPending)
            | (Open, Cancelled)
            | (PaymentPending, InProgress)
            | (PaymentPending, Cancelled)
            | (InProgress, Completed)
            | (InProgress, Disputed)
            | (Disputed, Completed)
            | (Disputed, Cancelled)
    )
}

pub struct GigService {
    store: Arc<dyn GigStore>,
    escrow: Arc<EscrowProtocol>,
    notifier: Arc<dyn EscrowNotifier>,
}

impl GigService {
    pub fn new(
        store: Arc<dyn GigStore>,
        escrow: Arc<EscrowProtocol>,
        notifier: Arc<dyn EscrowNotifier>,
    ) -> Self {
        GigService {
            store,
            escrow,
            notifier,
        }
    }

    async fn require_gig(&self, gig_id: i64) -> Result<Gig, EscrowError> {
        self.store
            .get_gig(gig_id)
            .await?
            .ok_or(EscrowError::GigNotFound(gig_id))
    }

    async fn require_user(&self, user_id: i64) -> Result<User, EscrowError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(EscrowError::UserNotFound(user_id))
    }

    /// At most one payout may ever be in flight for a gig.
    async fn payout_in_flight(&self, gig_id: i64) -> Result<bool, EscrowError> {
        Ok(self
            .store
            .settlements_by_gig(gig_id)
            .await?
            .iter()
            .any(|s| s.kind != SettlementKind::Deploy && s.status != SettlementStatus::Failed))
    }

    /// Conditional transition, guarded by the transition table.
    async fn transition(
        &self,
        gig_id: i64,
        from: GigStatus,
        to: GigStatus,
    ) -> Result<Option<Gig>, EscrowError> {
        if !is_valid_transition(from, to) {
            return Err(EscrowError::invalid_transition(gig_id, from));
        }
        self.store.update_gig_status(gig_id, from, to).await
    }

    pub async fn register_user(&self, user_id: i64, username: &str) -> Result<User, EscrowError> {
        self.store.upsert_user(user_id, username).await
    }

    pub async fn set_wallet(&self, user_id: i64, address: &str) -> Result<User, EscrowError> {
        EscrowProtocol::validate_address_format(address)?;
        self.store.set_user_wallet(user_id, address).await
    }

    pub async fn create_gig(
        &self,
        client_id: i64,
        title: &str,
        description: &str,
        price_ton: f64,
    ) -> Result<Gig, EscrowError> {
        self.require_user(client_id).await?;
        let price_nano = ton_to_nano(price_ton)?;
        let gig = self
            .store
            .create_gig(client_id, title, description, price_nano)
            .await?;
        tracing::info!(gig_id = gig.id, client_id, price_nano, "gig created");
        Ok(gig)
    }

    pub async fn gig(&self, gig_id: i64) -> Result<Gig, EscrowError> {
        self.require_gig(gig_id).await
    }

    pub async fn open_gigs(&self, limit: i64) -> Result<Vec<Gig>, EscrowError> {
        self.store.list_open_gigs(limit).await
    }

    pub async fn gigs_by_client(&self, client_id: i64) -> Result<Vec<Gig>, EscrowError> {
        self.store.gigs_by_client(client_id).await
    }

    pub async fn applications_for(&self, gig_id: i64) -> Result<Vec<Application>, EscrowError> {
        self.store.applications_by_gig(gig_id).await
    }

    pub async fn settlements_for(&self, gig_id: i64) -> Result<Vec<Settlement>, EscrowError> {
        self.store.settlements_by_gig(gig_id).await
    }

    /// Current on-chain balance of a gig's escrow contract; zero when no
    /// contract exists.
    pub async fn escrow_balance(&self, gig_id: i64) -> Result<i64, EscrowError> {
        let gig = self.require_gig(gig_id).await?;
        match gig.escrow_address {
            Some(contract) => self.escrow.query_balance(&contract).await,
            None => Ok(0),
        }
    }

    /// Derives the escrow contract for the gig, moves it to PaymentPending
    /// and queues the deployment. Idempotent: calling again while payment is
    /// pending returns the existing address.
    ///
    /// The custody balance is checked before anything is written, so a
    /// shortfall leaves the gig untouched in Open.
    pub async fn initiate_funding(&self, gig_id: i64) -> Result<(Gig, String), EscrowError> {
        let gig = self.require_gig(gig_id).await?;

        if gig.status == GigStatus::PaymentPending {
            if let Some(address) = &gig.escrow_address {
                let link = EscrowProtocol::payment_link(address, gig.price_nano, gig.id);
                return Ok((gig.clone(), link));
            }
        }
        if gig.status != GigStatus::Open {
            return Err(EscrowError::invalid_transition(gig_id, gig.status));
        }

        let client = self.require_user(gig.client_id).await?;
        let client_wallet = client
            .wallet_address
            .ok_or(EscrowError::MissingPayoutAddress(client.id))?;

        self.escrow.check_deploy_funds(gig.price_nano).await?;

        let address = self
            .escrow
            .contract_address(gig.id, &client_wallet, gig.price_nano)?;
        let funded = match self.store.set_escrow_address(gig.id, &address).await? {
            Some(gig) => gig,
            // Lost the race with a concurrent caller; the winner already
            // recorded the same derived address and queued the deployment.
            None => {
                let current = self.require_gig(gig_id).await?;
                if current.status == GigStatus::PaymentPending {
                    if let Some(existing) = current.escrow_address.clone() {
                        let link =
                            EscrowProtocol::payment_link(&existing, current.price_nano, current.id);
                        return Ok((current, link));
                    }
                }
                return Err(EscrowError::invalid_transition(gig_id, current.status));
            }
        };

        let settlement = self
            .store
            .record_settlement(
                gig.id,
                SettlementKind::Deploy,
                gig.price_nano + DEPLOY_FEE_NANO,
                &address,
            )
            .await?;
        match self
            .escrow
            .deploy(gig.id, &client_wallet, gig.price_nano, settlement.id)
            .await
        {
            Ok(handle) => {
                tracing::info!(
                    gig_id = gig.id,
                    settlement_id = handle.settlement_id,
                    escrow_address = %address,
                    "escrow deployment queued"
                );
            }
            Err(e) => {
                self.store
                    .fail_settlement(settlement.id, &e.to_string())
                    .await?;
                return Err(e);
            }
        }

        let link = EscrowProtocol::payment_link(&address, funded.price_nano, funded.id);
        self.notifier.on_gig_funded(&funded, &link).await;
        Ok((funded, link))
    }

    pub async fn apply_to_gig(
        &self,
        gig_id: i64,
        freelancer_id: i64,
        proposal: &str,
    ) -> Result<Application, EscrowError> {
        let gig = self.require_gig(gig_id).await?;
        if gig.status != GigStatus::Open {
            return Err(EscrowError::invalid_transition(gig_id, gig.status));
        }
        if freelancer_id == gig.client_id {
            return Err(EscrowError::InvalidTransition(format!(
                "user {freelancer_id} cannot apply to their own gig"
            )));
        }
        self.require_user(freelancer_id).await?;
        self.store
            .create_application(gig_id, freelancer_id, proposal)
            .await
    }

    /// Accepts one application (rejecting all siblings). If the escrow
    /// deployment already confirmed, this is the second half of the join and
    /// the gig activates here.
    pub async fn accept_application(
        &self,
        application_id: i64,
        caller_id: i64,
    ) -> Result<Application, EscrowError> {
        let application = self
            .store
            .get_application(application_id)
            .await?
            .ok_or(EscrowError::ApplicationNotFound(application_id))?;
        let gig = self.require_gig(application.gig_id).await?;
        if caller_id != gig.client_id {
            return Err(EscrowError::NotAParty(caller_id, gig.id));
        }
        if !matches!(gig.status, GigStatus::Open | GigStatus::PaymentPending) {
            return Err(EscrowError::invalid_transition(gig.id, gig.status));
        }

        let accepted = self.store.accept_application(application_id).await?;
        self.notifier.on_application_accepted(&accepted).await;

        if gig.status == GigStatus::PaymentPending {
            let deploy_confirmed = self
                .store
                .settlements_by_gig(gig.id)
                .await?
                .iter()
                .any(|s| {
                    s.kind == SettlementKind::Deploy && s.status == SettlementStatus::Confirmed
                });
            if deploy_confirmed {
                self.confirm_deployment(gig.id, None).await?;
            }
        }
        Ok(accepted)
    }

    /// Activates a gig whose escrow deployment has confirmed on chain.
    /// Requires an accepted application; until one exists the gig waits in
    /// PaymentPending and [`Self::accept_application`] finishes the job.
    pub async fn confirm_deployment(
        &self,
        gig_id: i64,
        tx_ref: Option<&str>,
    ) -> Result<Gig, EscrowError> {
        let gig = self.require_gig(gig_id).await?;
        if gig.status != GigStatus::PaymentPending {
            return Err(EscrowError::invalid_transition(gig_id, gig.status));
        }
        let accepted = self
            .store
            .accepted_application(gig_id)
            .await?
            .ok_or(EscrowError::NoAcceptedApplication(gig_id))?;

        let active = self
            .store
            .activate_gig(gig_id, accepted.freelancer_id)
            .await?
            .ok_or_else(|| EscrowError::invalid_transition(gig_id, gig.status))?;
        self.notifier.on_escrow_deployed(&active, tx_ref).await;
        Ok(active)
    }

    /// Client signs off on the work: queues the on-chain release to the
    /// freelancer. The gig stays InProgress until the release confirms.
    pub async fn mark_complete(
        &self,
        gig_id: i64,
        caller_id: i64,
    ) -> Result<Settlement, EscrowError> {
        let gig = self.require_gig(gig_id).await?;
        if gig.status != GigStatus::InProgress {
            return Err(EscrowError::invalid_transition(gig_id, gig.status));
        }
        if caller_id != gig.client_id {
            return Err(EscrowError::NotAParty(caller_id, gig_id));
        }
        let freelancer_id = gig
            .freelancer_id
            .ok_or(EscrowError::NoAcceptedApplication(gig_id))?;
        let freelancer = self.require_user(freelancer_id).await?;
        if freelancer.wallet_address.is_none() {
            return Err(EscrowError::MissingPayoutAddress(freelancer_id));
        }
        debug_assert!(gig.status.has_escrow());
        let contract = gig
            .escrow_address
            .clone()
            .ok_or_else(|| EscrowError::ContractUnreachable(format!("gig {gig_id}")))?;

        if self.payout_in_flight(gig_id).await? {
            return Err(EscrowError::InvalidTransition(format!(
                "gig {gig_id} already has a payout in flight"
            )));
        }

        let settlement = self
            .store
            .record_settlement(gig_id, SettlementKind::Release, gig.price_nano, &contract)
            .await?;
        if let Err(e) = self.escrow.release(&contract, settlement.id).await {
            self.store
                .fail_settlement(settlement.id, &e.to_string())
                .await?;
            return Err(e);
        }
        Ok(settlement)
    }

    /// Client cancels. An already-deployed escrow is refunded; a deployment
    /// still in flight is refunded by the settlement watcher once it lands.
    pub async fn cancel(&self, gig_id: i64, caller_id: i64) -> Result<Gig, EscrowError> {
        let gig = self.require_gig(gig_id).await?;
        if caller_id != gig.client_id {
            return Err(EscrowError::NotAParty(caller_id, gig_id));
        }

        match gig.status {
            GigStatus::Open => self
                .transition(gig_id, GigStatus::Open, GigStatus::Cancelled)
                .await?
                .ok_or_else(|| EscrowError::invalid_transition(gig_id, gig.status)),
            GigStatus::PaymentPending => {
                // The conditional write clears the address; keep it for the
                // refund destination.
                let contract = gig.escrow_address.clone();
                let cancelled = self
                    .transition(gig_id, GigStatus::PaymentPending, GigStatus::Cancelled)
                    .await?
                    .ok_or_else(|| EscrowError::invalid_transition(gig_id, gig.status))?;

                let deploy_confirmed = self
                    .store
                    .settlements_by_gig(gig_id)
                    .await?
                    .iter()
                    .any(|s| {
                        s.kind == SettlementKind::Deploy && s.status == SettlementStatus::Confirmed
                    });
                if let Some(contract) = contract {
                    if deploy_confirmed {
                        self.schedule_refund(gig_id, &contract, cancelled.price_nano)
                            .await?;
                    }
                }
                Ok(cancelled)
            }
            _ => Err(EscrowError::invalid_transition(gig_id, gig.status)),
        }
    }

    /// Queues a refund of the escrowed amount back to the client. No-op when
    /// a refund is already in flight, so watcher sweeps stay idempotent.
    pub async fn schedule_refund(
        &self,
        gig_id: i64,
        contract: &str,
        amount_nano: i64,
    ) -> Result<Option<Settlement>, EscrowError> {
        let refund_live = self
            .store
            .settlements_by_gig(gig_id)
            .await?
            .iter()
            .any(|s| s.kind == SettlementKind::Refund && s.status != SettlementStatus::Failed);
        if refund_live {
            return Ok(None);
        }

        let settlement = self
            .store
            .record_settlement(gig_id, SettlementKind::Refund, amount_nano, contract)
            .await?;
        if let Err(e) = self.escrow.refund(contract, settlement.id).await {
            self.store
                .fail_settlement(settlement.id, &e.to_string())
                .await?;
            return Err(e);
        }
        Ok(Some(settlement))
    }

    pub async fn raise_dispute(
        &self,
        gig_id: i64,
        raised_by: i64,
        reason: &str,
    ) -> Result<Dispute, EscrowError> {
        let gig = self.require_gig(gig_id).await?;
        let is_party = raised_by == gig.client_id || gig.freelancer_id == Some(raised_by);
        if !is_party {
            return Err(EscrowError::NotAParty(raised_by, gig_id));
        }

        // A release already queued by mark_complete pays out no matter what
        // a later verdict says; the window for disputing closes with it.
        if self.payout_in_flight(gig_id).await? {
            return Err(EscrowError::InvalidTransition(format!(
                "gig {gig_id} already has a payout in flight"
            )));
        }

        let updated = self
            .transition(gig_id, GigStatus::InProgress, GigStatus::Disputed)
            .await;
        match updated {
            Ok(Some(_)) => {}
            Ok(None) | Err(EscrowError::InvalidTransition(_)) => {
                let current = self.require_gig(gig_id).await?;
                return Err(if current.status == GigStatus::Disputed {
                    EscrowError::AlreadyDisputed(gig_id)
                } else {
                    EscrowError::invalid_transition(gig_id, current.status)
                });
            }
            Err(e) => return Err(e),
        }

        let dispute = self.store.create_dispute(gig_id, raised_by, reason).await?;
        self.notifier.on_dispute_raised(&dispute).await;
        Ok(dispute)
    }

    /// Either party rates the other once the gig is completed. Returns the
    /// recipient's new average.
    pub async fn rate_counterpart(
        &self,
        gig_id: i64,
        from_user: i64,
        rating: i32,
        comment: Option<&str>,
    ) -> Result<f64, EscrowError> {
        if !(1..=5).contains(&rating) {
            return Err(EscrowError::InvalidTransition(format!(
                "rating {rating} must be between 1 and 5"
            )));
        }
        let gig = self.require_gig(gig_id).await?;
        if gig.status != GigStatus::Completed {
            return Err(EscrowError::invalid_transition(gig_id, gig.status));
        }
        let to_user = if from_user == gig.client_id {
            gig.freelancer_id
                .ok_or(EscrowError::NoAcceptedApplication(gig_id))?
        } else if gig.freelancer_id == Some(from_user) {
            gig.client_id
        } else {
            return Err(EscrowError::NotAParty(from_user, gig_id));
        };
        self.store
            .add_rating(gig_id, from_user, to_user, rating, comment)
            .await
    }
}
