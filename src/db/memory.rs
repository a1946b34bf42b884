// db/memory.rs
//
// Mutex-guarded maps with the same conditional-write semantics as the
// Postgres store, backing the service tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::gigdb::GigStore;
use crate::error::EscrowError;
use crate::models::gigmodel::*;

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<i64, User>,
    gigs: HashMap<i64, Gig>,
    applications: HashMap<i64, Application>,
    settlements: HashMap<i64, Settlement>,
    disputes: HashMap<i64, Dispute>,
    ratings: Vec<(i64, i64, i64, i32)>,
    next_gig_id: i64,
    next_application_id: i64,
    next_settlement_id: i64,
    next_dispute_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Poisoning only happens after a panic in another test thread.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl GigStore for InMemoryStore {
    async fn upsert_user(&self, user_id: i64, username: &str) -> Result<User, EscrowError> {
        let mut inner = self.lock();
        let user = inner.users.entry(user_id).or_insert_with(|| User {
            id: user_id,
            username: username.to_string(),
            wallet_address: None,
            rating: 0.0,
            created_at: Utc::now(),
        });
        user.username = username.to_string();
        Ok(user.clone())
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, EscrowError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn set_user_wallet(
        &self,
        user_id: i64,
        wallet_address: &str,
    ) -> Result<User, EscrowError> {
        let mut inner = self.lock();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(EscrowError::UserNotFound(user_id))?;
        user.wallet_address = Some(wallet_address.to_string());
        Ok(user.clone())
    }

    async fn add_rating(
        &self,
        gig_id: i64,
        from_user: i64,
        to_user: i64,
        rating: i32,
        _comment: Option<&str>,
    ) -> Result<f64, EscrowError> {
        let mut inner = self.lock();
        inner.ratings.push((gig_id, from_user, to_user, rating));
        let scores: Vec<i32> = inner
            .ratings
            .iter()
            .filter(|(_, _, to, _)| *to == to_user)
            .map(|(_, _, _, r)| *r)
            .collect();
        let average = scores.iter().sum::<i32>() as f64 / scores.len() as f64;
        if let Some(user) = inner.users.get_mut(&to_user) {
            user.rating = average;
        }
        Ok(average)
    }

    async fn create_gig(
        &self,
        client_id: i64,
        title: &str,
        description: &str,
        price_nano: i64,
    ) -> Result<Gig, EscrowError> {
        let mut inner = self.lock();
        inner.next_gig_id += 1;
        let gig = Gig {
            id: inner.next_gig_id,
            client_id,
            title: title.to_string(),
            description: description.to_string(),
            price_nano,
            status: GigStatus::Open,
            escrow_address: None,
            freelancer_id: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        inner.gigs.insert(gig.id, gig.clone());
        Ok(gig)
    }

    async fn get_gig(&self, gig_id: i64) -> Result<Option<Gig>, EscrowError> {
        Ok(self.lock().gigs.get(&gig_id).cloned())
    }

    async fn list_open_gigs(&self, limit: i64) -> Result<Vec<Gig>, EscrowError> {
        let inner = self.lock();
        let mut gigs: Vec<Gig> = inner
            .gigs
            .values()
            .filter(|g| g.status == GigStatus::Open)
            .cloned()
            .collect();
        gigs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        gigs.truncate(limit as usize);
        Ok(gigs)
    }

    async fn gigs_by_client(&self, client_id: i64) -> Result<Vec<Gig>, EscrowError> {
        let inner = self.lock();
        let mut gigs: Vec<Gig> = inner
            .gigs
            .values()
            .filter(|g| g.client_id == client_id)
            .cloned()
            .collect();
        gigs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(gigs)
    }

    async fn set_escrow_address(
        &self,
        gig_id: i64,
        address: &str,
    ) -> Result<Option<Gig>, EscrowError> {
        let mut inner = self.lock();
        match inner.gigs.get_mut(&gig_id) {
            Some(gig) if gig.status == GigStatus::Open => {
                gig.status = GigStatus::PaymentPending;
                gig.escrow_address = Some(address.to_string());
                Ok(Some(gig.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_gig_status(
        &self,
        gig_id: i64,
        from: GigStatus,
        to: GigStatus,
    ) -> Result<Option<Gig>, EscrowError> {
        let mut inner = self.lock();
        match inner.gigs.get_mut(&gig_id) {
            Some(gig) if gig.status == from => {
                gig.status = to;
                if to == GigStatus::Cancelled {
                    gig.escrow_address = None;
                    gig.freelancer_id = None;
                }
                Ok(Some(gig.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn activate_gig(
        &self,
        gig_id: i64,
        freelancer_id: i64,
    ) -> Result<Option<Gig>, EscrowError> {
        let mut inner = self.lock();
        match inner.gigs.get_mut(&gig_id) {
            Some(gig) if gig.status == GigStatus::PaymentPending => {
                gig.status = GigStatus::InProgress;
                gig.freelancer_id = Some(freelancer_id);
                Ok(Some(gig.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete_gig(&self, gig_id: i64, from: GigStatus) -> Result<Option<Gig>, EscrowError> {
        let mut inner = self.lock();
        match inner.gigs.get_mut(&gig_id) {
            Some(gig) if gig.status == from => {
                gig.status = GigStatus::Completed;
                gig.completed_at = Some(Utc::now());
                Ok(Some(gig.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn create_application(
        &self,
        gig_id: i64,
        freelancer_id: i64,
        proposal: &str,
    ) -> Result<Application, EscrowError> {
        let mut inner = self.lock();
        let duplicate = inner
            .applications
            .values()
            .any(|a| a.gig_id == gig_id && a.freelancer_id == freelancer_id);
        if duplicate {
            return Err(EscrowError::DuplicateApplication(gig_id, freelancer_id));
        }
        inner.next_application_id += 1;
        let application = Application {
            id: inner.next_application_id,
            gig_id,
            freelancer_id,
            proposal: proposal.to_string(),
            status: ApplicationStatus::Pending,
            created_at: Utc::now(),
        };
        inner.applications.insert(application.id, application.clone());
        Ok(application)
    }

    async fn get_application(
        &self,
        application_id: i64,
    ) -> Result<Option<Application>, EscrowError> {
        Ok(self.lock().applications.get(&application_id).cloned())
    }

    async fn applications_by_gig(&self, gig_id: i64) -> Result<Vec<Application>, EscrowError> {
        let inner = self.lock();
        let mut applications: Vec<Application> = inner
            .applications
            .values()
            .filter(|a| a.gig_id == gig_id)
            .cloned()
            .collect();
        applications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(applications)
    }

    async fn accepted_application(&self, gig_id: i64) -> Result<Option<Application>, EscrowError> {
        let inner = self.lock();
        Ok(inner
            .applications
            .values()
            .find(|a| a.gig_id == gig_id && a.status == ApplicationStatus::Accepted)
            .cloned())
    }

    async fn accept_application(&self, application_id: i64) -> Result<Application, EscrowError> {
        let mut inner = self.lock();
        let (gig_id, status) = {
            let application = inner
                .applications
                .get(&application_id)
                .ok_or(EscrowError::ApplicationNotFound(application_id))?;
            (application.gig_id, application.status)
        };
        if status != ApplicationStatus::Pending {
            return Err(EscrowError::InvalidTransition(format!(
                "application {} is already {:?}",
                application_id, status
            )));
        }
        for application in inner.applications.values_mut() {
            if application.gig_id == gig_id && application.status == ApplicationStatus::Pending {
                application.status = if application.id == application_id {
                    ApplicationStatus::Accepted
                } else {
                    ApplicationStatus::Rejected
                };
            }
        }
        Ok(inner.applications[&application_id].clone())
    }

    async fn record_settlement(
        &self,
        gig_id: i64,
        kind: SettlementKind,
        amount_nano: i64,
        destination: &str,
    ) -> Result<Settlement, EscrowError> {
        let mut inner = self.lock();
        inner.next_settlement_id += 1;
        let settlement = Settlement {
            id: inner.next_settlement_id,
            gig_id,
            kind,
            amount_nano,
            destination: destination.to_string(),
            tx_ref: None,
            status: SettlementStatus::Submitted,
            failure_reason: None,
            created_at: Utc::now(),
            confirmed_at: None,
        };
        inner.settlements.insert(settlement.id, settlement.clone());
        Ok(settlement)
    }

    async fn set_settlement_tx_ref(
        &self,
        settlement_id: i64,
        tx_ref: &str,
    ) -> Result<Settlement, EscrowError> {
        let mut inner = self.lock();
        let settlement = inner
            .settlements
            .get_mut(&settlement_id)
            .ok_or(EscrowError::Database(sqlx::Error::RowNotFound))?;
        settlement.tx_ref = Some(tx_ref.to_string());
        Ok(settlement.clone())
    }

    async fn confirm_settlement(&self, settlement_id: i64) -> Result<Settlement, EscrowError> {
        let mut inner = self.lock();
        let settlement = inner
            .settlements
            .get_mut(&settlement_id)
            .ok_or(EscrowError::Database(sqlx::Error::RowNotFound))?;
        if settlement.status == SettlementStatus::Submitted {
            settlement.status = SettlementStatus::Confirmed;
            settlement.confirmed_at = Some(Utc::now());
        }
        Ok(settlement.clone())
    }

    async fn fail_settlement(
        &self,
        settlement_id: i64,
        reason: &str,
    ) -> Result<Settlement, EscrowError> {
        let mut inner = self.lock();
        let settlement = inner
            .settlements
            .get_mut(&settlement_id)
            .ok_or(EscrowError::Database(sqlx::Error::RowNotFound))?;
        if settlement.status == SettlementStatus::Submitted {
            settlement.status = SettlementStatus::Failed;
            settlement.failure_reason = Some(reason.to_string());
        }
        Ok(settlement.clone())
    }

    async fn settlements_by_gig(&self, gig_id: i64) -> Result<Vec<Settlement>, EscrowError> {
        let inner = self.lock();
        let mut settlements: Vec<Settlement> = inner
            .settlements
            .values()
            .filter(|s| s.gig_id == gig_id)
            .cloned()
            .collect();
        settlements.sort_by_key(|s| s.id);
        Ok(settlements)
    }

    async fn list_submitted_settlements(&self) -> Result<Vec<Settlement>, EscrowError> {
        let inner = self.lock();
        let mut settlements: Vec<Settlement> = inner
            .settlements
            .values()
            .filter(|s| s.status == SettlementStatus::Submitted)
            .cloned()
            .collect();
        settlements.sort_by_key(|s| s.id);
        Ok(settlements)
    }

    async fn create_dispute(
        &self,
        gig_id: i64,
        raised_by: i64,
        reason: &str,
    ) -> Result<Dispute, EscrowError> {
        let mut inner = self.lock();
        inner.next_dispute_id += 1;
        let dispute = Dispute {
            id: inner.next_dispute_id,
            gig_id,
            raised_by,
            reason: reason.to_string(),
            status: DisputeStatus::Open,
            outcome: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        inner.disputes.insert(dispute.id, dispute.clone());
        Ok(dispute)
    }

    async fn get_dispute(&self, dispute_id: i64) -> Result<Option<Dispute>, EscrowError> {
        Ok(self.lock().disputes.get(&dispute_id).cloned())
    }

    async fn open_dispute_for_gig(&self, gig_id: i64) -> Result<Option<Dispute>, EscrowError> {
        let inner = self.lock();
        Ok(inner
            .disputes
            .values()
            .filter(|d| d.gig_id == gig_id && d.status == DisputeStatus::Open)
            .max_by_key(|d| d.id)
            .cloned())
    }

    async fn set_dispute_outcome(
        &self,
        dispute_id: i64,
        outcome: DisputeOutcome,
    ) -> Result<Dispute, EscrowError> {
        let mut inner = self.lock();
        let dispute = inner
            .disputes
            .get_mut(&dispute_id)
            .filter(|d| d.status == DisputeStatus::Open)
            .ok_or(EscrowError::DisputeNotFound(dispute_id))?;
        dispute.outcome = Some(outcome);
        Ok(dispute.clone())
    }

    async fn resolve_dispute(&self, dispute_id: i64) -> Result<Dispute, EscrowError> {
        let mut inner = self.lock();
        let dispute = inner
            .disputes
            .get_mut(&dispute_id)
            .filter(|d| d.status == DisputeStatus::Open)
            .ok_or(EscrowError::DisputeNotFound(dispute_id))?;
        dispute.status = DisputeStatus::Resolved;
        dispute.resolved_at = Some(Utc::now());
        Ok(dispute.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conditional_status_update_rejects_stale_writers() {
        let store = InMemoryStore::new();
        store.upsert_user(1, "client").await.unwrap();
        let gig = store.create_gig(1, "logo", "design a logo", 500_000_000).await.unwrap();

        let first = store
            .update_gig_status(gig.id, GigStatus::Open, GigStatus::Cancelled)
            .await
            .unwrap();
        assert!(first.is_some());

        // Second writer raced on the same precondition and loses.
        let second = store
            .update_gig_status(gig.id, GigStatus::Open, GigStatus::Cancelled)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn cancelling_clears_the_escrow_address() {
        let store = InMemoryStore::new();
        store.upsert_user(1, "client").await.unwrap();
        let gig = store.create_gig(1, "logo", "design a logo", 500_000_000).await.unwrap();
        store.set_escrow_address(gig.id, "EQtest").await.unwrap();

        let cancelled = store
            .update_gig_status(gig.id, GigStatus::PaymentPending, GigStatus::Cancelled)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cancelled.status, GigStatus::Cancelled);
        assert!(cancelled.escrow_address.is_none());
    }

    #[tokio::test]
    async fn accepting_one_application_rejects_the_rest() {
        let store = InMemoryStore::new();
        store.upsert_user(1, "client").await.unwrap();
        store.upsert_user(2, "alice").await.unwrap();
        store.upsert_user(3, "bob").await.unwrap();
        let gig = store.create_gig(1, "logo", "design a logo", 500_000_000).await.unwrap();

        let a = store.create_application(gig.id, 2, "pick me").await.unwrap();
        let b = store.create_application(gig.id, 3, "no, me").await.unwrap();

        let accepted = store.accept_application(a.id).await.unwrap();
        assert_eq!(accepted.status, ApplicationStatus::Accepted);

        let rejected = store.get_application(b.id).await.unwrap().unwrap();
        assert_eq!(rejected.status, ApplicationStatus::Rejected);

        // A second accept on the rejected sibling must fail.
        let err = store.accept_application(b.id).await.unwrap_err();
        assert!(matches!(err, EscrowError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn duplicate_applications_are_refused() {
        let store = InMemoryStore::new();
        store.upsert_user(1, "client").await.unwrap();
        store.upsert_user(2, "alice").await.unwrap();
        let gig = store.create_gig(1, "logo", "design a logo", 500_000_000).await.unwrap();

        store.create_application(gig.id, 2, "first").await.unwrap();
        let err = store.create_application(gig.id, 2, "again").await.unwrap_err();
        assert!(matches!(err, EscrowError::DuplicateApplication(_, 2)));
    }

    #[tokio::test]
    async fn settlement_terminal_states_are_sticky() {
        let store = InMemoryStore::new();
        store.upsert_user(1, "client").await.unwrap();
        let gig = store.create_gig(1, "logo", "design a logo", 500_000_000).await.unwrap();
        let settlement = store
            .record_settlement(gig.id, SettlementKind::Deploy, 600_000_000, "EQdest")
            .await
            .unwrap();

        let confirmed = store.confirm_settlement(settlement.id).await.unwrap();
        assert_eq!(confirmed.status, SettlementStatus::Confirmed);

        // Failing after confirmation is a no-op.
        let after = store.fail_settlement(settlement.id, "late timeout").await.unwrap();
        assert_eq!(after.status, SettlementStatus::Confirmed);
        assert!(after.failure_reason.is_none());
    }

    #[tokio::test]
    async fn rating_average_tracks_all_scores() {
        let store = InMemoryStore::new();
        store.upsert_user(2, "alice").await.unwrap();
        let avg = store.add_rating(1, 1, 2, 5, None).await.unwrap();
        assert_eq!(avg, 5.0);
        let avg = store.add_rating(2, 3, 2, 4, Some("solid")).await.unwrap();
        assert_eq!(avg, 4.5);
        let alice = store.get_user(2).await.unwrap().unwrap();
        assert_eq!(alice.rating, 4.5);
    }
}
