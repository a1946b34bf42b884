// db/gigdb.rs
use async_trait::async_trait;

use super::db::DBClient;
use crate::error::EscrowError;
use crate::models::gigmodel::*;

/// Persistence interface consumed by the lifecycle engine. Every method is
/// atomic per call; state-changing gig operations are conditional writes so
/// two concurrent transitions on the same gig cannot both succeed.
#[async_trait]
pub trait GigStore: Send + Sync {
    // Users
    async fn upsert_user(&self, user_id: i64, username: &str) -> Result<User, EscrowError>;
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, EscrowError>;
    async fn set_user_wallet(
        &self,
        user_id: i64,
        wallet_address: &str,
    ) -> Result<User, EscrowError>;
    async fn add_rating(
        &self,
        gig_id: i64,
        from_user: i64,
        to_user: i64,
        rating: i32,
        comment: Option<&str>,
    ) -> Result<f64, EscrowError>;

    // Gigs
    async fn create_gig(
        &self,
        client_id: i64,
        title: &str,
        description: &str,
        price_nano: i64,
    ) -> Result<Gig, EscrowError>;
    async fn get_gig(&self, gig_id: i64) -> Result<Option<Gig>, EscrowError>;
    async fn list_open_gigs(&self, limit: i64) -> Result<Vec<Gig>, EscrowError>;
    async fn gigs_by_client(&self, client_id: i64) -> Result<Vec<Gig>, EscrowError>;
    /// Records the escrow address and moves Open -> PaymentPending in one
    /// conditional write. Returns None when the gig is no longer Open.
    async fn set_escrow_address(
        &self,
        gig_id: i64,
        address: &str,
    ) -> Result<Option<Gig>, EscrowError>;
    /// Conditional status update. Cancelling clears the escrow address and
    /// the assigned freelancer; the settlement rows keep the contract
    /// destination for any pending refund, and the accepted application row
    /// keeps who was assigned.
    async fn update_gig_status(
        &self,
        gig_id: i64,
        from: GigStatus,
        to: GigStatus,
    ) -> Result<Option<Gig>, EscrowError>;
    /// PaymentPending -> InProgress, assigning the freelancer.
    async fn activate_gig(
        &self,
        gig_id: i64,
        freelancer_id: i64,
    ) -> Result<Option<Gig>, EscrowError>;
    /// `from` -> Completed, stamping the completion time.
    async fn complete_gig(&self, gig_id: i64, from: GigStatus) -> Result<Option<Gig>, EscrowError>;

    // Applications
    async fn create_application(
        &self,
        gig_id: i64,
        freelancer_id: i64,
        proposal: &str,
    ) -> Result<Application, EscrowError>;
    async fn get_application(
        &self,
        application_id: i64,
    ) -> Result<Option<Application>, EscrowError>;
    async fn applications_by_gig(&self, gig_id: i64) -> Result<Vec<Application>, EscrowError>;
    async fn accepted_application(&self, gig_id: i64) -> Result<Option<Application>, EscrowError>;
    /// Accepts one application and rejects all siblings in the same atomic
    /// step. Fails unless the application is still Pending.
    async fn accept_application(&self, application_id: i64) -> Result<Application, EscrowError>;

    // Settlements
    async fn record_settlement(
        &self,
        gig_id: i64,
        kind: SettlementKind,
        amount_nano: i64,
        destination: &str,
    ) -> Result<Settlement, EscrowError>;
    async fn set_settlement_tx_ref(
        &self,
        settlement_id: i64,
        tx_ref: &str,
    ) -> Result<Settlement, EscrowError>;
    async fn confirm_settlement(&self, settlement_id: i64) -> Result<Settlement, EscrowError>;
    async fn fail_settlement(
        &self,
        settlement_id: i64,
        reason: &str,
    ) -> Result<Settlement, EscrowError>;
    async fn settlements_by_gig(&self, gig_id: i64) -> Result<Vec<Settlement>, EscrowError>;
    async fn list_submitted_settlements(&self) -> Result<Vec<Settlement>, EscrowError>;

    // Disputes
    async fn create_dispute(
        &self,
        gig_id: i64,
        raised_by: i64,
        reason: &str,
    ) -> Result<Dispute, EscrowError>;
    async fn get_dispute(&self, dispute_id: i64) -> Result<Option<Dispute>, EscrowError>;
    async fn open_dispute_for_gig(&self, gig_id: i64) -> Result<Option<Dispute>, EscrowError>;
    async fn set_dispute_outcome(
        &self,
        dispute_id: i64,
        outcome: DisputeOutcome,
    ) -> Result<Dispute, EscrowError>;
    async fn resolve_dispute(&self, dispute_id: i64) -> Result<Dispute, EscrowError>;
}

const GIG_COLUMNS: &str = r#"
    id, client_id, title, description, price_nano, status,
    escrow_address, freelancer_id, created_at, completed_at
"#;

const APPLICATION_COLUMNS: &str = r#"
    id, gig_id, freelancer_id, proposal, status, created_at
"#;

const SETTLEMENT_COLUMNS: &str = r#"
    id, gig_id, kind, amount_nano, destination, tx_ref, status,
    failure_reason, created_at, confirmed_at
"#;

const DISPUTE_COLUMNS: &str = r#"
    id, gig_id, raised_by, reason, status, outcome, created_at, resolved_at
"#;

/// Bootstraps the schema. Each statement is idempotent so restarts are safe.
pub async fn init_schema(client: &DBClient) -> Result<(), EscrowError> {
    let statements: &[&str] = &[
        r#"DO $$ BEGIN
            CREATE TYPE gig_status AS ENUM
                ('open', 'payment_pending', 'in_progress', 'completed', 'disputed', 'cancelled');
        EXCEPTION WHEN duplicate_object THEN NULL; END $$"#,
        r#"DO $$ BEGIN
            CREATE TYPE application_status AS ENUM ('pending', 'accepted', 'rejected');
        EXCEPTION WHEN duplicate_object THEN NULL; END $$"#,
        r#"DO $$ BEGIN
            CREATE TYPE settlement_kind AS ENUM ('deploy', 'release', 'refund', 'resolve');
        EXCEPTION WHEN duplicate_object THEN NULL; END $$"#,
        r#"DO $$ BEGIN
            CREATE TYPE settlement_status AS ENUM ('submitted', 'confirmed', 'failed');
        EXCEPTION WHEN duplicate_object THEN NULL; END $$"#,
        r#"DO $$ BEGIN
            CREATE TYPE dispute_status AS ENUM ('open', 'resolved');
        EXCEPTION WHEN duplicate_object THEN NULL; END $$"#,
        r#"DO $$ BEGIN
            CREATE TYPE dispute_outcome AS ENUM ('refund_client', 'pay_freelancer', 'split');
        EXCEPTION WHEN duplicate_object THEN NULL; END $$"#,
        r#"CREATE TABLE IF NOT EXISTS users (
            id BIGINT PRIMARY KEY,
            username TEXT NOT NULL,
            wallet_address TEXT,
            rating DOUBLE PRECISION NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS gigs (
            id BIGSERIAL PRIMARY KEY,
            client_id BIGINT NOT NULL REFERENCES users(id),
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            price_nano BIGINT NOT NULL,
            status gig_status NOT NULL DEFAULT 'open',
            escrow_address TEXT,
            freelancer_id BIGINT REFERENCES users(id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            completed_at TIMESTAMPTZ
        )"#,
        r#"CREATE TABLE IF NOT EXISTS applications (
            id BIGSERIAL PRIMARY KEY,
            gig_id BIGINT NOT NULL REFERENCES gigs(id),
            freelancer_id BIGINT NOT NULL REFERENCES users(id),
            proposal TEXT NOT NULL,
            status application_status NOT NULL DEFAULT 'pending',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (gig_id, freelancer_id)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS settlements (
            id BIGSERIAL PRIMARY KEY,
            gig_id BIGINT NOT NULL REFERENCES gigs(id),
            kind settlement_kind NOT NULL,
            amount_nano BIGINT NOT NULL,
            destination TEXT NOT NULL,
            tx_ref TEXT,
            status settlement_status NOT NULL DEFAULT 'submitted',
            failure_reason TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            confirmed_at TIMESTAMPTZ
        )"#,
        r#"CREATE TABLE IF NOT EXISTS disputes (
            id BIGSERIAL PRIMARY KEY,
            gig_id BIGINT NOT NULL REFERENCES gigs(id),
            raised_by BIGINT NOT NULL REFERENCES users(id),
            reason TEXT NOT NULL,
            status dispute_status NOT NULL DEFAULT 'open',
            outcome dispute_outcome,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            resolved_at TIMESTAMPTZ
        )"#,
        r#"CREATE TABLE IF NOT EXISTS ratings (
            id BIGSERIAL PRIMARY KEY,
            gig_id BIGINT NOT NULL REFERENCES gigs(id),
            from_user_id BIGINT NOT NULL REFERENCES users(id),
            to_user_id BIGINT NOT NULL REFERENCES users(id),
            rating INT NOT NULL CHECK (rating >= 1 AND rating <= 5),
            comment TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(&client.pool).await?;
    }

    tracing::info!("database schema initialized");
    Ok(())
}

fn map_unique_violation(err: sqlx::Error, gig_id: i64, freelancer_id: i64) -> EscrowError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return EscrowError::DuplicateApplication(gig_id, freelancer_id);
        }
    }
    EscrowError::Database(err)
}

#[async_trait]
impl GigStore for DBClient {
    async fn upsert_user(&self, user_id: i64, username: &str) -> Result<User, EscrowError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET username = EXCLUDED.username
            RETURNING id, username, wallet_address, rating, created_at
            "#,
        )
        .bind(user_id)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, EscrowError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, wallet_address, rating, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn set_user_wallet(
        &self,
        user_id: i64,
        wallet_address: &str,
    ) -> Result<User, EscrowError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET wallet_address = $2
            WHERE id = $1
            RETURNING id, username, wallet_address, rating, created_at
            "#,
        )
        .bind(user_id)
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await?;

        user.ok_or(EscrowError::UserNotFound(user_id))
    }

    async fn add_rating(
        &self,
        gig_id: i64,
        from_user: i64,
        to_user: i64,
        rating: i32,
        comment: Option<&str>,
    ) -> Result<f64, EscrowError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ratings (gig_id, from_user_id, to_user_id, rating, comment)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(gig_id)
        .bind(from_user)
        .bind(to_user)
        .bind(rating)
        .bind(comment)
        .execute(&mut *tx)
        .await?;

        let (average,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(AVG(rating), 0)::DOUBLE PRECISION FROM ratings WHERE to_user_id = $1",
        )
        .bind(to_user)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET rating = $2 WHERE id = $1")
            .bind(to_user)
            .bind(average)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(average)
    }

    async fn create_gig(
        &self,
        client_id: i64,
        title: &str,
        description: &str,
        price_nano: i64,
    ) -> Result<Gig, EscrowError> {
        let gig = sqlx::query_as::<_, Gig>(&format!(
            r#"
            INSERT INTO gigs (client_id, title, description, price_nano)
            VALUES ($1, $2, $3, $4)
            RETURNING {GIG_COLUMNS}
            "#
        ))
        .bind(client_id)
        .bind(title)
        .bind(description)
        .bind(price_nano)
        .fetch_one(&self.pool)
        .await?;

        Ok(gig)
    }

    async fn get_gig(&self, gig_id: i64) -> Result<Option<Gig>, EscrowError> {
        let gig = sqlx::query_as::<_, Gig>(&format!(
            "SELECT {GIG_COLUMNS} FROM gigs WHERE id = $1"
        ))
        .bind(gig_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(gig)
    }

    async fn list_open_gigs(&self, limit: i64) -> Result<Vec<Gig>, EscrowError> {
        let gigs = sqlx::query_as::<_, Gig>(&format!(
            r#"
            SELECT {GIG_COLUMNS} FROM gigs
            WHERE status = 'open'
            ORDER BY created_at DESC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(gigs)
    }

    async fn gigs_by_client(&self, client_id: i64) -> Result<Vec<Gig>, EscrowError> {
        let gigs = sqlx::query_as::<_, Gig>(&format!(
            r#"
            SELECT {GIG_COLUMNS} FROM gigs
            WHERE client_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(gigs)
    }

    async fn set_escrow_address(
        &self,
        gig_id: i64,
        address: &str,
    ) -> Result<Option<Gig>, EscrowError> {
        let gig = sqlx::query_as::<_, Gig>(&format!(
            r#"
            UPDATE gigs SET status = 'payment_pending', escrow_address = $2
            WHERE id = $1 AND status = 'open'
            RETURNING {GIG_COLUMNS}
            "#
        ))
        .bind(gig_id)
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(gig)
    }

    async fn update_gig_status(
        &self,
        gig_id: i64,
        from: GigStatus,
        to: GigStatus,
    ) -> Result<Option<Gig>, EscrowError> {
        let gig = sqlx::query_as::<_, Gig>(&format!(
            r#"
            UPDATE gigs SET
                status = $3,
                escrow_address = CASE WHEN $3 = 'cancelled'::gig_status
                                      THEN NULL ELSE escrow_address END,
                freelancer_id = CASE WHEN $3 = 'cancelled'::gig_status
                                     THEN NULL ELSE freelancer_id END
            WHERE id = $1 AND status = $2
            RETURNING {GIG_COLUMNS}
            "#
        ))
        .bind(gig_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        Ok(gig)
    }

    async fn activate_gig(
        &self,
        gig_id: i64,
        freelancer_id: i64,
    ) -> Result<Option<Gig>, EscrowError> {
        let gig = sqlx::query_as::<_, Gig>(&format!(
            r#"
            UPDATE gigs SET status = 'in_progress', freelancer_id = $2
            WHERE id = $1 AND status = 'payment_pending'
            RETURNING {GIG_COLUMNS}
            "#
        ))
        .bind(gig_id)
        .bind(freelancer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(gig)
    }

    async fn complete_gig(&self, gig_id: i64, from: GigStatus) -> Result<Option<Gig>, EscrowError> {
        let gig = sqlx::query_as::<_, Gig>(&format!(
            r#"
            UPDATE gigs SET status = 'completed', completed_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {GIG_COLUMNS}
            "#
        ))
        .bind(gig_id)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;

        Ok(gig)
    }

    async fn create_application(
        &self,
        gig_id: i64,
        freelancer_id: i64,
        proposal: &str,
    ) -> Result<Application, EscrowError> {
        sqlx::query_as::<_, Application>(&format!(
            r#"
            INSERT INTO applications (gig_id, freelancer_id, proposal)
            VALUES ($1, $2, $3)
            RETURNING {APPLICATION_COLUMNS}
            "#
        ))
        .bind(gig_id)
        .bind(freelancer_id)
        .bind(proposal)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, gig_id, freelancer_id))
    }

    async fn get_application(
        &self,
        application_id: i64,
    ) -> Result<Option<Application>, EscrowError> {
        let application = sqlx::query_as::<_, Application>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1"
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(application)
    }

    async fn applications_by_gig(&self, gig_id: i64) -> Result<Vec<Application>, EscrowError> {
        let applications = sqlx::query_as::<_, Application>(&format!(
            r#"
            SELECT {APPLICATION_COLUMNS} FROM applications
            WHERE gig_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(gig_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(applications)
    }

    async fn accepted_application(&self, gig_id: i64) -> Result<Option<Application>, EscrowError> {
        let application = sqlx::query_as::<_, Application>(&format!(
            r#"
            SELECT {APPLICATION_COLUMNS} FROM applications
            WHERE gig_id = $1 AND status = 'accepted'
            "#
        ))
        .bind(gig_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(application)
    }

    async fn accept_application(&self, application_id: i64) -> Result<Application, EscrowError> {
        let mut tx = self.pool.begin().await?;

        let application = sqlx::query_as::<_, Application>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1 FOR UPDATE"
        ))
        .bind(application_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(EscrowError::ApplicationNotFound(application_id))?;

        if application.status != ApplicationStatus::Pending {
            return Err(EscrowError::InvalidTransition(format!(
                "application {} is already {:?}",
                application_id, application.status
            )));
        }

        let accepted = sqlx::query_as::<_, Application>(&format!(
            r#"
            UPDATE applications SET status = 'accepted'
            WHERE id = $1
            RETURNING {APPLICATION_COLUMNS}
            "#
        ))
        .bind(application_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE applications SET status = 'rejected'
            WHERE gig_id = $1 AND id != $2 AND status = 'pending'
            "#,
        )
        .bind(accepted.gig_id)
        .bind(application_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(accepted)
    }

    async fn record_settlement(
        &self,
        gig_id: i64,
        kind: SettlementKind,
        amount_nano: i64,
        destination: &str,
    ) -> Result<Settlement, EscrowError> {
        let settlement = sqlx::query_as::<_, Settlement>(&format!(
            r#"
            INSERT INTO settlements (gig_id, kind, amount_nano, destination)
            VALUES ($1, $2, $3, $4)
            RETURNING {SETTLEMENT_COLUMNS}
            "#
        ))
        .bind(gig_id)
        .bind(kind)
        .bind(amount_nano)
        .bind(destination)
        .fetch_one(&self.pool)
        .await?;

        Ok(settlement)
    }

    async fn set_settlement_tx_ref(
        &self,
        settlement_id: i64,
        tx_ref: &str,
    ) -> Result<Settlement, EscrowError> {
        let settlement = sqlx::query_as::<_, Settlement>(&format!(
            r#"
            UPDATE settlements SET tx_ref = $2
            WHERE id = $1
            RETURNING {SETTLEMENT_COLUMNS}
            "#
        ))
        .bind(settlement_id)
        .bind(tx_ref)
        .fetch_optional(&self.pool)
        .await?;

        settlement.ok_or(EscrowError::Database(sqlx::Error::RowNotFound))
    }

    async fn confirm_settlement(&self, settlement_id: i64) -> Result<Settlement, EscrowError> {
        let settlement = sqlx::query_as::<_, Settlement>(&format!(
            r#"
            UPDATE settlements SET status = 'confirmed', confirmed_at = NOW()
            WHERE id = $1 AND status = 'submitted'
            RETURNING {SETTLEMENT_COLUMNS}
            "#
        ))
        .bind(settlement_id)
        .fetch_optional(&self.pool)
        .await?;

        match settlement {
            Some(settlement) => Ok(settlement),
            // Already terminal; return the row as-is.
            None => {
                let settlement = sqlx::query_as::<_, Settlement>(&format!(
                    "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE id = $1"
                ))
                .bind(settlement_id)
                .fetch_one(&self.pool)
                .await?;
                Ok(settlement)
            }
        }
    }

    async fn fail_settlement(
        &self,
        settlement_id: i64,
        reason: &str,
    ) -> Result<Settlement, EscrowError> {
        let settlement = sqlx::query_as::<_, Settlement>(&format!(
            r#"
            UPDATE settlements SET status = 'failed', failure_reason = $2
            WHERE id = $1 AND status = 'submitted'
            RETURNING {SETTLEMENT_COLUMNS}
            "#
        ))
        .bind(settlement_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        match settlement {
            Some(settlement) => Ok(settlement),
            None => {
                let settlement = sqlx::query_as::<_, Settlement>(&format!(
                    "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE id = $1"
                ))
                .bind(settlement_id)
                .fetch_one(&self.pool)
                .await?;
                Ok(settlement)
            }
        }
    }

    async fn settlements_by_gig(&self, gig_id: i64) -> Result<Vec<Settlement>, EscrowError> {
        let settlements = sqlx::query_as::<_, Settlement>(&format!(
            r#"
            SELECT {SETTLEMENT_COLUMNS} FROM settlements
            WHERE gig_id = $1
            ORDER BY created_at
            "#
        ))
        .bind(gig_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(settlements)
    }

    async fn list_submitted_settlements(&self) -> Result<Vec<Settlement>, EscrowError> {
        let settlements = sqlx::query_as::<_, Settlement>(&format!(
            r#"
            SELECT {SETTLEMENT_COLUMNS} FROM settlements
            WHERE status = 'submitted'
            ORDER BY created_at
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(settlements)
    }

    async fn create_dispute(
        &self,
        gig_id: i64,
        raised_by: i64,
        reason: &str,
    ) -> Result<Dispute, EscrowError> {
        let dispute = sqlx::query_as::<_, Dispute>(&format!(
            r#"
            INSERT INTO disputes (gig_id, raised_by, reason)
            VALUES ($1, $2, $3)
            RETURNING {DISPUTE_COLUMNS}
            "#
        ))
        .bind(gig_id)
        .bind(raised_by)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(dispute)
    }

    async fn get_dispute(&self, dispute_id: i64) -> Result<Option<Dispute>, EscrowError> {
        let dispute = sqlx::query_as::<_, Dispute>(&format!(
            "SELECT {DISPUTE_COLUMNS} FROM disputes WHERE id = $1"
        ))
        .bind(dispute_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(dispute)
    }

    async fn open_dispute_for_gig(&self, gig_id: i64) -> Result<Option<Dispute>, EscrowError> {
        let dispute = sqlx::query_as::<_, Dispute>(&format!(
            r#"
            SELECT {DISPUTE_COLUMNS} FROM disputes
            WHERE gig_id = $1 AND status = 'open'
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(gig_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(dispute)
    }

    async fn set_dispute_outcome(
        &self,
        dispute_id: i64,
        outcome: DisputeOutcome,
    ) -> Result<Dispute, EscrowError> {
        let dispute = sqlx::query_as::<_, Dispute>(&format!(
            r#"
            UPDATE disputes SET outcome = $2
            WHERE id = $1 AND status = 'open'
            RETURNING {DISPUTE_COLUMNS}
            "#
        ))
        .bind(dispute_id)
        .bind(outcome)
        .fetch_optional(&self.pool)
        .await?;

        dispute.ok_or(EscrowError::DisputeNotFound(dispute_id))
    }

    async fn resolve_dispute(&self, dispute_id: i64) -> Result<Dispute, EscrowError> {
        let dispute = sqlx::query_as::<_, Dispute>(&format!(
            r#"
            UPDATE disputes SET status = 'resolved', resolved_at = NOW()
            WHERE id = $1 AND status = 'open'
            RETURNING {DISPUTE_COLUMNS}
            "#
        ))
        .bind(dispute_id)
        .fetch_optional(&self.pool)
        .await?;

        dispute.ok_or(EscrowError::DisputeNotFound(dispute_id))
    }
}
