// service/command.rs
//
// Typed boundary for user actions. Front ends hand the engine one of these
// closed variants instead of free-form callback strings; malformed input
// fails at deserialization and never reaches the state machine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EscrowError;
use crate::models::gigmodel::*;
use crate::service::dispute_service::DisputeService;
use crate::service::gig_service::GigService;

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum EngineCommand {
    RegisterUser {
        user_id: i64,
        username: String,
    },
    SetWallet {
        user_id: i64,
        address: String,
    },
    CreateGig {
        client_id: i64,
        title: String,
        description: String,
        price_ton: f64,
    },
    OpenGigs {
        #[serde(default = "default_listing_limit")]
        limit: i64,
    },
    MyGigs {
        client_id: i64,
    },
    Gig {
        gig_id: i64,
    },
    Applications {
        gig_id: i64,
    },
    Settlements {
        gig_id: i64,
    },
    ApplyToGig {
        gig_id: i64,
        freelancer_id: i64,
        proposal: String,
    },
    AcceptApplication {
        application_id: i64,
        caller_id: i64,
    },
    InitiateFunding {
        gig_id: i64,
    },
    MarkComplete {
        gig_id: i64,
        caller_id: i64,
    },
    CancelGig {
        gig_id: i64,
        caller_id: i64,
    },
    RaiseDispute {
        gig_id: i64,
        raised_by: i64,
        reason: String,
    },
    ResolveDispute {
        dispute_id: i64,
        outcome: DisputeOutcome,
    },
    RateCounterpart {
        gig_id: i64,
        from_user: i64,
        rating: i32,
        comment: Option<String>,
    },
    EscrowBalance {
        gig_id: i64,
    },
}

fn default_listing_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EngineReply {
    User(User),
    Gig(Gig),
    Gigs(Vec<Gig>),
    Application(Application),
    Applications(Vec<Application>),
    Settlement(Settlement),
    Settlements(Vec<Settlement>),
    Dispute(Dispute),
    Funding { gig: Gig, payment_link: String },
    Balance { nano: i64 },
    Rating { average: f64 },
}

/// Dispatches validated commands to the services.
pub struct Engine {
    gigs: Arc<GigService>,
    disputes: Arc<DisputeService>,
}

impl Engine {
    pub fn new(gigs: Arc<GigService>, disputes: Arc<DisputeService>) -> Self {
        Engine { gigs, disputes }
    }

    pub async fn dispatch(&self, command: EngineCommand) -> Result<EngineReply, EscrowError> {
        use EngineCommand::*;
        match command {
            RegisterUser { user_id, username } => self
                .gigs
                .register_user(user_id, &username)
                .await
                .map(EngineReply::User),
            SetWallet { user_id, address } => self
                .gigs
                .set_wallet(user_id, &address)
                .await
                .map(EngineReply::User),
            CreateGig {
                client_id,
                title,
                description,
                price_ton,
            } => self
                .gigs
                .create_gig(client_id, &title, &description, price_ton)
                .await
                .map(EngineReply::Gig),
            OpenGigs { limit } => self.gigs.open_gigs(limit).await.map(EngineReply::Gigs),
            MyGigs { client_id } => self
                .gigs
                .gigs_by_client(client_id)
                .await
                .map(EngineReply::Gigs),
            Gig { gig_id } => self.gigs.gig(gig_id).await.map(EngineReply::Gig),
            Applications { gig_id } => self
                .gigs
                .applications_for(gig_id)
                .await
                .map(EngineReply::Applications),
            Settlements { gig_id } => self
                .gigs
                .settlements_for(gig_id)
                .await
                .map(EngineReply::Settlements),
            ApplyToGig {
                gig_id,
                freelancer_id,
                proposal,
            } => self
                .gigs
                .apply_to_gig(gig_id, freelancer_id, &proposal)
                .await
                .map(EngineReply::Application),
            AcceptApplication {
                application_id,
                caller_id,
            } => self
                .gigs
                .accept_application(application_id, caller_id)
                .await
                .map(EngineReply::Application),
            InitiateFunding { gig_id } => {
                let (gig, payment_link) = self.gigs.initiate_funding(gig_id).await?;
                Ok(EngineReply::Funding { gig, payment_link })
            }
            MarkComplete { gig_id, caller_id } => self
                .gigs
                .mark_complete(gig_id, caller_id)
                .await
                .map(EngineReply::Settlement),
            CancelGig { gig_id, caller_id } => self
                .gigs
                .cancel(gig_id, caller_id)
                .await
                .map(EngineReply::Gig),
            RaiseDispute {
                gig_id,
                raised_by,
                reason,
            } => self
                .gigs
                .raise_dispute(gig_id, raised_by, &reason)
                .await
                .map(EngineReply::Dispute),
            ResolveDispute {
                dispute_id,
                outcome,
            } => self
                .disputes
                .resolve(dispute_id, outcome)
                .await
                .map(EngineReply::Settlement),
            RateCounterpart {
                gig_id,
                from_user,
                rating,
                comment,
            } => self
                .gigs
                .rate_counterpart(gig_id, from_user, rating, comment.as_deref())
                .await
                .map(|average| EngineReply::Rating { average }),
            EscrowBalance { gig_id } => self
                .gigs
                .escrow_balance(gig_id)
                .await
                .map(|nano| EngineReply::Balance { nano }),
        }
    }
}
