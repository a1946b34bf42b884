// ton/escrow.rs
//
// Escrow contract protocol: one contract per funded gig, deployed from and
// operated by the custody wallet. The contract address is derived from the
// initial state, so the payment link can be handed out before anything is
// on chain.

use std::sync::Arc;

use crate::error::EscrowError;
use crate::models::gigmodel::{DisputeOutcome, Settlement, SettlementKind};
use crate::ton::cell::{state_init_bytes, state_init_hash, Cell, CellBuilder, RawAddress};
use crate::ton::provider::{AccountStatus, TonProvider};
use crate::ton::sequencer::{SequencerHandle, SettlementHandle, TransferSpec};
use crate::ton::wallet::{BalanceLevel, CustodyWallet};

/// Gas attached to a contract deployment.
pub const DEPLOY_FEE_NANO: i64 = 100_000_000;
/// Gas attached to a release/refund/resolve message.
pub const OP_FEE_NANO: i64 = 50_000_000;

pub const OP_RELEASE: u32 = 2;
pub const OP_REFUND: u32 = 3;
pub const OP_RESOLVE: u32 = 4;

const ESCROW_CODE_VERSION: u32 = 1;

/// On-chain view of a settlement, as judged from the contract's account
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Pending,
    Failed,
}

pub struct EscrowProtocol {
    provider: Arc<dyn TonProvider>,
    wallet: CustodyWallet,
    sequencer: SequencerHandle,
    admin_address: String,
}

fn escrow_code_cell() -> Cell {
    let mut builder = CellBuilder::new();
    builder.store_uint(ESCROW_CODE_VERSION as u64, 32);
    builder.finish()
}

fn escrow_data_cell(
    gig_id: i64,
    client: &RawAddress,
    freelancer: &RawAddress,
    amount_nano: i64,
    admin: &RawAddress,
) -> Cell {
    let mut builder = CellBuilder::new();
    builder
        .store_address(client)
        .store_address(freelancer)
        .store_coins(amount_nano)
        .store_uint(gig_id as u64, 64)
        .store_uint(0, 8)
        .store_address(admin);
    builder.finish()
}

impl EscrowProtocol {
    pub fn new(
        provider: Arc<dyn TonProvider>,
        wallet: CustodyWallet,
        sequencer: SequencerHandle,
        admin_address: String,
    ) -> Self {
        EscrowProtocol {
            provider,
            wallet,
            sequencer,
            admin_address,
        }
    }

    /// Cheap shape check for user-supplied wallet addresses, followed by a
    /// full checksum validation.
    pub fn validate_address_format(address: &str) -> Result<(), EscrowError> {
        let prefix_ok =
            address.starts_with("EQ") || address.starts_with("UQ") || address.starts_with("kQ");
        if address.len() != 48 || !prefix_ok {
            return Err(EscrowError::InvalidAddress(address.to_string()));
        }
        RawAddress::parse_friendly(address)?;
        Ok(())
    }

    /// Contract address for a gig, computable before deployment. Pure: the
    /// same inputs always yield the same address.
    pub fn derive_address(
        gig_id: i64,
        client_address: &str,
        freelancer_placeholder: &str,
        amount_nano: i64,
        admin_address: &str,
    ) -> Result<String, EscrowError> {
        let client = RawAddress::parse_friendly(client_address)?;
        let freelancer = RawAddress::parse_friendly(freelancer_placeholder)?;
        let admin = RawAddress::parse_friendly(admin_address)?;
        let code = escrow_code_cell();
        let data = escrow_data_cell(gig_id, &client, &freelancer, amount_nano, &admin);
        let address = RawAddress {
            workchain: 0,
            hash: state_init_hash(&code, &data),
        };
        Ok(address.to_friendly())
    }

    /// [`Self::derive_address`] with this deployment's admin wallet, which
    /// also fills the freelancer slot until the contract reassigns it to the
    /// payout destination.
    pub fn contract_address(
        &self,
        gig_id: i64,
        client_address: &str,
        amount_nano: i64,
    ) -> Result<String, EscrowError> {
        Self::derive_address(
            gig_id,
            client_address,
            &self.admin_address,
            amount_nano,
            &self.admin_address,
        )
    }

    /// `ton://` deep link the client pays into.
    pub fn payment_link(escrow_address: &str, amount_nano: i64, gig_id: i64) -> String {
        format!("ton://transfer/{escrow_address}?amount={amount_nano}&text=gig_{gig_id}")
    }

    /// Balance gate for a deployment, checked before any gig state changes.
    pub async fn check_deploy_funds(&self, price_nano: i64) -> Result<BalanceLevel, EscrowError> {
        self.wallet.check_spend(price_nano + DEPLOY_FEE_NANO).await
    }

    /// Queues the deploy transfer carrying the contract's state init plus
    /// the escrowed amount.
    pub async fn deploy(
        &self,
        gig_id: i64,
        client_address: &str,
        price_nano: i64,
        settlement_id: i64,
    ) -> Result<SettlementHandle, EscrowError> {
        self.check_deploy_funds(price_nano).await?;

        let client = RawAddress::parse_friendly(client_address)?;
        let admin = RawAddress::parse_friendly(&self.admin_address)?;
        let code = escrow_code_cell();
        let data = escrow_data_cell(gig_id, &client, &admin, price_nano, &admin);
        let destination = RawAddress {
            workchain: 0,
            hash: state_init_hash(&code, &data),
        }
        .to_friendly();

        let mut body = CellBuilder::new();
        body.store_uint(0, 32).store_bytes(b"Deploy");

        self.sequencer.submit(TransferSpec {
            settlement_id,
            destination,
            amount_nano: price_nano + DEPLOY_FEE_NANO,
            payload: body.finish().repr(),
            state_init: Some(state_init_bytes(&code, &data)),
        })
    }

    pub async fn release(
        &self,
        contract: &str,
        settlement_id: i64,
    ) -> Result<SettlementHandle, EscrowError> {
        self.op(contract, OP_RELEASE, None, settlement_id).await
    }

    pub async fn refund(
        &self,
        contract: &str,
        settlement_id: i64,
    ) -> Result<SettlementHandle, EscrowError> {
        self.op(contract, OP_REFUND, None, settlement_id).await
    }

    pub async fn resolve(
        &self,
        contract: &str,
        outcome: DisputeOutcome,
        settlement_id: i64,
    ) -> Result<SettlementHandle, EscrowError> {
        self.op(contract, OP_RESOLVE, Some(outcome.to_byte()), settlement_id)
            .await
    }

    async fn op(
        &self,
        contract: &str,
        opcode: u32,
        outcome: Option<u8>,
        settlement_id: i64,
    ) -> Result<SettlementHandle, EscrowError> {
        let state = self.provider.account_state(contract).await?;
        if state.status != AccountStatus::Active {
            return Err(EscrowError::ContractUnreachable(contract.to_string()));
        }
        self.wallet.check_spend(OP_FEE_NANO).await?;

        let mut body = CellBuilder::new();
        body.store_uint(opcode as u64, 32);
        if let Some(byte) = outcome {
            body.store_uint(byte as u64, 8);
        }

        self.sequencer.submit(TransferSpec {
            settlement_id,
            destination: contract.to_string(),
            amount_nano: OP_FEE_NANO,
            payload: body.finish().repr(),
            state_init: None,
        })
    }

    /// Judges a broadcast settlement from the contract's current account
    /// state. A deploy is confirmed once the account is active; an operation
    /// is confirmed once the contract has paid out and emptied itself.
    pub async fn check_settled(&self, settlement: &Settlement) -> Result<Confirmation, EscrowError> {
        let state = self.provider.account_state(&settlement.destination).await?;
        let confirmation = match settlement.kind {
            SettlementKind::Deploy => match state.status {
                AccountStatus::Active => Confirmation::Confirmed,
                AccountStatus::Uninitialized => Confirmation::Pending,
                AccountStatus::Frozen => Confirmation::Failed,
            },
            SettlementKind::Release | SettlementKind::Refund | SettlementKind::Resolve => {
                if state.status != AccountStatus::Active || state.balance_nano == 0 {
                    Confirmation::Confirmed
                } else {
                    Confirmation::Pending
                }
            }
        };
        Ok(confirmation)
    }

    pub async fn query_balance(&self, contract: &str) -> Result<i64, EscrowError> {
        Ok(self.provider.account_state(contract).await?.balance_nano)
    }
}
