// ton/sequencer.rs
//
// Orders every outgoing custody transfer through a single task so broadcasts
// from one wallet never race each other. Callers get a handle back
// immediately; the transaction reference lands on the settlement row once
// the broadcast succeeds.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;

use crate::db::gigdb::GigStore;
use crate::error::EscrowError;
use crate::ton::provider::OutboundMessage;
use crate::ton::wallet::CustodyWallet;

const MAX_BROADCAST_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_JITTER_MS: u64 = 250;

/// One transfer the sequencer must broadcast, tied to its settlement row.
#[derive(Debug, Clone)]
pub struct TransferSpec {
    pub settlement_id: i64,
    pub destination: String,
    pub amount_nano: i64,
    pub payload: Vec<u8>,
    pub state_init: Option<Vec<u8>>,
}

/// Returned from [`SequencerHandle::submit`]; the settlement row carries the
/// outcome once the sequencer gets to this transfer.
#[derive(Debug, Clone, Copy)]
pub struct SettlementHandle {
    pub settlement_id: i64,
}

#[derive(Clone)]
pub struct SequencerHandle {
    tx: mpsc::UnboundedSender<TransferSpec>,
}

impl SequencerHandle {
    /// Queues a transfer. Returns immediately; submission order is the
    /// broadcast order.
    pub fn submit(&self, spec: TransferSpec) -> Result<SettlementHandle, EscrowError> {
        let settlement_id = spec.settlement_id;
        self.tx
            .send(spec)
            .map_err(|_| EscrowError::ChainUnavailable("transfer sequencer stopped".to_string()))?;
        Ok(SettlementHandle { settlement_id })
    }
}

pub struct TransferSequencer {
    wallet: CustodyWallet,
    store: Arc<dyn GigStore>,
    rx: mpsc::UnboundedReceiver<TransferSpec>,
}

impl TransferSequencer {
    pub fn spawn(wallet: CustodyWallet, store: Arc<dyn GigStore>) -> SequencerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let sequencer = TransferSequencer { wallet, store, rx };
        tokio::spawn(sequencer.run());
        SequencerHandle { tx }
    }

    async fn run(mut self) {
        while let Some(spec) = self.rx.recv().await {
            self.execute(spec).await;
        }
        tracing::debug!("transfer sequencer channel closed; stopping");
    }

    async fn execute(&self, spec: TransferSpec) {
        let message = OutboundMessage {
            destination: spec.destination.clone(),
            amount_nano: spec.amount_nano,
            payload: spec.payload.clone(),
            state_init: spec.state_init.clone(),
        };

        let mut attempt = 0;
        let failure = loop {
            match self.wallet.transfer(&message).await {
                Ok(tx_ref) => {
                    tracing::info!(
                        settlement_id = spec.settlement_id,
                        tx_ref = %tx_ref,
                        "transfer broadcast"
                    );
                    if let Err(e) = self
                        .store
                        .set_settlement_tx_ref(spec.settlement_id, &tx_ref)
                        .await
                    {
                        tracing::error!(
                            settlement_id = spec.settlement_id,
                            error = %e,
                            "failed to record transaction reference"
                        );
                    }
                    return;
                }
                Err(e) if e.is_transient() && attempt + 1 < MAX_BROADCAST_ATTEMPTS => {
                    attempt += 1;
                    let jitter = rand::rng().random_range(0..RETRY_JITTER_MS);
                    let delay =
                        RETRY_BASE_DELAY * 2u32.pow(attempt - 1) + Duration::from_millis(jitter);
                    tracing::warn!(
                        settlement_id = spec.settlement_id,
                        attempt,
                        error = %e,
                        "broadcast failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        tracing::error!(
            settlement_id = spec.settlement_id,
            error = %failure,
            "broadcast failed permanently"
        );
        if let Err(e) = self
            .store
            .fail_settlement(spec.settlement_id, &failure.to_string())
            .await
        {
            tracing::error!(
                settlement_id = spec.settlement_id,
                error = %e,
                "failed to mark settlement failed"
            );
        }
    }
}
