//! Verification transaction submission.
//!
//! Builds, signs, submits, and confirms `verifyProof` transactions. The nonce
//! is re-read from the chain for every approval instead of being cached; the
//! pipeline is strictly sequential, so the previous transaction has either
//! landed or is the only one pending from this account.

use crate::chain::ChainClient;
use crate::contract::verify_call_data;
use crate::error::TransactionError;
use crate::fees;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait ProofApprover: Send + Sync {
    /// Record the item as verified on-chain. Returns the confirmed
    /// transaction hash.
    async fn approve_item(&self, item_id: U256) -> Result<B256, TransactionError>;
}

pub struct Submitter {
    chain: Arc<ChainClient>,
    signer: PrivateKeySigner,
    chain_id: u64,
    contract: Address,
    receipt_timeout: Duration,
}

impl Submitter {
    pub fn new(
        chain: Arc<ChainClient>,
        signer: PrivateKeySigner,
        chain_id: u64,
        contract: Address,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            signer,
            chain_id,
            contract,
            receipt_timeout,
        }
    }

    pub fn sender(&self) -> Address {
        self.signer.address()
    }
}

#[async_trait]
impl ProofApprover for Submitter {
    async fn approve_item(&self, item_id: U256) -> Result<B256, TransactionError> {
        let sender = self.signer.address();

        let nonce = self
            .chain
            .transaction_count(sender)
            .await
            .map_err(|e| TransactionError::Build(format!("nonce lookup failed: {e}")))?;

        let quote = fees::prepare(&self.chain)
            .await
            .map_err(|e| TransactionError::Build(format!("fee quote failed: {e}")))?;

        let mut tx = TransactionRequest::default()
            .with_from(sender)
            .with_to(self.contract)
            .with_input(Bytes::from(verify_call_data(item_id)))
            .with_chain_id(self.chain_id)
            .with_nonce(nonce);
        tx = quote.apply(tx);

        let estimate = self
            .chain
            .estimate_gas(&tx)
            .await
            .map_err(|e| TransactionError::Build(format!("gas estimation failed: {e}")))?;
        tx = tx.with_gas_limit(fees::padded_gas_limit(estimate));

        tracing::info!(
            "[TX] submitting verifyProof({item_id}) nonce={nonce} gas_limit={} fees={quote:?}",
            fees::padded_gas_limit(estimate)
        );

        let wallet = EthereumWallet::from(self.signer.clone());
        let signed = tx
            .build(&wallet)
            .await
            .map_err(|e| TransactionError::Sign(e.to_string()))?;

        let hash = self
            .chain
            .send_raw_transaction(signed.encoded_2718())
            .await
            .map_err(|e| TransactionError::Submit(e.to_string()))?;
        tracing::info!("[TX] verifyProof({item_id}) submitted: {hash:#x}");

        let receipt = self
            .chain
            .wait_for_receipt(hash, self.receipt_timeout)
            .await
            .map_err(|e| TransactionError::Confirm(e.to_string()))?;

        if !receipt.status() {
            return Err(TransactionError::Confirm(format!(
                "verifyProof({item_id}) reverted in block {:?}, tx {hash:#x}",
                receipt.block_number
            )));
        }

        tracing::info!(
            "[TX] verifyProof({item_id}) confirmed in block {:?}: {hash:#x}",
            receipt.block_number
        );
        Ok(hash)
    }
}
