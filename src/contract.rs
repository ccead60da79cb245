//! BudgetEscrow contract gateway.
//!
//! Owns the ABI surface: decoding `budgetItems` reads, decoding
//! `ProofUploaded` events out of raw logs, and encoding `verifyProof`
//! calldata. Everything network-facing goes through `ChainClient`.

use crate::chain::ChainClient;
use crate::error::ChainError;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use std::sync::Arc;

sol! {
    interface IBudgetEscrow {
        function budgetItems(uint256) external view returns (
            uint256, string, uint256, address, string, bool, uint256, bool
        );
        function verifyProof(uint256 _id) external;
        event ProofUploaded(uint256 id, string proofUrl);
    }
}

/// On-chain state of a budget item, reduced to the fields the verification
/// pipeline acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetItem {
    pub id: U256,
    pub amount_wei: U256,
    pub verified: bool,
}

/// A decoded `ProofUploaded` event occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofSubmittedEvent {
    pub item_id: U256,
    /// Either a URL pointing at proof material or free-form proof text; the
    /// contract does not constrain it.
    pub proof_reference: String,
    pub block_number: u64,
}

pub fn proof_uploaded_topic() -> B256 {
    IBudgetEscrow::ProofUploaded::SIGNATURE_HASH
}

/// ABI-encoded calldata for `verifyProof(itemId)`.
pub fn verify_call_data(item_id: U256) -> Vec<u8> {
    IBudgetEscrow::verifyProofCall { _id: item_id }.abi_encode()
}

fn decode_item(item_id: U256, data: &[u8]) -> Result<BudgetItem, ChainError> {
    let fields = IBudgetEscrow::budgetItemsCall::abi_decode_returns(data, true).map_err(|e| {
        ChainError::Rpc(format!("budgetItems({item_id}) returned undecodable data: {e}"))
    })?;
    Ok(BudgetItem {
        id: fields._0,
        amount_wei: fields._2,
        verified: fields._5,
    })
}

/// Read and event access for the escrow contract, kept behind a trait so the
/// verification loop can run against in-memory doubles.
#[async_trait]
pub trait EscrowSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64, ChainError>;
    async fn proof_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ProofSubmittedEvent>, ChainError>;
    async fn read_item(&self, item_id: U256) -> Result<BudgetItem, ChainError>;
}

pub struct ContractGateway {
    chain: Arc<ChainClient>,
    address: Address,
}

impl ContractGateway {
    pub fn new(chain: Arc<ChainClient>, address: Address) -> Self {
        Self { chain, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl EscrowSource for ContractGateway {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        self.chain.latest_block_number().await
    }

    /// Decode failures on individual logs are logged and skipped rather than
    /// failing the whole range; a malformed log from a lookalike event must
    /// not wedge the watermark forever.
    async fn proof_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ProofSubmittedEvent>, ChainError> {
        let logs = self
            .chain
            .get_logs_range(self.address, proof_uploaded_topic(), from_block, to_block)
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let block_number = log.block_number.unwrap_or(from_block);
            match IBudgetEscrow::ProofUploaded::decode_log_data(&log.inner.data, true) {
                Ok(decoded) => events.push(ProofSubmittedEvent {
                    item_id: decoded.id,
                    proof_reference: decoded.proofUrl,
                    block_number,
                }),
                Err(e) => {
                    tracing::warn!(
                        "[WATCH] skipping undecodable ProofUploaded log in block {}: {}",
                        block_number,
                        e
                    );
                }
            }
        }
        Ok(events)
    }

    async fn read_item(&self, item_id: U256) -> Result<BudgetItem, ChainError> {
        let call = IBudgetEscrow::budgetItemsCall { _0: item_id };
        let tx = TransactionRequest::default()
            .with_to(self.address)
            .with_input(Bytes::from(call.abi_encode()));
        let data = self.chain.call(&tx).await?;
        decode_item(item_id, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_item, proof_uploaded_topic, verify_call_data, IBudgetEscrow};
    use alloy::primitives::{keccak256, Address, LogData, U256};
    use alloy::sol_types::{SolEvent, SolValue};

    #[test]
    fn test_verify_call_data_selector_and_length() {
        let data = verify_call_data(U256::from(7));
        assert_eq!(data.len(), 36);
        let expected = keccak256("verifyProof(uint256)".as_bytes());
        assert_eq!(&data[..4], &expected[..4]);
        assert_eq!(data[35], 7);
    }

    #[test]
    fn test_proof_uploaded_topic_matches_signature() {
        let expected = keccak256("ProofUploaded(uint256,string)".as_bytes());
        assert_eq!(proof_uploaded_topic(), expected);
    }

    #[test]
    fn test_decode_item_picks_amount_and_verified_fields() {
        let tuple = (
            U256::from(3u64),
            "materials".to_string(),
            U256::from(1_500_000_000_000_000_000u128),
            Address::repeat_byte(0x22),
            "https://proofs.example/receipt.png".to_string(),
            true,
            U256::from(1_700_000_000u64),
            false,
        );
        let encoded = tuple.abi_encode_params();
        let item = decode_item(U256::from(3u64), &encoded).unwrap();
        assert_eq!(item.id, U256::from(3u64));
        assert_eq!(item.amount_wei, U256::from(1_500_000_000_000_000_000u128));
        assert!(item.verified);
    }

    #[test]
    fn test_decode_item_rejects_garbage() {
        assert!(decode_item(U256::from(1u64), &[0u8; 7]).is_err());
    }

    #[test]
    fn test_event_round_trips_through_log_data() {
        let event = IBudgetEscrow::ProofUploaded {
            id: U256::from(42u64),
            proofUrl: "https://proofs.example/42.jpg".to_string(),
        };
        let log = LogData::new_unchecked(
            vec![IBudgetEscrow::ProofUploaded::SIGNATURE_HASH],
            event.encode_data().into(),
        );
        let decoded = IBudgetEscrow::ProofUploaded::decode_log_data(&log, true).unwrap();
        assert_eq!(decoded.id, U256::from(42u64));
        assert_eq!(decoded.proofUrl, "https://proofs.example/42.jpg");
    }
}
