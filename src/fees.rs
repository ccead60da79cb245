//! Gas pricing.
//!
//! Chains that expose a base fee get an EIP-1559 quote with a fixed priority
//! tip; anything else (or any failure probing for one) falls back to legacy
//! `gasPrice`. The two pricing modes are mutually exclusive by construction.

use crate::chain::ChainClient;
use crate::error::ChainError;
use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;

/// Fixed miner tip for fee-market transactions: 2 gwei.
pub const PRIORITY_TIP_WEI: u128 = 2_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeQuote {
    Legacy {
        gas_price: u128,
    },
    Market {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl FeeQuote {
    pub fn apply(self, tx: TransactionRequest) -> TransactionRequest {
        match self {
            FeeQuote::Legacy { gas_price } => tx.with_gas_price(gas_price),
            FeeQuote::Market {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => tx
                .with_max_fee_per_gas(max_fee_per_gas)
                .with_max_priority_fee_per_gas(max_priority_fee_per_gas),
        }
    }
}

/// Max fee leaves headroom for one full base-fee doubling plus the tip, so a
/// quote stays valid across the blocks it may take to land.
pub fn quote_for_base_fee(base_fee: Option<u128>, legacy_gas_price: u128) -> FeeQuote {
    match base_fee {
        Some(base) => FeeQuote::Market {
            max_fee_per_gas: base.saturating_mul(2).saturating_add(PRIORITY_TIP_WEI),
            max_priority_fee_per_gas: PRIORITY_TIP_WEI,
        },
        None => FeeQuote::Legacy {
            gas_price: legacy_gas_price,
        },
    }
}

/// Gas limit padded 20% over the node's estimate, rounded up.
pub fn padded_gas_limit(estimate: u64) -> u64 {
    estimate.saturating_mul(12).div_ceil(10)
}

pub async fn prepare(chain: &ChainClient) -> Result<FeeQuote, ChainError> {
    let base_fee = chain.latest_base_fee().await;
    if base_fee.is_some() {
        Ok(quote_for_base_fee(base_fee, 0))
    } else {
        let gas_price = chain.gas_price().await?;
        Ok(quote_for_base_fee(None, gas_price))
    }
}

#[cfg(test)]
mod tests {
    use super::{padded_gas_limit, quote_for_base_fee, FeeQuote, PRIORITY_TIP_WEI};
    use alloy::rpc::types::TransactionRequest;

    #[test]
    fn test_market_quote_doubles_base_fee_and_adds_tip() {
        let quote = quote_for_base_fee(Some(30_000_000_000), 0);
        assert_eq!(
            quote,
            FeeQuote::Market {
                max_fee_per_gas: 60_000_000_000 + PRIORITY_TIP_WEI,
                max_priority_fee_per_gas: PRIORITY_TIP_WEI,
            }
        );
    }

    #[test]
    fn test_legacy_quote_uses_node_gas_price() {
        let quote = quote_for_base_fee(None, 7_000_000_000);
        assert_eq!(
            quote,
            FeeQuote::Legacy {
                gas_price: 7_000_000_000
            }
        );
    }

    #[test]
    fn test_applied_fee_fields_are_mutually_exclusive() {
        let legacy = quote_for_base_fee(None, 5).apply(TransactionRequest::default());
        assert_eq!(legacy.gas_price, Some(5));
        assert!(legacy.max_fee_per_gas.is_none());
        assert!(legacy.max_priority_fee_per_gas.is_none());

        let market = quote_for_base_fee(Some(100), 0).apply(TransactionRequest::default());
        assert!(market.gas_price.is_none());
        assert_eq!(market.max_fee_per_gas, Some(200 + PRIORITY_TIP_WEI));
        assert_eq!(market.max_priority_fee_per_gas, Some(PRIORITY_TIP_WEI));
    }

    #[test]
    fn test_gas_limit_padding_rounds_up() {
        assert_eq!(padded_gas_limit(100_000), 120_000);
        assert_eq!(padded_gas_limit(21_001), 25_202);
        assert_eq!(padded_gas_limit(0), 0);
        assert_eq!(padded_gas_limit(1), 2);
    }
}
