//! Chain client adapter.
//!
//! Normalizes RPC calls whose parameter conventions differ across node
//! versions (event-log range queries in particular) and wraps every
//! network-facing call with an explicit per-attempt timeout and bounded
//! exponential backoff.

use crate::error::ChainError;
use crate::utils::error::compact_error_message;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionReceipt, TransactionRequest};
use alloy::transports::http::Http;
use reqwest::Client;
use std::borrow::Cow;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

pub type HttpProvider = RootProvider<Http<Client>>;

const RPC_ERR_MAX_LEN: usize = 260;
const RPC_RETRIES: usize = 3;
const RETRY_BACKOFF_BASE_MS: u64 = 100;
const RETRY_BACKOFF_CAP_MS: u64 = 1_800;
const RECEIPT_POLL_MS: u64 = 1_500;

fn block_tag(block_number: u64) -> String {
    format!("0x{block_number:x}")
}

/// Errors that indicate the request *shape* was rejected (wrong parameter
/// naming or encoding for this node), as opposed to a transient failure.
/// Only these trigger the alternate-naming retry in `get_logs_range`.
fn is_param_shape_rejection(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    ["-32602", "invalid params", "unknown field", "invalid argument"]
        .iter()
        .any(|needle| msg.contains(needle))
}

fn is_retryable_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    let non_retryable = [
        "method not found",
        "-32601",
        "invalid params",
        "-32602",
        "execution reverted",
        "revert",
        "parse error",
        "-32700",
    ];
    !non_retryable.iter().any(|needle| msg.contains(needle))
}

fn bounded_exponential_backoff_ms(base_ms: u64, streak: u32, cap_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let clamped = streak.min(8);
    base_ms
        .saturating_mul(1u64 << clamped)
        .min(cap_ms.max(base_ms))
}

fn retry_backoff_ms(attempt: usize) -> u64 {
    bounded_exponential_backoff_ms(RETRY_BACKOFF_BASE_MS, attempt as u32, RETRY_BACKOFF_CAP_MS)
}

fn compact_rpc_error(message: &str) -> String {
    compact_error_message(message, RPC_ERR_MAX_LEN)
}

fn parse_base_fee(block: &serde_json::Value) -> Option<u128> {
    let raw = block.get("baseFeePerGas")?.as_str()?;
    u128::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

pub struct ChainClient {
    provider: HttpProvider,
    rpc_url: String,
    call_timeout: Duration,
}

impl ChainClient {
    /// Build the provider and probe `eth_chainId`. A probe failure is a
    /// startup connectivity error, fatal to the process.
    pub async fn connect(rpc_url: &str, call_timeout_ms: u64) -> Result<Self, ChainError> {
        let parsed = rpc_url.parse::<reqwest::Url>().map_err(|err| {
            ChainError::Connectivity(format!("invalid RPC url `{rpc_url}`: {err}"))
        })?;
        let client = Self {
            provider: ProviderBuilder::new().on_http(parsed),
            rpc_url: rpc_url.to_string(),
            call_timeout: Duration::from_millis(call_timeout_ms),
        };
        client
            .chain_id()
            .await
            .map_err(|err| ChainError::Connectivity(format!("{}: {err}", client.rpc_url)))?;
        Ok(client)
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn with_retry<T, Op, Fut>(&self, context: &str, mut op: Op) -> Result<T, ChainError>
    where
        Op: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut last_message = String::new();
        for attempt in 1..=RPC_RETRIES {
            match timeout(self.call_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    let message = compact_rpc_error(&err.to_string());
                    if !is_retryable_rpc_error(&message) || attempt == RPC_RETRIES {
                        return Err(ChainError::Rpc(format!(
                            "{context} failed on attempt {attempt}/{RPC_RETRIES}: {message}"
                        )));
                    }
                    last_message = message;
                }
                Err(_) => {
                    last_message = format!("timed out after {}ms", self.call_timeout.as_millis());
                    if attempt == RPC_RETRIES {
                        return Err(ChainError::Rpc(format!(
                            "{context} failed on attempt {attempt}/{RPC_RETRIES}: {last_message}"
                        )));
                    }
                }
            }
            sleep(Duration::from_millis(retry_backoff_ms(attempt))).await;
        }
        Err(ChainError::Rpc(format!(
            "{context} failed after {RPC_RETRIES} attempt(s): {last_message}"
        )))
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        self.with_retry("eth_chainId", || {
            let p = self.provider.clone();
            async move { p.get_chain_id().await.map_err(anyhow::Error::from) }
        })
        .await
    }

    pub async fn latest_block_number(&self) -> Result<u64, ChainError> {
        self.with_retry("eth_blockNumber", || {
            let p = self.provider.clone();
            async move { p.get_block_number().await.map_err(anyhow::Error::from) }
        })
        .await
    }

    pub async fn gas_price(&self) -> Result<u128, ChainError> {
        self.with_retry("eth_gasPrice", || {
            let p = self.provider.clone();
            async move { p.get_gas_price().await.map_err(anyhow::Error::from) }
        })
        .await
    }

    pub async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        self.with_retry(&format!("eth_getTransactionCount({address:#x})"), || {
            let p = self.provider.clone();
            async move {
                p.get_transaction_count(address)
                    .await
                    .map_err(anyhow::Error::from)
            }
        })
        .await
    }

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, ChainError> {
        self.with_retry("eth_estimateGas", || {
            let p = self.provider.clone();
            let tx = tx.clone();
            async move { p.estimate_gas(&tx).await.map_err(anyhow::Error::from) }
        })
        .await
    }

    pub async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError> {
        self.with_retry("eth_call", || {
            let p = self.provider.clone();
            let tx = tx.clone();
            async move { p.call(&tx).await.map_err(anyhow::Error::from) }
        })
        .await
    }

    /// Base fee of the latest block, or `None` when the node does not expose
    /// one (pre-fee-market chain) or the lookup fails (node incompatibility).
    /// Callers fall back to legacy gas pricing on `None`; this never errors.
    ///
    /// Raw JSON is used on purpose: typed block decoding is brittle across
    /// node versions, and only one optional header field is needed here.
    pub async fn latest_base_fee(&self) -> Option<u128> {
        let fetched = timeout(self.call_timeout, async {
            self.provider
                .raw_request::<_, serde_json::Value>(
                    Cow::Borrowed("eth_getBlockByNumber"),
                    serde_json::json!(["latest", false]),
                )
                .await
        })
        .await;

        match fetched {
            Ok(Ok(block)) => parse_base_fee(&block),
            Ok(Err(err)) => {
                tracing::debug!(
                    "[GAS] latest block fetch failed, treating base fee as unavailable: {}",
                    compact_rpc_error(&err.to_string())
                );
                None
            }
            Err(_) => {
                tracing::debug!("[GAS] latest block fetch timed out, treating base fee as unavailable");
                None
            }
        }
    }

    /// Event-log retrieval with a capability-negotiation cascade:
    ///
    /// 1. typed `eth_getLogs` via the provider (primary parameter convention);
    /// 2. on a parameter-shape rejection only, raw `eth_getLogs` with explicit
    ///    hex-quantity range parameters (alternate naming);
    /// 3. on any other failure, a persistent filter over the same range,
    ///    drained with `eth_getFilterLogs`.
    ///
    /// A range is never silently dropped: if every strategy fails the call
    /// returns `ChainError::Query` and the caller must not advance its
    /// watermark past the range.
    pub async fn get_logs_range(
        &self,
        address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .address(address)
            .event_signature(topic0)
            .from_block(from_block)
            .to_block(to_block);

        let primary = timeout(self.call_timeout, self.provider.get_logs(&filter)).await;
        let primary_reason = match primary {
            Ok(Ok(logs)) => return Ok(logs),
            Ok(Err(err)) => compact_rpc_error(&err.to_string()),
            Err(_) => format!("timed out after {}ms", self.call_timeout.as_millis()),
        };

        if is_param_shape_rejection(&primary_reason) {
            tracing::debug!(
                "[WATCH] typed eth_getLogs rejected ({}), retrying with raw range params",
                primary_reason
            );
            match self.get_logs_raw(address, topic0, from_block, to_block).await {
                Ok(logs) => return Ok(logs),
                Err(reason) => {
                    tracing::debug!("[WATCH] raw eth_getLogs also failed: {}", reason);
                }
            }
        } else {
            tracing::debug!(
                "[WATCH] eth_getLogs failed ({}), falling back to a persistent filter",
                primary_reason
            );
        }

        match self
            .get_logs_via_filter(address, topic0, from_block, to_block)
            .await
        {
            Ok(logs) => Ok(logs),
            Err(filter_reason) => Err(ChainError::Query {
                from_block,
                to_block,
                reason: format!("{primary_reason}; filter fallback: {filter_reason}"),
            }),
        }
    }

    async fn get_logs_raw(
        &self,
        address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, String> {
        let params = serde_json::json!([{
            "address": address,
            "topics": [topic0],
            "fromBlock": block_tag(from_block),
            "toBlock": block_tag(to_block),
        }]);
        match timeout(self.call_timeout, async {
            self.provider
                .raw_request::<_, Vec<Log>>(Cow::Borrowed("eth_getLogs"), params)
                .await
        })
        .await
        {
            Ok(Ok(logs)) => Ok(logs),
            Ok(Err(err)) => Err(compact_rpc_error(&err.to_string())),
            Err(_) => Err(format!(
                "timed out after {}ms",
                self.call_timeout.as_millis()
            )),
        }
    }

    async fn get_logs_via_filter(
        &self,
        address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, String> {
        let params = serde_json::json!([{
            "address": address,
            "topics": [topic0],
            "fromBlock": block_tag(from_block),
            "toBlock": block_tag(to_block),
        }]);
        let filter_id = match timeout(self.call_timeout, async {
            self.provider
                .raw_request::<_, serde_json::Value>(Cow::Borrowed("eth_newFilter"), params)
                .await
        })
        .await
        {
            Ok(Ok(id)) => id,
            Ok(Err(err)) => return Err(compact_rpc_error(&err.to_string())),
            Err(_) => {
                return Err(format!(
                    "eth_newFilter timed out after {}ms",
                    self.call_timeout.as_millis()
                ))
            }
        };

        let drained = timeout(self.call_timeout, async {
            self.provider
                .raw_request::<_, Vec<Log>>(
                    Cow::Borrowed("eth_getFilterLogs"),
                    serde_json::json!([filter_id]),
                )
                .await
        })
        .await;

        // Best-effort uninstall; leaked server-side filters expire on their own.
        let _ = timeout(self.call_timeout, async {
            self.provider
                .raw_request::<_, serde_json::Value>(
                    Cow::Borrowed("eth_uninstallFilter"),
                    serde_json::json!([filter_id]),
                )
                .await
        })
        .await;

        match drained {
            Ok(Ok(logs)) => Ok(logs),
            Ok(Err(err)) => Err(compact_rpc_error(&err.to_string())),
            Err(_) => Err(format!(
                "eth_getFilterLogs timed out after {}ms",
                self.call_timeout.as_millis()
            )),
        }
    }

    /// Submit raw signed bytes. Exactly one attempt: re-submitting after an
    /// ambiguous failure could double-spend the nonce.
    pub async fn send_raw_transaction(&self, raw: Vec<u8>) -> Result<B256, ChainError> {
        let raw = Bytes::from(raw);
        match timeout(self.call_timeout, self.provider.send_raw_transaction(&raw)).await {
            Ok(Ok(pending)) => Ok(*pending.tx_hash()),
            Ok(Err(err)) => Err(ChainError::Rpc(format!(
                "eth_sendRawTransaction failed: {}",
                compact_rpc_error(&err.to_string())
            ))),
            Err(_) => Err(ChainError::Rpc(format!(
                "eth_sendRawTransaction timed out after {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    /// Block until one confirming receipt is observed, bounded by `deadline`.
    pub async fn wait_for_receipt(
        &self,
        hash: B256,
        deadline: Duration,
    ) -> Result<TransactionReceipt, ChainError> {
        let started = Instant::now();
        loop {
            match timeout(self.call_timeout, self.provider.get_transaction_receipt(hash)).await {
                Ok(Ok(Some(receipt))) => return Ok(receipt),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => {
                    tracing::debug!(
                        "[TX] receipt poll error for {hash:#x}: {}",
                        compact_rpc_error(&err.to_string())
                    );
                }
                Err(_) => {
                    tracing::debug!("[TX] receipt poll timed out for {hash:#x}");
                }
            }
            if started.elapsed() >= deadline {
                return Err(ChainError::Rpc(format!(
                    "no receipt for {hash:#x} after {}ms",
                    deadline.as_millis()
                )));
            }
            sleep(Duration::from_millis(RECEIPT_POLL_MS)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        block_tag, bounded_exponential_backoff_ms, is_param_shape_rejection,
        is_retryable_rpc_error, parse_base_fee, retry_backoff_ms,
    };

    #[test]
    fn test_shape_rejection_classifier() {
        assert!(is_param_shape_rejection(
            "RPC error -32602: invalid params"
        ));
        assert!(is_param_shape_rejection("unknown field `fromBlock`"));
        assert!(!is_param_shape_rejection("429 Too Many Requests"));
        assert!(!is_param_shape_rejection("connection reset by peer"));
    }

    #[test]
    fn test_retry_classifier_non_retryable_patterns() {
        assert!(!is_retryable_rpc_error("method not found: eth_newFilter"));
        assert!(!is_retryable_rpc_error(
            "execution reverted: Only the Inspector can verify"
        ));
        assert!(!is_retryable_rpc_error("-32602 invalid params"));
    }

    #[test]
    fn test_retry_classifier_retryable_network_patterns() {
        assert!(is_retryable_rpc_error(
            "dns error: failed to lookup address information"
        ));
        assert!(is_retryable_rpc_error("429 Too Many Requests"));
        assert!(is_retryable_rpc_error("connection reset by peer"));
    }

    #[test]
    fn test_retry_backoff_is_bounded() {
        assert!(retry_backoff_ms(1) >= 100);
        assert!(retry_backoff_ms(20) <= 1_800);
        assert_eq!(bounded_exponential_backoff_ms(1_000, 0, 30_000), 1_000);
        assert_eq!(bounded_exponential_backoff_ms(1_000, 6, 30_000), 30_000);
    }

    #[test]
    fn test_block_tag_is_hex_quantity() {
        assert_eq!(block_tag(0), "0x0");
        assert_eq!(block_tag(105), "0x69");
    }

    #[test]
    fn test_parse_base_fee_handles_missing_field() {
        let market = serde_json::json!({ "number": "0x10", "baseFeePerGas": "0x3b9aca00" });
        assert_eq!(parse_base_fee(&market), Some(1_000_000_000));

        let legacy = serde_json::json!({ "number": "0x10" });
        assert_eq!(parse_base_fee(&legacy), None);

        assert_eq!(parse_base_fee(&serde_json::Value::Null), None);
    }
}
