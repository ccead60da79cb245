use thiserror::Error;

pub type Result<T> = std::result::Result<T, InspectorError>;

#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("transaction error: {0}")]
    Tx(#[from] TransactionError),
}

/// Fatal at startup; the process exits immediately.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum ChainError {
    /// Cannot reach or authenticate to the node at startup; fatal.
    #[error("cannot reach chain node: {0}")]
    Connectivity(String),
    /// Event retrieval failed under every fallback strategy. The block range is
    /// not marked processed; the caller retries it on the next poll iteration.
    #[error("event query failed for blocks {from_block}..={to_block}: {reason}")]
    Query {
        from_block: u64,
        to_block: u64,
        reason: String,
    },
    #[error("rpc failure: {0}")]
    Rpc(String),
}

/// Fatal for the current item. Never retried automatically; the item stays
/// unverified on-chain until a new proof submission retriggers the pipeline.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction build failed: {0}")]
    Build(String),
    #[error("transaction signing failed: {0}")]
    Sign(String),
    #[error("transaction submission failed: {0}")]
    Submit(String),
    #[error("transaction confirmation failed: {0}")]
    Confirm(String),
}
