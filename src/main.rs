use alloy::signers::local::PrivateKeySigner;
use anyhow::Context;
use escrow_inspector::chain::ChainClient;
use escrow_inspector::contract::ContractGateway;
use escrow_inspector::inspector::Inspector;
use escrow_inspector::judgment::JudgmentClient;
use escrow_inspector::submitter::Submitter;
use escrow_inspector::utils::config::{load_dot_env, Config};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dot_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load().context("configuration")?;

    let signer = PrivateKeySigner::from_str(&config.private_key)
        .context("PRIVATE_KEY does not parse as a secp256k1 key")?;

    let chain = Arc::new(
        ChainClient::connect(&config.rpc_url, config.rpc_call_timeout_ms)
            .await
            .context("chain node connection")?,
    );
    let chain_id = chain.chain_id().await.context("chain id lookup")?;

    tracing::info!("[STARTUP] rpc: {}", chain.rpc_url());
    tracing::info!("[STARTUP] chain id: {chain_id}");
    tracing::info!("[STARTUP] escrow contract: {:#x}", config.contract_address);
    tracing::info!("[STARTUP] inspector address: {:#x}", signer.address());

    let gateway = ContractGateway::new(Arc::clone(&chain), config.contract_address);
    let oracle = JudgmentClient::new(
        config.judgment_base_url.clone(),
        config.judgment_api_key.clone(),
        config.judgment_model.clone(),
    );
    tracing::info!("[STARTUP] judgment model: {}", oracle.model());
    let submitter = Submitter::new(
        Arc::clone(&chain),
        signer,
        chain_id,
        config.contract_address,
        Duration::from_millis(config.receipt_timeout_ms),
    );

    // Only proofs submitted after startup are inspected; pre-existing
    // submissions require a re-upload.
    let head = chain
        .latest_block_number()
        .await
        .context("initial head lookup")?;

    Inspector::new(
        gateway,
        oracle,
        submitter,
        head,
        Duration::from_millis(config.poll_interval_ms),
    )
    .run()
    .await;

    Ok(())
}
