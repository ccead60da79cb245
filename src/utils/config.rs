use crate::error::ConfigError;
use alloy::primitives::Address;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

const DEFAULT_JUDGMENT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_JUDGMENT_MODEL: &str = "openai/gpt-4o";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_RECEIPT_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_RPC_CALL_TIMEOUT_MS: u64 = 5_000;

/// Process configuration, environment-sourced and validated at startup.
/// Every missing required value is a fatal `ConfigError`.
pub struct Config {
    pub rpc_url: String,
    pub contract_address: Address,
    /// Hex signing key, held only in process memory. Never logged.
    pub private_key: String,
    pub judgment_api_key: String,
    pub judgment_base_url: String,
    pub judgment_model: String,
    pub poll_interval_ms: u64,
    pub receipt_timeout_ms: u64,
    pub rpc_call_timeout_ms: u64,
}

/// Populate the environment from `.env` without overriding variables that are
/// already set. Quoted values and trailing `#` comments are handled.
pub fn load_dot_env() {
    let path = Path::new(".env");
    if !path.exists() {
        return;
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ENV] Failed to read .env: {}", e);
            return;
        }
    };

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        if env::var_os(key.trim()).is_some() {
            continue;
        }

        let value_no_comment = value.split('#').next().unwrap_or("").trim();
        let parsed = if value_no_comment.len() >= 2
            && ((value_no_comment.starts_with('"') && value_no_comment.ends_with('"'))
                || (value_no_comment.starts_with('\'') && value_no_comment.ends_with('\'')))
        {
            &value_no_comment[1..value_no_comment.len() - 1]
        } else {
            value_no_comment
        };
        env::set_var(key.trim(), parsed);
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingConfig(format!("{name} must be set")))
}

fn validate_http_url(name: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::InvalidConfig(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidConfig(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))),
    }
}

pub fn parse_contract_address(raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw.trim()).map_err(|e| {
        ConfigError::InvalidConfig(format!("CONTRACT_ADDRESS must be a 20-byte hex address: {e}"))
    })
}

/// Sanity-check the signing key shape without parsing it into a signer.
/// Returns the cleaned hex (no `0x` prefix). Actual parsing happens at startup.
pub fn validate_private_key(raw: &str) -> Result<String, ConfigError> {
    let clean = raw.trim().trim_start_matches("0x");
    let hexish = clean.len() == 64 && clean.as_bytes().iter().all(|b| b.is_ascii_hexdigit());
    if !hexish {
        return Err(ConfigError::InvalidConfig(
            "PRIVATE_KEY must be 32 bytes of hex (optionally 0x-prefixed)".to_string(),
        ));
    }
    Ok(clean.to_string())
}

fn env_u64_clamped(name: &str, default: u64, min: u64, max: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let judgment_api_key = require_env("OPENROUTER_API_KEY")?;

        let contract_address = parse_contract_address(&require_env("CONTRACT_ADDRESS")?)?;

        let private_key = validate_private_key(&require_env("PRIVATE_KEY")?)?;

        let rpc_url = require_env("RPC_URL")?;
        validate_http_url("RPC_URL", &rpc_url)?;

        let judgment_base_url = env::var("JUDGMENT_BASE_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_JUDGMENT_BASE_URL.to_string());
        validate_http_url("JUDGMENT_BASE_URL", &judgment_base_url)?;

        let judgment_model = env::var("JUDGMENT_MODEL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_JUDGMENT_MODEL.to_string());

        Ok(Self {
            rpc_url,
            contract_address,
            private_key,
            judgment_api_key,
            judgment_base_url,
            judgment_model,
            poll_interval_ms: env_u64_clamped(
                "POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
                250,
                600_000,
            ),
            receipt_timeout_ms: env_u64_clamped(
                "RECEIPT_TIMEOUT_MS",
                DEFAULT_RECEIPT_TIMEOUT_MS,
                5_000,
                3_600_000,
            ),
            rpc_call_timeout_ms: env_u64_clamped(
                "RPC_CALL_TIMEOUT_MS",
                DEFAULT_RPC_CALL_TIMEOUT_MS,
                250,
                60_000,
            ),
        })
    }
}
