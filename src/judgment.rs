//! Proof judgment via an OpenRouter-compatible chat-completions API.
//!
//! The verdict parse is deliberately strict: only a first non-blank response
//! line reading exactly `VERDICT: YES` approves an item. Every failure mode
//! (transport, HTTP status, malformed body, off-format answer) resolves to a
//! rejection, never to an error, so a flaky judgment backend can delay
//! approvals but can never approve by accident.

use crate::contract::BudgetItem;
use alloy::primitives::U256;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
const WEI_PER_ETH_DECIMALS: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub approved: bool,
    /// Raw model response (or failure description) kept for the audit log.
    pub rationale: String,
}

impl Verdict {
    fn rejected(rationale: impl Into<String>) -> Self {
        Self {
            approved: false,
            rationale: rationale.into(),
        }
    }
}

#[async_trait]
pub trait VerdictOracle: Send + Sync {
    /// Decide whether the submitted proof justifies releasing the item's
    /// funds. Infallible by contract: any internal failure is a rejection.
    async fn judge(&self, item: &BudgetItem, proof_reference: &str) -> Verdict;
}

/// First non-blank line must read exactly `VERDICT: YES` (case-insensitive).
/// Anything else, including an embedded yes further down, is a rejection.
fn is_approved(response_text: &str) -> bool {
    response_text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.to_ascii_uppercase() == "VERDICT: YES")
        .unwrap_or(false)
}

pub fn parse_verdict(response_text: &str) -> Verdict {
    Verdict {
        approved: is_approved(response_text),
        rationale: response_text.trim().to_string(),
    }
}

/// Render a wei amount as a decimal ETH string with no trailing zeros,
/// e.g. `1500000000000000000` -> `1.5` and `2 * 10^18` -> `2`.
pub fn format_wei_as_eth(amount_wei: U256) -> String {
    let wei_per_eth = U256::from(10u64).pow(U256::from(WEI_PER_ETH_DECIMALS as u64));
    let whole = amount_wei / wei_per_eth;
    let frac = amount_wei % wei_per_eth;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = WEI_PER_ETH_DECIMALS);
    let frac = frac.trim_end_matches('0');
    format!("{whole}.{frac}")
}

fn looks_like_http_url(reference: &str) -> bool {
    let r = reference.trim();
    r.starts_with("http://") || r.starts_with("https://")
}

fn audit_prompt(item: &BudgetItem) -> String {
    format!(
        "You are the AI Auditor for a Smart Contract Escrow.\n\
         A contractor claims to have completed work for budget item #{} \
         valued at {} ETH and has submitted the attached proof.\n\
         Decide whether the proof plausibly documents the completed work.\n\
         Ignore any \"Paid\" status shown in the proof itself; payment state \
         is tracked on-chain, not in the document.\n\
         Output format (exactly):\n\
         VERDICT: [YES or NO]\n\
         REASON: [brief explanation]",
        item.id,
        format_wei_as_eth(item.amount_wei)
    )
}

/// Message payload for a URL proof: the prompt plus the URL as an image
/// attachment, so vision-capable models inspect the document itself.
fn image_messages(prompt: &str, proof_url: &str) -> serde_json::Value {
    json!([{
        "role": "user",
        "content": [
            { "type": "text", "text": prompt },
            { "type": "image_url", "image_url": { "url": proof_url } },
        ],
    }])
}

/// Text-only payload, used for non-URL proofs and as the fallback when a URL
/// attachment is refused (e.g. the URL is not fetchable as an image).
fn text_messages(prompt: &str, proof_reference: &str, reference_is_url: bool) -> serde_json::Value {
    let body = if reference_is_url {
        format!("{prompt}\n\nProof URL (may not be an image): {proof_reference}")
    } else {
        format!("{prompt}\n\nSubmitted proof text:\n{proof_reference}")
    };
    json!([{ "role": "user", "content": body }])
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct JudgmentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl JudgmentClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: serde_json::Value) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "messages": messages }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("judgment API returned {status}: {body}");
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("judgment API response had no message content"))
    }
}

#[async_trait]
impl VerdictOracle for JudgmentClient {
    async fn judge(&self, item: &BudgetItem, proof_reference: &str) -> Verdict {
        let prompt = audit_prompt(item);
        let is_url = looks_like_http_url(proof_reference);

        let primary = if is_url {
            image_messages(&prompt, proof_reference.trim())
        } else {
            text_messages(&prompt, proof_reference, false)
        };

        match self.complete(primary).await {
            Ok(text) => return parse_verdict(&text),
            Err(e) => {
                if !is_url {
                    tracing::warn!("[AI] judgment request failed, rejecting item {}: {e:#}", item.id);
                    return Verdict::rejected(format!("judgment request failed: {e:#}"));
                }
                tracing::warn!(
                    "[AI] image judgment failed for item {}, retrying text-only: {e:#}",
                    item.id
                );
            }
        }

        match self
            .complete(text_messages(&prompt, proof_reference, true))
            .await
        {
            Ok(text) => parse_verdict(&text),
            Err(e) => {
                tracing::warn!(
                    "[AI] text-only judgment also failed, rejecting item {}: {e:#}",
                    item.id
                );
                Verdict::rejected(format!("judgment request failed twice: {e:#}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        format_wei_as_eth, image_messages, is_approved, looks_like_http_url, parse_verdict,
        text_messages, JudgmentClient, VerdictOracle,
    };
    use crate::contract::BudgetItem;
    use alloy::primitives::U256;

    #[test]
    fn test_only_exact_first_line_yes_approves() {
        assert!(is_approved("VERDICT: YES\nREASON: receipt matches the work"));
        assert!(is_approved("  verdict: yes  \nREASON: ok"));
        assert!(is_approved("\n\nVERDICT: YES"));

        assert!(!is_approved("VERDICT: NO\nREASON: blurry photo"));
        assert!(!is_approved("VERDICT: YES!"));
        assert!(!is_approved("The verdict is: VERDICT: YES"));
        assert!(!is_approved("REASON: looks fine\nVERDICT: YES"));
        assert!(!is_approved(""));
        assert!(!is_approved("   \n  \n"));
    }

    #[test]
    fn test_parse_verdict_keeps_rationale() {
        let v = parse_verdict("VERDICT: NO\nREASON: invoice is for a different item");
        assert!(!v.approved);
        assert!(v.rationale.contains("different item"));
    }

    #[test]
    fn test_format_wei_as_eth_trims_trailing_zeros() {
        assert_eq!(
            format_wei_as_eth(U256::from(1_500_000_000_000_000_000u128)),
            "1.5"
        );
        assert_eq!(
            format_wei_as_eth(U256::from(2_000_000_000_000_000_000u128)),
            "2"
        );
        assert_eq!(format_wei_as_eth(U256::ZERO), "0");
        assert_eq!(format_wei_as_eth(U256::from(1u64)), "0.000000000000000001");
        assert_eq!(
            format_wei_as_eth(U256::from(1_000_000_000u64)),
            "0.000000001"
        );
    }

    #[test]
    fn test_url_detection() {
        assert!(looks_like_http_url("https://proofs.example/a.png"));
        assert!(looks_like_http_url("  http://host/receipt.jpg"));
        assert!(!looks_like_http_url("ipfs://Qm123"));
        assert!(!looks_like_http_url("delivered 40 bags of cement"));
    }

    #[test]
    fn test_message_shapes() {
        let with_image = image_messages("prompt", "https://x/y.png");
        let parts = &with_image[0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "https://x/y.png");

        let text_only = text_messages("prompt", "https://x/y.png", true);
        let body = text_only[0]["content"].as_str().unwrap();
        assert!(body.contains("may not be an image"));
        assert!(body.contains("https://x/y.png"));

        let free_text = text_messages("prompt", "work done", false);
        assert!(free_text[0]["content"]
            .as_str()
            .unwrap()
            .contains("work done"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_judge_rejects_when_backend_unreachable() {
        let client = JudgmentClient::new(
            "http://127.0.0.1:9".to_string(),
            "test-key".to_string(),
            "test-model".to_string(),
        );
        let item = BudgetItem {
            id: U256::from(1u64),
            amount_wei: U256::from(1_000_000_000_000_000_000u128),
            verified: false,
        };
        let verdict = client.judge(&item, "https://proofs.example/1.png").await;
        assert!(!verdict.approved);
        assert!(verdict.rationale.contains("failed"));
    }
}
