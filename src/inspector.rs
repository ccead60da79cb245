//! The verification loop.
//!
//! Polls for `ProofUploaded` events past a monotonic block watermark, judges
//! each submission, and approves the ones that pass. Per-item failures are
//! contained: a bad item read, a rejection, or a failed transaction never
//! stops the loop or blocks later events in the same batch.

use crate::contract::{EscrowSource, ProofSubmittedEvent};
use crate::judgment::{format_wei_as_eth, VerdictOracle};
use crate::submitter::ProofApprover;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No unprocessed blocks, or the last range retrieval failed and will be
    /// retried from the same watermark.
    Idle,
    /// At least one event was drained this iteration.
    Draining,
}

pub struct Inspector<S, O, A> {
    source: S,
    oracle: O,
    approver: A,
    /// Highest block whose events have been fully retrieved. Only advances
    /// after a successful range retrieval, so a failed range is re-scanned.
    last_processed_block: u64,
    poll_interval: Duration,
}

impl<S, O, A> Inspector<S, O, A>
where
    S: EscrowSource,
    O: VerdictOracle,
    A: ProofApprover,
{
    pub fn new(
        source: S,
        oracle: O,
        approver: A,
        start_block: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            oracle,
            approver,
            last_processed_block: start_block,
            poll_interval,
        }
    }

    pub fn last_processed_block(&self) -> u64 {
        self.last_processed_block
    }

    pub async fn run(mut self) {
        tracing::info!(
            "[WATCH] watching from block {} every {}ms",
            self.last_processed_block,
            self.poll_interval.as_millis()
        );
        loop {
            self.tick().await;
            sleep(self.poll_interval).await;
        }
    }

    pub async fn tick(&mut self) -> LoopState {
        let head = match self.source.latest_block().await {
            Ok(head) => head,
            Err(e) => {
                tracing::warn!("[WATCH] head lookup failed, retrying next poll: {e}");
                return LoopState::Idle;
            }
        };
        if head <= self.last_processed_block {
            return LoopState::Idle;
        }

        let from = self.last_processed_block + 1;
        let events = match self.source.proof_events(from, head).await {
            Ok(events) => events,
            Err(e) => {
                // Watermark stays put; this range is re-scanned next tick.
                tracing::warn!("[WATCH] blocks {from}..={head} not processed, will retry: {e}");
                return LoopState::Idle;
            }
        };

        let drained = !events.is_empty();
        for event in &events {
            self.process_event(event).await;
        }
        self.last_processed_block = head;

        if drained {
            LoopState::Draining
        } else {
            LoopState::Idle
        }
    }

    async fn process_event(&self, event: &ProofSubmittedEvent) {
        tracing::info!(
            "[ALERT] proof submitted for item {} in block {}: {}",
            event.item_id,
            event.block_number,
            event.proof_reference
        );

        let item = match self.source.read_item(event.item_id).await {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(
                    "[WATCH] could not read item {}, skipping this submission: {e}",
                    event.item_id
                );
                return;
            }
        };

        if item.verified {
            tracing::info!("[WATCH] item {} is already verified, skipping", item.id);
            return;
        }
        if item.amount_wei.is_zero() {
            tracing::warn!("[WARN] item {} has a zero amount", item.id);
        }

        let verdict = self.oracle.judge(&item, &event.proof_reference).await;
        tracing::info!(
            "[AI] item {} ({} ETH) approved={}: {}",
            item.id,
            format_wei_as_eth(item.amount_wei),
            verdict.approved,
            verdict.rationale
        );
        if !verdict.approved {
            return;
        }

        match self.approver.approve_item(item.id).await {
            Ok(hash) => {
                tracing::info!("[TX] item {} verified on-chain: {hash:#x}", item.id);
            }
            Err(e) => {
                // The item stays unverified; a re-submitted proof retriggers it.
                tracing::error!("[TX] approval failed for item {}: {e}", item.id);
            }
        }
    }
}
