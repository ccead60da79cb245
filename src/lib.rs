//! Escrow inspector library surface.
//!
//! The operator workflow is the single `escrow-inspector` binary: poll a
//! `BudgetEscrow` contract for `ProofUploaded` events, obtain a verdict from an
//! external judgment service, and record approvals on-chain via `verifyProof`.

pub mod chain;
pub mod contract;
pub mod error;
pub mod fees;
pub mod inspector;
pub mod judgment;
pub mod submitter;
pub mod utils;
