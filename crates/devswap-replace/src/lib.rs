//! Pod replacement controller for devswap
//!
//! Substitutes a running Deployment or bare Pod with a development
//! replacement Deployment and restores it again:
//! - `replace` plans persistence, creates `{workload}-devspace` and
//!   neutralises the parent (scale to zero, or delete a bare Pod)
//! - `revert` restores the parent from the record kept on the replacement
//!   and deletes the replacement
//! - `sync` adopts a replacement left by an earlier process
//!
//! Every cluster call goes through [`ReplaceKubeClient`] and honours a
//! cancellation token.

#![deny(missing_docs)]

mod client;
mod controller;
mod replacement;

pub use client::{KubeReplaceClient, ReplaceKubeClient};
pub use controller::{ReplaceController, ReplacePhase};
pub use replacement::{build_replacement, config_hash, ParentWorkload, ReplacementRecord};

#[cfg(test)]
pub use client::MockReplaceKubeClient;
