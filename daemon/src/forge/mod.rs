// SPDX-License-Identifier: MIT
//! Forge capability — the source-control REST surface the orchestrator
//! consumes: PR metadata, diffs, file contents, posted reviews, and check
//! runs. One concrete implementation ([`github::GithubClient`]) talks to
//! the GitHub App API; tests substitute stubs.

pub mod github;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Coordinates of the PR a job operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub installation_id: u64,
}

/// PR metadata needed by the review pipeline.
#[derive(Debug, Clone, Default)]
pub struct PrDetails {
    pub title: String,
    pub body: String,
    pub head_sha: String,
    pub draft: bool,
    pub changed_files: u64,
}

/// The review event posted back to the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewEvent {
    Approve,
    Comment,
    RequestChanges,
}

impl ReviewEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewEvent::Approve => "APPROVE",
            ReviewEvent::Comment => "COMMENT",
            ReviewEvent::RequestChanges => "REQUEST_CHANGES",
        }
    }
}

/// One inline comment anchored to the new side of the diff.
#[derive(Debug, Clone)]
pub struct InlineComment {
    pub path: String,
    pub line: u32,
    pub body: String,
}

/// A complete review submission.
#[derive(Debug, Clone)]
pub struct ReviewSubmission {
    pub commit_id: String,
    pub body: String,
    pub event: ReviewEvent,
    pub comments: Vec<InlineComment>,
}

/// Terminal state reported to the check run.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub success: bool,
    pub title: String,
    pub summary: String,
}

#[async_trait]
pub trait ForgeClient: Send + Sync {
    async fn fetch_pr(&self, pr: &PrRef) -> Result<PrDetails>;

    /// The PR's unified diff (the forge's `diff` media type).
    async fn fetch_diff(&self, pr: &PrRef) -> Result<String>;

    /// A file's decoded content at `git_ref`, or `None` when absent.
    async fn fetch_file(&self, pr: &PrRef, path: &str, git_ref: &str) -> Result<Option<String>>;

    async fn post_review(&self, pr: &PrRef, review: &ReviewSubmission) -> Result<()>;

    /// Create an `in_progress` check run; returns its id. Best-effort —
    /// callers tolerate `Err`.
    async fn create_check_run(&self, pr: &PrRef, head_sha: &str) -> Result<u64>;

    async fn update_check_run(
        &self,
        pr: &PrRef,
        check_run_id: u64,
        outcome: &CheckOutcome,
    ) -> Result<()>;
}
