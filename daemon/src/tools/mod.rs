// SPDX-License-Identifier: MIT
//! Static-tool harness — spawn external analyzers, parse output, normalize
//! findings into [`Issue`]s.
//!
//! Supported tools: `eslint`, `semgrep`, `ruff`, `bandit`, `gosec`,
//! `staticcheck`, `go vet`. Every runner is best-effort: a missing binary,
//! a timeout, or unparseable output produces a failed [`ToolResult`] with
//! zero issues and never aborts the review.

pub mod eslint;
pub mod golang;
pub mod python;
pub mod semgrep;

use crate::review::model::{Issue, Severity};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Maximum captured output size (1 MiB). Prevents OOM from runaway tools.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Default per-tool execution timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub enable_eslint: bool,
    pub enable_semgrep: bool,
    pub enable_ruff: bool,
    pub enable_bandit: bool,
    pub enable_gosec: bool,
    pub enable_staticcheck: bool,
    /// Semgrep ruleset (`--config`), `"auto"` by default.
    pub semgrep_rules: String,
    /// Semgrep's own `--timeout`, seconds.
    pub semgrep_timeout: u64,
    /// Harness-side timeout applied to every tool invocation.
    pub timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enable_eslint: true,
            enable_semgrep: true,
            enable_ruff: true,
            enable_bandit: true,
            enable_gosec: true,
            enable_staticcheck: true,
            semgrep_rules: "auto".to_string(),
            semgrep_timeout: 300,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

// ─── Results & capability ─────────────────────────────────────────────────────

/// The outcome of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    pub issues: Vec<Issue>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn not_installed(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            issues: Vec::new(),
            error: Some(format!("{tool} not installed")),
            duration_ms: 0,
        }
    }

    pub fn failed(tool: &str, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            issues: Vec::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn ok(tool: &str, issues: Vec<Issue>, duration_ms: u64) -> Self {
        Self {
            tool: tool.to_string(),
            success: true,
            issues,
            error: None,
            duration_ms,
        }
    }
}

/// A single external analyzer.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    fn name(&self) -> &'static str;

    /// File extensions this tool analyzes; the harness skips the tool when
    /// no changed file matches.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether the tool binary is on `PATH`.
    fn is_available(&self) -> bool;

    /// Run against `files` (paths relative to `workdir`).
    async fn run(&self, files: &[String], workdir: &Path) -> ToolResult;
}

/// Build the runner set for `config`, tool toggles applied.
pub fn enabled_runners(config: &ToolsConfig) -> Vec<Box<dyn ToolRunner>> {
    let mut runners: Vec<Box<dyn ToolRunner>> = Vec::new();
    if config.enable_eslint {
        runners.push(Box::new(eslint::Eslint::new(config)));
    }
    if config.enable_semgrep {
        runners.push(Box::new(semgrep::Semgrep::new(config)));
    }
    if config.enable_ruff {
        runners.push(Box::new(python::Ruff::new(config)));
    }
    if config.enable_bandit {
        runners.push(Box::new(python::Bandit::new(config)));
    }
    if config.enable_gosec {
        runners.push(Box::new(golang::Gosec::new(config)));
    }
    if config.enable_staticcheck {
        runners.push(Box::new(golang::Staticcheck::new(config)));
    }
    // go vet ships with the go toolchain; it has no separate toggle.
    runners.push(Box::new(golang::GoVet::new(config)));
    runners
}

/// Run every applicable tool in parallel and collect the per-tool results.
/// Partial failure is the expected case; nothing here aborts the caller.
pub async fn run_all(
    runners: &[Box<dyn ToolRunner>],
    files: &[String],
    workdir: &Path,
) -> Vec<ToolResult> {
    let futures = runners.iter().filter_map(|runner| {
        let relevant: Vec<String> = files
            .iter()
            .filter(|f| matches_extension(f, runner.extensions()))
            .cloned()
            .collect();
        if relevant.is_empty() {
            debug!(tool = runner.name(), "no matching files — skipping");
            return None;
        }
        if !runner.is_available() {
            return Some(Either::Ready(ToolResult::not_installed(runner.name())));
        }
        Some(Either::Run(async move { runner.run(&relevant, workdir).await }))
    });

    let mut results = Vec::new();
    let mut pending = Vec::new();
    for item in futures {
        match item {
            Either::Ready(r) => results.push(r),
            Either::Run(fut) => pending.push(fut),
        }
    }
    results.extend(futures::future::join_all(pending).await);
    results
}

enum Either<F> {
    Ready(ToolResult),
    Run(F),
}

fn matches_extension(path: &str, extensions: &[&str]) -> bool {
    let ext = path.rsplit('.').next().unwrap_or_default();
    extensions.iter().any(|e| *e == ext)
}

// ─── Shared helpers ───────────────────────────────────────────────────────────

/// Whether `binary` resolves on `PATH` to an executable file.
pub(crate) fn binary_on_path(binary: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(binary).is_file())
}

/// What happened when we tried to run a tool process.
pub(crate) enum Spawned {
    /// Process ran to completion (any exit code).
    Done {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    TimedOut,
    Failed(String),
}

/// Spawn `binary args…` in `workdir` with `timeout`, capturing both output
/// channels truncated to [`MAX_OUTPUT_BYTES`].
pub(crate) async fn spawn_tool(
    binary: &str,
    args: &[String],
    workdir: &Path,
    timeout: Duration,
) -> Spawned {
    let run = tokio::time::timeout(
        timeout,
        Command::new(binary)
            .args(args)
            .current_dir(workdir)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match run {
        Ok(Ok(output)) => Spawned::Done {
            stdout: truncate_output(&output.stdout),
            stderr: truncate_output(&output.stderr),
            exit_code: output.status.code(),
        },
        Ok(Err(e)) => Spawned::Failed(format!("spawn error: {e}")),
        Err(_) => Spawned::TimedOut,
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    if bytes.len() > MAX_OUTPUT_BYTES {
        warn!(bytes = bytes.len(), "truncating oversized tool output");
        String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).into_owned()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Finish a tool run: tolerate non-zero exit codes when findings parsed
/// (analyzers routinely exit 1 when they find something), validate each
/// issue, and drop the invalid ones silently.
pub(crate) fn finish(
    tool: &str,
    issues: Vec<Issue>,
    exit_code: Option<i32>,
    stderr: &str,
    started: Instant,
) -> ToolResult {
    let duration_ms = started.elapsed().as_millis() as u64;
    let issues = retain_valid(issues);

    let exited_clean = exit_code.map(|c| c <= 1).unwrap_or(false);
    if !exited_clean && issues.is_empty() {
        let preview: String = stderr.chars().take(512).collect();
        warn!(tool, code = ?exit_code, stderr = %preview, "tool exited with error");
        return ToolResult::failed(tool, format!("exit code {exit_code:?}: {preview}"), duration_ms);
    }

    ToolResult::ok(tool, issues, duration_ms)
}

pub(crate) fn retain_valid(issues: Vec<Issue>) -> Vec<Issue> {
    issues
        .into_iter()
        .filter(|i| match i.validate() {
            Ok(()) => true,
            Err(reason) => {
                debug!(%reason, tool = ?i.source_tool, "dropping invalid issue");
                false
            }
        })
        .collect()
}

/// Map the `HIGH`/`MEDIUM`/`LOW` severity scale used by bandit and gosec.
pub(crate) fn severity_from_hml(s: &str) -> Severity {
    match s.to_ascii_uppercase().as_str() {
        "HIGH" => Severity::High,
        "MEDIUM" => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Map the `HIGH`/`MEDIUM`/`LOW` confidence scale used by bandit and gosec.
pub(crate) fn confidence_from_hml(s: &str) -> f64 {
    match s.to_ascii_uppercase().as_str() {
        "HIGH" => 0.9,
        "MEDIUM" => 0.7,
        _ => 0.5,
    }
}

/// Make a tool-reported path relative to the sandbox root.
pub(crate) fn relative_path(raw: &str, workdir: &Path) -> String {
    Path::new(raw)
        .strip_prefix(workdir)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| raw.trim_start_matches("./").to_string())
}
