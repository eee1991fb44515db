// SPDX-License-Identifier: MIT
//! Review orchestrator — drives one job from PR reference to posted review.
//!
//! Per-job state progression: fetch PR → check run → fetch diff → parse →
//! categorize → fan out (static tools ∥ vulnerability scan) → retrieve
//! context → LLM chunks (sequential) → aggregate → score → post. Every
//! evidence source is best-effort; the only fatal failures are the diff
//! fetch/parse and the review post. A failure before posting never
//! publishes a partial review.

use crate::diff::chunker::{chunk_files, Chunk, ChunkerConfig};
use crate::diff::filter::{FileFilter, FilterConfig, Partitioned, MANIFESTS};
use crate::diff::{parser, ChangeKind};
use crate::forge::{
    CheckOutcome, ForgeClient, InlineComment, PrDetails, PrRef, ReviewEvent, ReviewSubmission,
};
use crate::llm::{LlmProvider, RagContext};
use crate::queue::ReviewJob;
use crate::review::aggregate::{aggregate, AggregateConfig, Aggregated};
use crate::review::model::{Issue, PrInfo, ReviewOutput, ReviewStats};
use crate::review::risk::{assess, RiskAssessment, RiskConfig, RiskLevel};
use crate::tools::{self, ToolsConfig};
use crate::vuln::{self, OsvClient, VulnConfig};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Files materialized into the analysis sandbox, at most.
const MAX_SANDBOX_FILES: usize = 100;
/// Per-document cap for retrieved repository context.
const MAX_CONTEXT_CHARS: usize = 4000;
/// Posted review body cap.
const MAX_SUMMARY_CHARS: usize = 4000;
/// Executive summary cap.
const MAX_EXEC_CHARS: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub filter: FilterConfig,
    pub chunker: ChunkerConfig,
    pub aggregate: AggregateConfig,
    pub risk: RiskConfig,
    pub tools: ToolsConfig,
    pub vuln: VulnConfig,
}

/// Terminal result of one job run.
#[derive(Debug)]
pub struct ReviewRunResult {
    pub success: bool,
    pub output: Option<ReviewOutput>,
    pub error: Option<String>,
}

pub struct Orchestrator {
    forge: Arc<dyn ForgeClient>,
    llm: Arc<dyn LlmProvider>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        forge: Arc<dyn ForgeClient>,
        llm: Arc<dyn LlmProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { forge, llm, config }
    }

    pub async fn run(&self, job: &ReviewJob) -> ReviewRunResult {
        let request_id = job.request_id.clone().unwrap_or_default();
        info!(job_id = %job.id, request_id = %request_id, owner = %job.owner, repo = %job.repo, pr = job.pr_number, "review started");

        match self.run_inner(job).await {
            Ok(output) => {
                info!(
                    job_id = %job.id,
                    request_id = %request_id,
                    risk_score = output.risk_score,
                    issues = output.stats.issues_found,
                    latency_ms = output.stats.latency_ms,
                    "review posted"
                );
                ReviewRunResult {
                    success: true,
                    output: Some(output),
                    error: None,
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, request_id = %request_id, err = %format!("{e:#}"), "review failed");
                ReviewRunResult {
                    success: false,
                    output: None,
                    error: Some(format!("{e:#}")),
                }
            }
        }
    }

    async fn run_inner(&self, job: &ReviewJob) -> Result<ReviewOutput> {
        let started = Instant::now();
        let pr = PrRef {
            owner: job.owner.clone(),
            repo: job.repo.clone(),
            number: job.pr_number,
            installation_id: job.installation_id,
        };

        let details = self.forge.fetch_pr(&pr).await.context("fetching PR")?;
        let commit_id = if job.sha.is_empty() {
            details.head_sha.clone()
        } else {
            job.sha.clone()
        };

        let check_run_id = match self.forge.create_check_run(&pr, &commit_id).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(job_id = %job.id, err = %e, "check run creation failed — continuing");
                None
            }
        };

        let diff_text = self.forge.fetch_diff(&pr).await.context("fetching diff")?;
        let diff = parser::parse(&diff_text).context("parsing diff")?;
        let files_changed = diff.files.len();
        let (lines_added, lines_removed) = (diff.total_lines_added, diff.total_lines_removed);

        let filter = FileFilter::new(&self.config.filter).context("building file filter")?;
        let parts = filter.partition(diff.files);
        info!(
            job_id = %job.id,
            source = parts.source.len(),
            lockfiles = parts.lockfiles.len(),
            excluded = parts.excluded.len(),
            "files categorized"
        );

        let no_reviewable = parts.source.is_empty() && parts.lockfiles.is_empty();
        let (issues, tools_run, model_used) = if no_reviewable {
            (Vec::new(), Vec::new(), self.llm.model().to_string())
        } else {
            self.analyze(job, &pr, &commit_id, &details, parts).await?
        };

        let aggregated = aggregate(issues, &self.config.aggregate);
        let assessment = assess(&aggregated.filtered, &self.config.risk);
        let event = select_event(&assessment, aggregated.inline.len());

        let (summary_markdown, exec_summary) = build_summaries(
            &assessment,
            &aggregated,
            files_changed,
            no_reviewable,
            &tools_run,
        );

        let comments: Vec<InlineComment> = aggregated
            .inline
            .iter()
            .map(|issue| InlineComment {
                path: issue.file_path.clone(),
                line: issue.line_end,
                body: comment_body(issue),
            })
            .collect();

        self.forge
            .post_review(
                &pr,
                &ReviewSubmission {
                    commit_id: commit_id.clone(),
                    body: summary_markdown.clone(),
                    event,
                    comments,
                },
            )
            .await
            .context("posting review")?;

        if let Some(check_run_id) = check_run_id {
            let outcome = CheckOutcome {
                success: !assessment.gate_failed,
                title: format!("Risk {}/100 ({})", assessment.score, assessment.level.as_str()),
                summary: exec_summary.clone(),
            };
            if let Err(e) = self.forge.update_check_run(&pr, check_run_id, &outcome).await {
                warn!(job_id = %job.id, err = %e, "check run update failed");
            }
        }

        Ok(ReviewOutput {
            risk_score: assessment.score,
            risk_level: assessment.level,
            inline_comments: aggregated.inline,
            summary_markdown,
            exec_summary,
            stats: ReviewStats {
                files_changed,
                issues_found: aggregated.filtered.len(),
                tools_run,
                model_used,
                latency_ms: started.elapsed().as_millis() as u64,
                lines_added: Some(lines_added),
                lines_removed: Some(lines_removed),
            },
            category_breakdown: Some(assessment.breakdown),
            request_id: job.request_id.clone(),
            completed_at: Some(Utc::now().to_rfc3339()),
            pr_info: Some(PrInfo {
                owner: job.owner.clone(),
                repo: job.repo.clone(),
                number: job.pr_number,
                sha: commit_id,
            }),
        })
    }

    /// The evidence-gathering phases: sandbox + static tools ∥ vulnerability
    /// scan, then context retrieval and sequential LLM chunks.
    async fn analyze(
        &self,
        job: &ReviewJob,
        pr: &PrRef,
        commit_id: &str,
        details: &PrDetails,
        parts: Partitioned,
    ) -> Result<(Vec<Issue>, Vec<String>, String)> {
        let sandbox = tempfile::tempdir().context("creating review sandbox")?;
        let materialized = self
            .materialize_sources(pr, commit_id, &parts)
            .await
            .context("materializing changed files")?;
        for (path, content) in &materialized {
            let full = sandbox.path().join(path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if let Err(e) = tokio::fs::write(&full, content).await {
                debug!(path, err = %e, "failed to write sandbox file");
            }
        }
        let sandbox_paths: Vec<String> = materialized.iter().map(|(p, _)| p.clone()).collect();

        let manifest_files = self.fetch_manifests(pr, commit_id, &parts).await;

        let runners = tools::enabled_runners(&self.config.tools);
        let osv = OsvClient::new(self.config.vuln.api_url.as_str());
        let scan_manifests = self.config.vuln.enabled && !manifest_files.is_empty();
        let (tool_results, vuln_issues) = tokio::join!(
            tools::run_all(&runners, &sandbox_paths, sandbox.path()),
            async {
                if scan_manifests {
                    vuln::scan(&osv, &manifest_files).await
                } else {
                    Vec::new()
                }
            }
        );

        let mut issues: Vec<Issue> = Vec::new();
        let mut tools_run: Vec<String> = Vec::new();
        for result in tool_results {
            if result.success {
                debug!(
                    job_id = %job.id,
                    tool = %result.tool,
                    findings = result.issues.len(),
                    duration_ms = result.duration_ms,
                    "tool completed"
                );
                tools_run.push(result.tool);
                issues.extend(result.issues);
            } else {
                debug!(job_id = %job.id, tool = %result.tool, err = ?result.error, "tool skipped");
            }
        }
        if scan_manifests {
            tools_run.push("osv".to_string());
            issues.extend(vuln_issues);
        }

        let context = self.fetch_context(pr, commit_id).await;

        // LLM chunks run sequentially to respect provider rate limits.
        let chunks: Vec<Chunk> = chunk_files(parts.source, &self.config.chunker);
        let mut model_used = self.llm.model().to_string();
        let mut llm_succeeded = false;
        for chunk in &chunks {
            match self
                .llm
                .analyze(chunk, &context, &details.title, &details.body)
                .await
            {
                Ok(analysis) => {
                    debug!(
                        job_id = %job.id,
                        chunk = chunk.index,
                        findings = analysis.issues.len(),
                        tokens = analysis.tokens_used,
                        "chunk analyzed"
                    );
                    issues.extend(analysis.issues);
                    model_used = analysis.model;
                    llm_succeeded = true;
                }
                Err(e) => {
                    warn!(job_id = %job.id, chunk = chunk.index, err = %e, "llm chunk failed — continuing");
                }
            }
        }
        if llm_succeeded {
            tools_run.push(format!("llm-{}", self.llm.label()));
        }

        tools_run.sort();
        tools_run.dedup();
        Ok((issues, tools_run, model_used))
    }

    /// Fetch the new-side content of reviewable files, capped at
    /// [`MAX_SANDBOX_FILES`]. Fetch failures skip the file.
    async fn materialize_sources(
        &self,
        pr: &PrRef,
        commit_id: &str,
        parts: &Partitioned,
    ) -> Result<Vec<(String, String)>> {
        let candidates: Vec<&str> = parts
            .source
            .iter()
            .filter(|f| f.kind != ChangeKind::Delete && !f.is_binary)
            .map(|f| f.effective_path())
            .collect();
        if candidates.len() > MAX_SANDBOX_FILES {
            warn!(
                total = candidates.len(),
                cap = MAX_SANDBOX_FILES,
                "too many changed files — analyzing the first {MAX_SANDBOX_FILES}"
            );
        }

        let mut out = Vec::new();
        for path in candidates.into_iter().take(MAX_SANDBOX_FILES) {
            match self.forge.fetch_file(pr, path, commit_id).await {
                Ok(Some(content)) => out.push((path.to_string(), content)),
                Ok(None) => debug!(path, "file absent at head — skipping"),
                Err(e) => debug!(path, err = %e, "file fetch failed — skipping"),
            }
        }
        Ok(out)
    }

    /// Contents of every scannable dependency manifest: the lockfile
    /// partition plus manifests that remained in the source set.
    async fn fetch_manifests(
        &self,
        pr: &PrRef,
        commit_id: &str,
        parts: &Partitioned,
    ) -> Vec<(String, String)> {
        let mut paths: Vec<&str> = parts
            .lockfiles
            .iter()
            .map(|f| f.effective_path())
            .collect();
        paths.extend(
            parts
                .source
                .iter()
                .filter(|f| MANIFESTS.contains(&f.file_name()))
                .map(|f| f.effective_path()),
        );

        let mut out = Vec::new();
        for path in paths {
            match self.forge.fetch_file(pr, path, commit_id).await {
                Ok(Some(content)) => out.push((path.to_string(), content)),
                Ok(None) => {}
                Err(e) => debug!(path, err = %e, "manifest fetch failed — skipping"),
            }
        }
        out
    }

    /// Best-effort retrieval of repository documents for the LLM prompt.
    async fn fetch_context(&self, pr: &PrRef, commit_id: &str) -> RagContext {
        let fetch = |path: &'static str| async move {
            match self.forge.fetch_file(pr, path, commit_id).await {
                Ok(Some(content)) => Some(content.chars().take(MAX_CONTEXT_CHARS).collect()),
                _ => None,
            }
        };

        let readme = fetch("README.md").await;
        let contributing = fetch("CONTRIBUTING.md").await;
        let mut lint_config = None;
        for candidate in [".eslintrc.json", "ruff.toml", "pyproject.toml"] {
            if let Ok(Some(content)) = self.forge.fetch_file(pr, candidate, commit_id).await {
                lint_config = Some(content.chars().take(MAX_CONTEXT_CHARS).collect());
                break;
            }
        }

        RagContext {
            readme,
            contributing,
            lint_config,
        }
    }
}

/// Review event for the posted review: critical risk blocks, a clean low
/// score with nothing to say approves, everything else comments.
pub fn select_event(assessment: &RiskAssessment, inline_count: usize) -> ReviewEvent {
    if assessment.level == RiskLevel::Critical {
        ReviewEvent::RequestChanges
    } else if assessment.score < 10 && inline_count == 0 {
        ReviewEvent::Approve
    } else {
        ReviewEvent::Comment
    }
}

fn build_summaries(
    assessment: &RiskAssessment,
    aggregated: &Aggregated,
    files_changed: usize,
    no_reviewable: bool,
    tools_run: &[String],
) -> (String, String) {
    let mut md = String::new();
    md.push_str(&format!(
        "## Automated review\n\n**Risk score: {}/100 ({})**\n\n",
        assessment.score,
        assessment.level.as_str()
    ));

    if aggregated.filtered.is_empty() {
        if no_reviewable {
            md.push_str("No reviewable files in this change.\n");
        } else {
            md.push_str("No issues found.\n");
        }
    } else {
        md.push_str("| Category | Count | Max severity |\n|---|---|---|\n");
        for entry in &assessment.breakdown {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                entry.category.as_str(),
                entry.count,
                entry.max_severity.as_str()
            ));
        }
        let hidden = aggregated.filtered.len().saturating_sub(aggregated.inline.len());
        if hidden > 0 {
            md.push_str(&format!(
                "\n{hidden} further finding(s) were counted toward the score but not commented inline.\n"
            ));
        }
    }
    if !tools_run.is_empty() {
        md.push_str(&format!("\n_Evidence: {}_\n", tools_run.join(", ")));
    }

    let exec = if aggregated.filtered.is_empty() {
        if no_reviewable {
            "No reviewable files in this change.".to_string()
        } else {
            format!(
                "Reviewed {files_changed} file(s); no issues met the reporting threshold."
            )
        }
    } else {
        format!(
            "Reviewed {files_changed} file(s); {} finding(s), risk {}/100 ({}).",
            aggregated.filtered.len(),
            assessment.score,
            assessment.level.as_str()
        )
    };

    (
        truncate_chars(&md, MAX_SUMMARY_CHARS),
        truncate_chars(&exec, MAX_EXEC_CHARS),
    )
}

/// The body of one inline comment.
fn comment_body(issue: &Issue) -> String {
    let mut body = format!(
        "**[{}/{}] {}**\n\n{}",
        issue.severity.as_str(),
        issue.category.as_str(),
        issue.subtype,
        issue.message
    );
    if !issue.evidence.is_empty() {
        body.push_str(&format!("\n\n```\n{}\n```", issue.evidence));
    }
    if let Some(fix) = &issue.suggested_fix {
        body.push_str(&format!("\n\n**Suggested fix:** {fix}"));
    }
    if let Some(cwe) = &issue.cwe {
        body.push_str(&format!("\n\n_{cwe}_"));
    }
    if let Some(tool) = &issue.source_tool {
        body.push_str(&format!("\n\n<sub>source: {tool}</sub>"));
    }
    body
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max.saturating_sub(1)).collect::<String>() + "…"
    }
}
