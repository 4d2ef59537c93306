// File: generalization.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::{AnomalyPolicy, FuzzConfig};
use crate::error::{FuzzResult, TransportError};
use crate::synthesizer::SynthesizedCase;
use crate::transcript::{unescape_bytes, SENDING_MARKER};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const RESULTS_FILE_NAME: &str = "generalization_results.json";
pub const ERROR_TAG: &str = "ERROR";

static GENERATED_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"generated case #(\d+)(?: \(length (\d+)\))?").unwrap());

static TRANSMITTED_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"bytes:\s+(b["'].*["'])\s*$"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplayStatus {
    Code(u16),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralizationResult {
    pub index: usize,
    pub payload: String,
    pub status_code: ReplayStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_time: Option<f64>,
    pub suspicious: bool,
}

impl GeneralizationResult {
    pub fn from_status(index: usize, payload: &str, status: u16, elapsed: Duration, policy: &AnomalyPolicy) -> Self {
        Self {
            index,
            payload: payload.to_string(),
            status_code: ReplayStatus::Code(status),
            error: None,
            response_time: Some((elapsed.as_secs_f64() * 1000.0).round() / 1000.0),
            suspicious: policy.is_suspicious(status),
        }
    }

    pub fn from_error(index: usize, payload: &str, error: &TransportError) -> Self {
        Self {
            index,
            payload: payload.to_string(),
            status_code: ReplayStatus::Error(ERROR_TAG.to_string()),
            error: Some(error.to_string()),
            response_time: None,
            suspicious: true,
        }
    }
}

pub struct GeneralizationTester {
    client: reqwest::Client,
    timeout: Duration,
    policy: AnomalyPolicy,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    quiet: bool,
}

impl GeneralizationTester {
    pub fn new(config: &FuzzConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let rate = NonZeroU32::new(config.rate_limit()).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            timeout: config.replay_timeout(),
            policy: config.anomaly_policy(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
            quiet: config.quiet(),
        })
    }

    /// Replays every case in order; one result per case, failures included.
    pub async fn test(&self, target: &str, port: u16, cases: &[SynthesizedCase]) -> Vec<GeneralizationResult> {
        let url = format!("http://{}:{}", target, port);
        info!(
            "Starting generalization test with {} payloads on {}...",
            cases.len(),
            url
        );

        let pb = self.progress_bar(cases.len() as u64);
        let mut results = Vec::with_capacity(cases.len());

        for case in cases {
            self.rate_limiter.until_ready().await;
            let result = self.replay(&url, case).await;
            debug!(
                "Case #{} -> {:?} (suspicious: {})",
                result.index, result.status_code, result.suspicious
            );
            results.push(result);
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            "Generalization test completed. {} suspicious responses detected out of {}.",
            suspicious_count(&results),
            results.len()
        );
        results
    }

    async fn replay(&self, url: &str, case: &SynthesizedCase) -> GeneralizationResult {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .body(case.request.clone())
            .timeout(self.timeout)
            .send()
            .await;

        match response {
            Ok(resp) => GeneralizationResult::from_status(
                case.index,
                &case.request,
                resp.status().as_u16(),
                start.elapsed(),
                &self.policy,
            ),
            Err(e) => GeneralizationResult::from_error(case.index, &case.request, &TransportError::from(e)),
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
        ) {
            pb.set_style(
                style
                    .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
                        let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                    })
                    .progress_chars("█▉▊▋▌▍▎▏  "),
            );
        }
        pb
    }
}

pub fn suspicious_count(results: &[GeneralizationResult]) -> usize {
    results.iter().filter(|r| r.suspicious).count()
}

/// Rebuilds cases from a synthesized-case log. Blocks without a decodable
/// request are skipped with a warning.
pub fn parse_case_log(content: &str) -> Vec<SynthesizedCase> {
    let mut cases = Vec::new();
    let mut header: Option<(usize, Option<usize>)> = None;

    for (line_no, line) in content.lines().enumerate() {
        if line.contains(SENDING_MARKER) {
            header = GENERATED_CASE.captures(line).map(|caps| {
                (
                    caps[1].parse().unwrap_or(cases.len()),
                    caps.get(2).and_then(|m| m.as_str().parse().ok()),
                )
            });
            continue;
        }

        let Some((index, target_length)) = header else {
            continue;
        };
        let Some(caps) = TRANSMITTED_LITERAL.captures(line) else {
            continue;
        };

        match unescape_bytes(&caps[1]) {
            Some(bytes) => {
                let request = String::from_utf8_lossy(&bytes).to_string();
                let payload = request
                    .split_whitespace()
                    .nth(1)
                    .map(|p| p.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                cases.push(SynthesizedCase {
                    index,
                    target_length: target_length.unwrap_or(payload.len()),
                    byte_length: bytes.len(),
                    payload,
                    request,
                });
            }
            None => warn!("Line {}: failed to decode generated case", line_no + 1),
        }
        header = None;
    }
    cases
}

pub async fn load_cases<P: AsRef<Path>>(path: P) -> Vec<SynthesizedCase> {
    let path = path.as_ref();
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_case_log(&content),
        Err(e) => {
            warn!("Generated case file {} not readable: {}", path.display(), e);
            Vec::new()
        }
    }
}

pub async fn save_results<P: AsRef<Path>>(path: P, results: &[GeneralizationResult]) -> FuzzResult<()> {
    let json = serde_json::to_string_pretty(results)?;
    tokio::fs::write(path.as_ref(), json).await?;
    info!("Generalization test results saved to {}", path.as_ref().display());
    Ok(())
}
