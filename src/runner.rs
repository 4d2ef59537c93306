// File: runner.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::{AnomalyPolicy, FuzzConfig, FuzzEngine};
use crate::error::{FuzzError, FuzzResult};
use crate::getstate::FuzzState;
use crate::mutator::{FuzzTrial, HttpMethod, RequestMutator};
use crate::rawhttp::send_raw_request;
use crate::transcript::{TranscriptLog, TranscriptRecord};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct TrialContext {
    host: String,
    port: u16,
    timeout: Duration,
    policy: AnomalyPolicy,
    log: Arc<TranscriptLog>,
    state: Arc<FuzzState>,
}

pub struct SessionRunner {
    engine: FuzzEngine,
    config: FuzzConfig,
    output_dir: PathBuf,
    state: Arc<FuzzState>,
}

impl SessionRunner {
    pub fn new(engine: FuzzEngine, config: &FuzzConfig, state: Arc<FuzzState>) -> Self {
        Self {
            engine,
            config: config.clone(),
            output_dir: config.output_dir().to_path_buf(),
            state,
        }
    }

    pub fn with_output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn engine(&self) -> FuzzEngine {
        self.engine
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(self.engine.log_file_name())
    }

    /// Runs one fuzzing session at `depth` and returns the transcript path.
    /// Only failures of the transcript sink are returned as errors.
    pub async fn run(
        &self,
        target: &str,
        port: u16,
        depth: u8,
        methods: &[HttpMethod],
    ) -> FuzzResult<PathBuf> {
        let path = self.log_path();
        let log = Arc::new(TranscriptLog::create(&path).await?);
        let ctx = TrialContext {
            host: target.to_string(),
            port,
            timeout: self.config.trial_timeout(),
            policy: self.config.anomaly_policy(),
            log: Arc::clone(&log),
            state: Arc::clone(&self.state),
        };

        info!(
            "Fuzzing {}:{} with {} engine at depth {} ({} methods)",
            target,
            port,
            self.engine,
            depth,
            methods.len()
        );

        let result = match self.engine {
            FuzzEngine::Structured => self.run_structured(ctx, depth, methods).await,
            FuzzEngine::Property => self.run_property(ctx, depth, methods).await,
        };

        match Arc::try_unwrap(log) {
            Ok(log) => log.close().await?,
            Err(_) => warn!("Transcript {} still shared at session end", path.display()),
        }

        result.map(|_| path)
    }

    async fn run_structured(
        &self,
        ctx: TrialContext,
        depth: u8,
        methods: &[HttpMethod],
    ) -> FuzzResult<()> {
        let mut handles = Vec::new();

        for (idx, method) in methods.iter().copied().enumerate() {
            let ctx = ctx.clone();
            let pause = self.config.trial_pause();
            let mut mutator = match self.config.seed() {
                Some(seed) => RequestMutator::new().with_seed(seed.wrapping_add(idx as u64)),
                None => RequestMutator::new(),
            };

            handles.push(tokio::spawn(async move {
                let trials = mutator.structured_walk(method, depth, &ctx.host);
                debug!("Starting fuzzing for method {} ({} cases)", method, trials.len());
                for trial in trials {
                    execute_trial(&trial, &ctx).await?;
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                }
                debug!("Finished fuzzing for method {}", method);
                Ok::<(), FuzzError>(())
            }));
        }

        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Fuzz task aborted: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => warn!("Fuzz task failed to complete: {}", e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_property(
        &self,
        ctx: TrialContext,
        depth: u8,
        methods: &[HttpMethod],
    ) -> FuzzResult<()> {
        if methods.is_empty() {
            return Ok(());
        }

        let budget = self.config.num_examples() * depth.max(1) as usize;
        let pause = self.config.trial_pause();
        let mut mutator = match self.config.seed() {
            Some(seed) => RequestMutator::new().with_seed(seed),
            None => RequestMutator::new(),
        };

        let pb = if self.config.quiet() {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(budget as u64)
        };
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }

        for _ in 0..budget {
            let trial = mutator.random_trial(methods, depth, &ctx.host);
            execute_trial(&trial, &ctx).await?;
            pb.inc(1);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        pb.finish_and_clear();

        info!("Property fuzzing complete. {} cases tested.", budget);
        Ok(())
    }
}

async fn execute_trial(trial: &FuzzTrial, ctx: &TrialContext) -> FuzzResult<()> {
    let response = send_raw_request(&ctx.host, ctx.port, &trial.payload, ctx.timeout).await;

    let record = match response {
        Ok(resp) if ctx.policy.is_anomalous(resp.status) => {
            ctx.state.add_anomaly();
            info!(
                "Anomaly on {} case #{}: HTTP {} {}",
                trial.method, trial.sequence_id, resp.status, resp.reason
            );
            TranscriptRecord::anomaly(trial, resp.status, &resp.reason)
        }
        Ok(_) => {
            ctx.state.add_normal();
            return Ok(());
        }
        Err(e) => {
            ctx.state.add_exception();
            debug!("Exception on {} case #{}: {}", trial.method, trial.sequence_id, e);
            TranscriptRecord::exception(trial, &e.to_string())
        }
    };

    ctx.log.write_record(&record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TranscriptParser;
    use crate::transcript::Outcome;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn status_server(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 70000];
                    let _ = socket.read(&mut buf).await;
                    let response = format!("{}\r\nConnection: close\r\n\r\n", status_line);
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        port
    }

    fn test_config(dir: &TempDir) -> FuzzConfig {
        let mut config = FuzzConfig::new();
        config.set_output_dir(dir.path());
        config.set_trial_pause(Duration::ZERO);
        config.set_trial_timeout(Duration::from_millis(500));
        config.set_num_examples(5);
        config.set_seed(Some(3));
        config.set_quiet(true);
        config
    }

    #[tokio::test]
    async fn test_healthy_target_writes_no_records() {
        let dir = TempDir::new().unwrap();
        let port = status_server("HTTP/1.1 200 OK").await;
        let state = Arc::new(FuzzState::new());
        let runner = SessionRunner::new(FuzzEngine::Property, &test_config(&dir), Arc::clone(&state));

        let path = runner.run("127.0.0.1", port, 2, &HttpMethod::ALL).await.unwrap();

        assert_eq!(path, dir.path().join("fuzz2.log"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert_eq!(state.trials_sent(), 10);
        assert_eq!(state.normal(), 10);
    }

    #[tokio::test]
    async fn test_server_errors_become_anomaly_records() {
        let dir = TempDir::new().unwrap();
        let port = status_server("HTTP/1.1 500 Internal Server Error").await;
        let state = Arc::new(FuzzState::new());
        let runner = SessionRunner::new(FuzzEngine::Property, &test_config(&dir), Arc::clone(&state));

        let path = runner.run("127.0.0.1", port, 1, &[HttpMethod::Get]).await.unwrap();
        let sessions = TranscriptParser::parse_file(&path).await;

        assert_eq!(sessions.len(), 5);
        assert!(sessions.iter().all(|s| s.classification == Outcome::Anomaly));
        assert_eq!(state.anomalies(), 5);
    }

    #[tokio::test]
    async fn test_refused_connections_become_exception_records() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let state = Arc::new(FuzzState::new());
        let runner = SessionRunner::new(FuzzEngine::Property, &test_config(&dir), Arc::clone(&state));
        let path = runner.run("127.0.0.1", port, 1, &[HttpMethod::Post]).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("[Exception]").count(), 5);
        assert_eq!(state.exceptions(), 5);
    }

    #[tokio::test]
    async fn test_structured_engine_runs_every_method() {
        let dir = TempDir::new().unwrap();
        let port = status_server("HTTP/1.1 502 Bad Gateway").await;
        let state = Arc::new(FuzzState::new());
        let runner = SessionRunner::new(FuzzEngine::Structured, &test_config(&dir), Arc::clone(&state));

        let methods = [HttpMethod::Get, HttpMethod::Post, HttpMethod::Trace];
        let path = runner.run("127.0.0.1", port, 1, &methods).await.unwrap();
        assert_eq!(path, dir.path().join("fuzz.log"));

        let expected: u64 = methods
            .iter()
            .map(|m| RequestMutator::new().structured_walk(*m, 1, "127.0.0.1").len() as u64)
            .sum();
        assert_eq!(state.trials_sent(), expected);

        let sessions = TranscriptParser::parse_file(&path).await;
        assert_eq!(sessions.len() as u64, state.anomalies() + state.exceptions());
        assert!(!sessions.is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_output_dir_fails_session() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();

        let runner = SessionRunner::new(
            FuzzEngine::Property,
            &test_config(&dir),
            Arc::new(FuzzState::new()),
        )
        .with_output_dir(&blocker);
        let result = runner.run("127.0.0.1", 1, 1, &[HttpMethod::Get]).await;
        assert!(matches!(result, Err(FuzzError::LogSinkOpen { .. })));
    }
}
