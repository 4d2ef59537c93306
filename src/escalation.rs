// File: escalation.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::{MAX_DEPTH, MIN_DEPTH};
use crate::error::FuzzResult;
use crate::mutator::HttpMethod;
use crate::parser::{AnomalousSession, TranscriptParser};
use crate::runner::SessionRunner;
use futures::future::BoxFuture;
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EscalationState {
    Idle,
    Running { depth: u8 },
    Stopped { depth: u8 },
    Exhausted { max_depth: u8 },
    Cancelled { depth: u8 },
}

impl EscalationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscalationState::Stopped { .. }
                | EscalationState::Exhausted { .. }
                | EscalationState::Cancelled { .. }
        )
    }
}

/// One fuzz round at a given depth: run a session and extract anomalies.
pub trait DepthRound: Send {
    fn run_round(&mut self, depth: u8) -> BoxFuture<'_, FuzzResult<Vec<AnomalousSession>>>;
}

#[derive(Debug, Clone)]
pub struct EscalationOutcome {
    pub state: EscalationState,
    pub rounds: u8,
    pub anomalies: Vec<AnomalousSession>,
}

pub struct DepthController {
    max_depth: u8,
    state: EscalationState,
    cancel: Arc<AtomicBool>,
}

impl DepthController {
    pub fn new(max_depth: u8) -> Self {
        Self {
            max_depth: max_depth.clamp(MIN_DEPTH, MAX_DEPTH),
            state: EscalationState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    pub fn state(&self) -> &EscalationState {
        &self.state
    }

    /// Setting the flag stops further depth levels; the running round is
    /// allowed to finish.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn run<R: DepthRound>(&mut self, round: &mut R) -> EscalationOutcome {
        let mut rounds = 0u8;

        for depth in MIN_DEPTH..=self.max_depth {
            if self.cancel.load(Ordering::SeqCst) {
                info!("Fuzzing cancelled before depth {}", depth);
                self.state = EscalationState::Cancelled { depth };
                return self.outcome(rounds, Vec::new());
            }

            self.state = EscalationState::Running { depth };
            info!("Starting fuzz test at depth {}...", depth);
            rounds += 1;

            match round.run_round(depth).await {
                Ok(anomalies) if !anomalies.is_empty() => {
                    info!(
                        "{} anomalies found at depth {}, stopping further fuzzing.",
                        anomalies.len(),
                        depth
                    );
                    self.state = EscalationState::Stopped { depth };
                    return self.outcome(rounds, anomalies);
                }
                Ok(_) => info!("No anomalies found at depth {}.", depth),
                Err(e) => warn!("Fuzz session at depth {} aborted: {}", depth, e),
            }
        }

        self.state = EscalationState::Exhausted {
            max_depth: self.max_depth,
        };
        self.outcome(rounds, Vec::new())
    }

    fn outcome(&self, rounds: u8, anomalies: Vec<AnomalousSession>) -> EscalationOutcome {
        EscalationOutcome {
            state: self.state.clone(),
            rounds,
            anomalies,
        }
    }
}

/// Live round: a [`SessionRunner`] session followed by a transcript parse.
pub struct LiveRound<'a> {
    runner: &'a SessionRunner,
    target: String,
    port: u16,
    methods: Vec<HttpMethod>,
    last_log: Option<PathBuf>,
}

impl<'a> LiveRound<'a> {
    pub fn new(runner: &'a SessionRunner, target: &str, port: u16, methods: &[HttpMethod]) -> Self {
        Self {
            runner,
            target: target.to_string(),
            port,
            methods: methods.to_vec(),
            last_log: None,
        }
    }

    pub fn last_log(&self) -> Option<&PathBuf> {
        self.last_log.as_ref()
    }
}

impl DepthRound for LiveRound<'_> {
    fn run_round(&mut self, depth: u8) -> BoxFuture<'_, FuzzResult<Vec<AnomalousSession>>> {
        Box::pin(async move {
            let path = self
                .runner
                .run(&self.target, self.port, depth, &self.methods)
                .await?;
            let anomalies = TranscriptParser::parse_file(&path).await;
            self.last_log = Some(path);
            Ok(anomalies)
        })
    }
}
