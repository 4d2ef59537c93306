// File: pipeline.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Per-target orchestration: scan, fingerprint, probe, then escalate
//! fuzzing, synthesize payloads and replay them for every open port.

use crate::config::FuzzConfig;
use crate::escalation::{DepthController, LiveRound};
use crate::generalization::{load_cases, save_results, GeneralizationTester, RESULTS_FILE_NAME};
use crate::getstate::FuzzState;
use crate::mutator::HttpMethod;
use crate::parser::byte_lengths;
use crate::probes::{run_probes, CveDatabase, ProbeTarget, PROBE_TABLE};
use crate::report::{
    target_file_stem, FuzzSummary, PortReport, Report, ReportFormat, ReportGenerator,
    RunStatistics,
};
use crate::runner::SessionRunner;
use crate::scanner::{is_unknown, scan_ports, ServiceFingerprinter};
use crate::synthesizer::{write_cases, PayloadSynthesizer, SynthesisModel};
use anyhow::Context;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const GENERATED_CASES_FILE: &str = "generated_cases.log";

pub struct Pipeline {
    config: FuzzConfig,
    state: Arc<FuzzState>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: FuzzConfig) -> Self {
        Self {
            config,
            state: Arc::new(FuzzState::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &FuzzConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<FuzzState> {
        Arc::clone(&self.state)
    }

    /// Stops after the current depth level; nothing in flight is aborted.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Always yields a report, possibly with empty sections.
    pub async fn run(&self, target: &str) -> Report {
        self.state.mark_start();
        info!("Starting intelligent HTTP vulnerability detection against {}", target);

        let open_ports = scan_ports(target, self.config.ports(), self.config.connect_timeout()).await;
        let mut report = Report::new(target, &open_ports);

        if open_ports.is_empty() {
            warn!("No open HTTP ports found on {}", target);
        } else {
            let cve_db = CveDatabase::load(self.config.cve_database()).await;
            let fingerprinter = ServiceFingerprinter::new(self.config.connect_timeout());

            for &port in &open_ports {
                if self.cancel.load(Ordering::SeqCst) {
                    info!("Run cancelled, skipping remaining ports");
                    break;
                }
                let entry = self.process_port(target, port, &fingerprinter, &cve_db).await;
                report.ports.push(entry);
            }
        }

        self.state.mark_end();
        report.statistics = RunStatistics::from(self.state.as_ref());
        report
    }

    /// Runs the pipeline and writes `<output_dir>/<target>_report.json`.
    pub async fn run_and_save(&self, target: &str) -> anyhow::Result<(Report, PathBuf)> {
        let report = self.run(target).await;
        let path = ReportGenerator::report_path(self.config.output_dir(), target);
        ReportGenerator::generate_report(&report, &path, ReportFormat::Json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!("Report generated: {}", path.display());
        Ok((report, path))
    }

    async fn process_port(
        &self,
        target: &str,
        port: u16,
        fingerprinter: &ServiceFingerprinter,
        cve_db: &CveDatabase,
    ) -> PortReport {
        let service = fingerprinter.detect(target, port).await;
        let mut entry = PortReport::new(port, &service);

        if is_unknown(&service) {
            info!("Port {} service unknown, skipping", port);
            entry.note("service unknown, port skipped");
            return entry;
        }

        entry.cve_list = cve_db.lookup(&service);

        match ProbeTarget::new(target, port, self.config.replay_timeout()) {
            Ok(probe_target) => {
                entry.vulnerabilities = run_probes(PROBE_TABLE, &probe_target, &service).await;
            }
            Err(e) => {
                warn!("Vulnerability probes unavailable for port {}: {}", port, e);
                entry.note(format!("probes unavailable: {}", e));
            }
        }

        if !entry.vulnerabilities.is_empty() {
            entry.note("known vulnerability found, fuzzing skipped");
            return entry;
        }

        info!("Port {} no common vulnerabilities found, performing fuzz testing", port);
        self.fuzz_port(target, port, &mut entry).await;
        entry
    }

    async fn fuzz_port(&self, target: &str, port: u16, entry: &mut PortReport) {
        let Some(engine) = self.config.engine() else {
            warn!("Invalid fuzzing engine selection. Skipping fuzzing.");
            entry.note("no fuzzing engine selected, fuzzing skipped");
            return;
        };

        let stem = format!("{}_{}", target_file_stem(target), port);
        let runner = SessionRunner::new(engine, &self.config, self.state())
            .with_output_dir(self.config.output_dir().join(&stem));
        let mut controller =
            DepthController::new(self.config.max_depth()).with_cancel(self.cancel_handle());
        let mut round = LiveRound::new(&runner, target, port, &HttpMethod::ALL);

        let outcome = controller.run(&mut round).await;
        let lengths = byte_lengths(&outcome.anomalies);
        entry.fuzz = Some(FuzzSummary {
            engine: engine.to_string(),
            state: outcome.state,
            rounds: outcome.rounds,
            anomaly_lengths: lengths.clone(),
            transcript: round.last_log().cloned(),
        });

        if lengths.is_empty() {
            info!("No anomaly cases found, skipping payload synthesis");
            entry.note("no anomalies, payload synthesis skipped");
            return;
        }

        let Some(model) = SynthesisModel::for_strategy(self.config.generation(), self.config.seed())
        else {
            info!("Raw fuzzing only. Skipping payload synthesis.");
            return;
        };

        let mut synthesizer = PayloadSynthesizer::new(model, self.config.seed());
        let cases = synthesizer.synthesize(&lengths, self.config.num_cases());
        let case_log = self.config.generated_dir().join(&stem).join(GENERATED_CASES_FILE);

        let written = match write_cases(&case_log, &cases).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Generated case file not written: {}", e);
                entry.note(format!("generated cases not written: {}", e));
                entry.synthesized_cases = cases;
                return;
            }
        };
        entry.synthesized_cases = cases;

        let tester = match GeneralizationTester::new(&self.config) {
            Ok(tester) => tester,
            Err(e) => {
                warn!("Generalization testing unavailable: {}", e);
                entry.note(format!("generalization testing unavailable: {}", e));
                return;
            }
        };

        info!("Running generalization testing on generated fuzz cases...");
        let replay_cases = load_cases(&written).await;
        let results = tester.test(target, port, &replay_cases).await;

        let results_path = written
            .parent()
            .map(|dir| dir.join(RESULTS_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(RESULTS_FILE_NAME));
        if let Err(e) = save_results(&results_path, &results).await {
            warn!("Generalization results not saved: {}", e);
        }
        entry.generalization = results;
    }
}
