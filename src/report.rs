// File: report.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::FuzzResult;
use crate::escalation::EscalationState;
use crate::generalization::{suspicious_count, GeneralizationResult};
use crate::getstate::FuzzState;
use crate::probes::CveRecord;
use crate::synthesizer::SynthesizedCase;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct FuzzSummary {
    pub engine: String,
    pub state: EscalationState,
    pub rounds: u8,
    pub anomaly_lengths: Vec<usize>,
    pub transcript: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PortReport {
    pub port: u16,
    pub service: String,
    pub cve_list: Vec<CveRecord>,
    pub vulnerabilities: Vec<String>,
    pub fuzz: Option<FuzzSummary>,
    pub synthesized_cases: Vec<SynthesizedCase>,
    pub generalization: Vec<GeneralizationResult>,
    /// Stages that were skipped and why.
    pub notes: Vec<String>,
}

impl PortReport {
    pub fn new(port: u16, service: &str) -> Self {
        Self {
            port,
            service: service.to_string(),
            ..Default::default()
        }
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatistics {
    pub trials_sent: u64,
    pub normal: u64,
    pub anomalies: u64,
    pub exceptions: u64,
    pub duration_ms: u64,
}

impl From<&FuzzState> for RunStatistics {
    fn from(state: &FuzzState) -> Self {
        Self {
            trials_sent: state.trials_sent(),
            normal: state.normal(),
            anomalies: state.anomalies(),
            exceptions: state.exceptions(),
            duration_ms: state.duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub target: String,
    pub generated_at: DateTime<Utc>,
    pub open_ports: Vec<u16>,
    pub ports: Vec<PortReport>,
    pub statistics: RunStatistics,
}

impl Report {
    pub fn new(target: &str, open_ports: &[u16]) -> Self {
        Self {
            target: target.to_string(),
            generated_at: Utc::now(),
            open_ports: open_ports.to_vec(),
            ports: Vec::new(),
            statistics: RunStatistics::default(),
        }
    }
}

/// Target address usable as a file name component.
pub fn target_file_stem(target: &str) -> String {
    target
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

pub struct ReportGenerator;

impl ReportGenerator {
    /// `<output_dir>/<target>_report.json`, with path separators in the
    /// target replaced.
    pub fn report_path<P: AsRef<Path>>(output_dir: P, target: &str) -> PathBuf {
        output_dir
            .as_ref()
            .join(format!("{}_report.json", target_file_stem(target)))
    }

    pub fn generate_report<P: AsRef<Path>>(
        report: &Report,
        output_path: P,
        format: ReportFormat,
    ) -> FuzzResult<()> {
        let output_path = output_path.as_ref();
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        match format {
            ReportFormat::Text => Self::generate_text_report(report, output_path),
            ReportFormat::Json => Self::generate_json_report(report, output_path),
        }
    }

    pub fn generate_json_report(report: &Report, output_path: &Path) -> FuzzResult<()> {
        let json = serde_json::to_string_pretty(report)?;
        let mut file = File::create(output_path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    pub fn generate_text_report(report: &Report, output_path: &Path) -> FuzzResult<()> {
        let mut file = File::create(output_path)?;
        writeln!(file, "rfuzzprobe report for {}", report.target)?;
        writeln!(file, "Date: {}", report.generated_at.to_rfc3339())?;
        writeln!(file, "Open ports: {:?}", report.open_ports)?;

        for entry in &report.ports {
            writeln!(file)?;
            writeln!(file, "Port {} [{}]", entry.port, entry.service)?;
            writeln!(file, "  CVEs: {}", entry.cve_list.len())?;
            if !entry.vulnerabilities.is_empty() {
                writeln!(file, "  Vulnerabilities: {}", entry.vulnerabilities.join(", "))?;
            }
            if let Some(fuzz) = &entry.fuzz {
                writeln!(
                    file,
                    "  Fuzzing: {} engine, {} round(s), {} anomalous case(s)",
                    fuzz.engine,
                    fuzz.rounds,
                    fuzz.anomaly_lengths.len()
                )?;
            }
            if !entry.generalization.is_empty() {
                writeln!(
                    file,
                    "  Generalization: {} suspicious out of {}",
                    suspicious_count(&entry.generalization),
                    entry.generalization.len()
                )?;
            }
            for note in &entry.notes {
                writeln!(file, "  Note: {}", note)?;
            }
        }

        writeln!(
            file,
            "\nTrials sent: {}, anomalies: {}, exceptions: {}",
            report.statistics.trials_sent, report.statistics.anomalies, report.statistics.exceptions
        )?;
        Ok(())
    }
}
