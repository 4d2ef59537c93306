// File: parser.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::transcript::{
    unescape_bytes, Outcome, ANOMALY_TAG, CLOSING_MARKER, EXCEPTION_TAG, SENDING_MARKER,
    SLEEPING_MARKER, TRANSMITTED_MARKER,
};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static TRANSMITTED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Transmitted\s+(\S+)\s+bytes:\s*(.*)$").unwrap());

static CASE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\d+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalousSession {
    pub sequence_id: Option<u64>,
    pub byte_length: usize,
    pub classification: Outcome,
}

#[derive(Debug, Default)]
struct OpenSession {
    sequence_id: Option<u64>,
    byte_length: Option<usize>,
    classification: Option<Outcome>,
}

pub struct TranscriptParser;

impl TranscriptParser {
    /// Sessions run from a sending marker to the first closing or sleeping
    /// marker. Only sessions holding an anomaly or exception line are kept,
    /// in log order.
    pub fn parse(content: &str) -> Vec<AnomalousSession> {
        let mut sessions = Vec::new();
        let mut current: Option<OpenSession> = None;

        for (line_no, raw_line) in content.lines().enumerate() {
            let line = event_text(raw_line);

            if line.starts_with(SENDING_MARKER) {
                if current.is_some() {
                    debug!("Line {}: session reopened before it was closed", line_no + 1);
                }
                current = Some(OpenSession {
                    sequence_id: CASE_NUMBER
                        .captures(line)
                        .and_then(|c| c[1].parse().ok()),
                    ..Default::default()
                });
                continue;
            }

            let Some(session) = current.as_mut() else {
                continue;
            };

            if line.starts_with(TRANSMITTED_MARKER) {
                if session.byte_length.is_none() {
                    session.byte_length = extract_byte_length(line, line_no + 1);
                }
            } else if line.starts_with(EXCEPTION_TAG) {
                session.classification = Some(Outcome::Exception);
            } else if line.starts_with(ANOMALY_TAG) {
                if session.classification != Some(Outcome::Exception) {
                    session.classification = Some(Outcome::Anomaly);
                }
            } else if is_session_end(line) {
                if let Some(done) = current.take() {
                    if let (Some(classification), Some(byte_length)) =
                        (done.classification, done.byte_length)
                    {
                        sessions.push(AnomalousSession {
                            sequence_id: done.sequence_id,
                            byte_length,
                            classification,
                        });
                    }
                }
            }
        }

        sessions
    }

    /// A missing or unreadable log means nothing was found.
    pub async fn parse_file<P: AsRef<Path>>(path: P) -> Vec<AnomalousSession> {
        let path = path.as_ref();
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                let sessions = Self::parse(&content);
                info!(
                    "Loaded {} anomalous fuzz case(s) from {}",
                    sessions.len(),
                    path.display()
                );
                sessions
            }
            Err(e) => {
                warn!("Transcript log {} could not be read: {}", path.display(), e);
                Vec::new()
            }
        }
    }
}

/// Flat byte-length distribution, duplicates kept.
pub fn byte_lengths(sessions: &[AnomalousSession]) -> Vec<usize> {
    sessions.iter().map(|s| s.byte_length).collect()
}

/// Drops the bracketed timestamp so payload bytes never match a marker.
fn event_text(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('[')
        && !trimmed.starts_with(ANOMALY_TAG)
        && !trimmed.starts_with(EXCEPTION_TAG)
    {
        if let Some(end) = trimmed.find(']') {
            return trimmed[end + 1..].trim_start();
        }
    }
    trimmed
}

fn is_session_end(line: &str) -> bool {
    line.strip_prefix("Info: ")
        .map(|rest| rest.starts_with(CLOSING_MARKER) || rest.starts_with(SLEEPING_MARKER))
        .unwrap_or(false)
}

fn extract_byte_length(line: &str, line_no: usize) -> Option<usize> {
    let Some(caps) = TRANSMITTED_LINE.captures(line) else {
        warn!("Line {}: transmission line without byte count, skipping", line_no);
        return None;
    };

    if let Ok(count) = caps[1].parse::<usize>() {
        return Some(count);
    }

    match unescape_bytes(&caps[2]) {
        Some(bytes) => Some(bytes.len()),
        None => {
            warn!(
                "Line {}: unparseable byte length '{}', skipping",
                line_no, &caps[1]
            );
            None
        }
    }
}
