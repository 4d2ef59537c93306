// File: transcript.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Append-only transcript of fuzz transmissions.
//!
//! Each interesting trial becomes a block of lines:
//!
//! ```text
//! [2025-03-01 10:15:02,431]     Info: Sending fuzz case #17...
//! [2025-03-01 10:15:02,431]     Transmitted 42 bytes: b'GET / HTTP/1.1\r\n...'
//! [2025-03-01 10:15:02,431]     [Anomaly] HTTP 502 Bad Gateway
//! [2025-03-01 10:15:02,431]     Info: Closing connection...
//! [2025-03-01 10:15:02,431]     Info: Sleeping 0.2s...
//! ```

use crate::error::{FuzzError, FuzzResult};
use crate::mutator::FuzzTrial;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const SENDING_MARKER: &str = "Info: Sending";
pub const TRANSMITTED_MARKER: &str = "Transmitted";
pub const ANOMALY_TAG: &str = "[Anomaly]";
pub const EXCEPTION_TAG: &str = "[Exception]";
pub const CLOSING_MARKER: &str = "Closing connection";
pub const SLEEPING_MARKER: &str = "Sleeping";

const LINE_INDENT: &str = "     ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Normal,
    Anomaly,
    Exception,
}

#[derive(Debug, Clone)]
pub struct TranscriptRecord {
    pub timestamp: DateTime<Local>,
    pub sequence_id: u64,
    pub byte_length: usize,
    pub raw_escaped: String,
    pub outcome: Outcome,
    pub detail: String,
}

impl TranscriptRecord {
    fn from_trial(trial: &FuzzTrial, outcome: Outcome, detail: String) -> Self {
        Self {
            timestamp: trial.timestamp,
            sequence_id: trial.sequence_id,
            byte_length: trial.payload.len(),
            raw_escaped: escape_bytes(&trial.payload),
            outcome,
            detail,
        }
    }

    pub fn anomaly(trial: &FuzzTrial, status: u16, reason: &str) -> Self {
        Self::from_trial(trial, Outcome::Anomaly, status_detail(status, reason))
    }

    pub fn exception(trial: &FuzzTrial, message: &str) -> Self {
        let detail = if message.trim().is_empty() {
            "unknown transport error".to_string()
        } else {
            message.trim().replace(['\r', '\n'], " ")
        };
        Self::from_trial(trial, Outcome::Exception, detail)
    }

    pub fn to_lines(&self) -> String {
        let ts = format_timestamp(&self.timestamp);
        let mut block = String::new();
        block.push_str(&format!(
            "{}{}{} fuzz case #{}...\n",
            ts, LINE_INDENT, SENDING_MARKER, self.sequence_id
        ));
        block.push_str(&format!(
            "{}{}{} {} bytes: {}\n",
            ts, LINE_INDENT, TRANSMITTED_MARKER, self.byte_length, self.raw_escaped
        ));
        match self.outcome {
            Outcome::Anomaly => {
                block.push_str(&format!("{}{}{} HTTP {}\n", ts, LINE_INDENT, ANOMALY_TAG, self.detail))
            }
            Outcome::Exception => {
                block.push_str(&format!("{}{}{} {}\n", ts, LINE_INDENT, EXCEPTION_TAG, self.detail))
            }
            Outcome::Normal => {}
        }
        block.push_str(&format!("{}{}Info: {}...\n", ts, LINE_INDENT, CLOSING_MARKER));
        block.push_str(&format!("{}{}Info: {} 0.2s...\n\n", ts, LINE_INDENT, SLEEPING_MARKER));
        block
    }
}

fn status_detail(status: u16, reason: &str) -> String {
    let reason = reason.trim();
    if reason.is_empty() {
        status.to_string()
    } else {
        format!("{} {}", status, reason)
    }
}

pub fn format_timestamp(timestamp: &DateTime<Local>) -> String {
    format!(
        "[{},{:03}]",
        timestamp.format("%Y-%m-%d %H:%M:%S"),
        timestamp.timestamp_subsec_millis()
    )
}

/// Bytes literal in `b'...'` form; only printable ASCII is kept verbatim.
pub fn escape_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() + 3);
    out.push_str("b'");
    for &byte in data {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    out.push('\'');
    out
}

/// Inverse of [`escape_bytes`]; accepts either quote style.
pub fn unescape_bytes(literal: &str) -> Option<Vec<u8>> {
    let literal = literal.trim();
    let quote = if literal.starts_with("b'") {
        '\''
    } else if literal.starts_with("b\"") {
        '"'
    } else {
        return None;
    };
    let inner = literal.get(2..)?.strip_suffix(quote)?;

    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            if !c.is_ascii() {
                return None;
            }
            out.push(c as u8);
            continue;
        }
        match chars.next()? {
            '\\' => out.push(b'\\'),
            '\'' => out.push(b'\''),
            '"' => out.push(b'"'),
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            '0' => out.push(0),
            'x' => {
                let hi = chars.next()?;
                let lo = chars.next()?;
                let hex: String = [hi, lo].iter().collect();
                out.push(u8::from_str_radix(&hex, 16).ok()?);
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Serialized writer for one transcript file. Concurrent tasks share it
/// behind an `Arc`; each record block is written and flushed under the lock.
pub struct TranscriptLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl TranscriptLog {
    /// Opens `path` truncated, creating missing parent directories.
    pub async fn create<P: AsRef<Path>>(path: P) -> FuzzResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| FuzzError::LogSinkOpen {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|source| FuzzError::LogSinkOpen {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_record(&self, record: &TranscriptRecord) -> FuzzResult<()> {
        self.write_raw(&record.to_lines()).await
    }

    pub async fn write_raw(&self, block: &str) -> FuzzResult<()> {
        let mut file = self.file.lock().await;
        file.write_all(block.as_bytes())
            .await
            .map_err(FuzzError::LogSinkWrite)?;
        file.flush().await.map_err(FuzzError::LogSinkWrite)
    }

    pub async fn close(self) -> FuzzResult<()> {
        let mut file = self.file.into_inner();
        file.flush().await.map_err(FuzzError::LogSinkWrite)?;
        file.sync_all().await.map_err(FuzzError::LogSinkWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::HttpMethod;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn trial(id: u64, payload: &[u8]) -> FuzzTrial {
        FuzzTrial {
            sequence_id: id,
            depth: 1,
            method: HttpMethod::Get,
            payload: payload.to_vec(),
            timestamp: Local::now(),
        }
    }

    #[test]
    fn test_escape_bytes_literal_form() {
        assert_eq!(escape_bytes(b"GET / HTTP/1.1\r\n"), "b'GET / HTTP/1.1\\r\\n'");
        assert_eq!(escape_bytes(b"it's"), "b'it\\'s'");
        assert_eq!(escape_bytes(&[0x00, 0xff, b'\\']), "b'\\x00\\xff\\\\'");
        assert_eq!(escape_bytes(b""), "b''");
    }

    #[test]
    fn test_unescape_inverts_escape() {
        let samples: Vec<Vec<u8>> = vec![
            b"plain".to_vec(),
            b"quote ' and \" mixed\r\n\t".to_vec(),
            (0u8..=255).collect(),
        ];
        for sample in samples {
            assert_eq!(unescape_bytes(&escape_bytes(&sample)).unwrap(), sample);
        }
    }

    #[test]
    fn test_unescape_rejects_garbage() {
        assert_eq!(unescape_bytes("not a literal"), None);
        assert_eq!(unescape_bytes("b'unterminated"), None);
        assert_eq!(unescape_bytes("b'bad \\q escape'"), None);
        assert_eq!(unescape_bytes("b'\\xZZ'"), None);
        assert_eq!(unescape_bytes("b\"dq\""), Some(b"dq".to_vec()));
    }

    #[test]
    fn test_detail_is_never_empty() {
        let t = trial(1, b"x");
        assert_eq!(TranscriptRecord::anomaly(&t, 500, "").detail, "500");
        assert_eq!(
            TranscriptRecord::anomaly(&t, 503, "Service Unavailable").detail,
            "503 Service Unavailable"
        );
        assert_eq!(
            TranscriptRecord::exception(&t, "  ").detail,
            "unknown transport error"
        );
        assert_eq!(
            TranscriptRecord::exception(&t, "reset\r\nby peer").detail,
            "reset  by peer"
        );
    }

    #[test]
    fn test_record_block_layout() {
        let record = TranscriptRecord::exception(&trial(9, b"AB"), "Connection timeout after 2000ms");
        let block = record.to_lines();
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].ends_with("Info: Sending fuzz case #9..."));
        assert!(lines[1].ends_with("Transmitted 2 bytes: b'AB'"));
        assert!(lines[2].ends_with("[Exception] Connection timeout after 2000ms"));
        assert!(lines[3].ends_with("Info: Closing connection..."));
        assert!(lines[4].ends_with("Info: Sleeping 0.2s..."));
        assert!(lines[5].is_empty());
        assert!(lines[0].starts_with('['));
        assert_eq!(&lines[0][24..25], "]");
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(TranscriptLog::create(dir.path().join("fuzz.log")).await.unwrap());

        let mut handles = Vec::new();
        for task in 0..9u64 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                for i in 0..20u64 {
                    let record = TranscriptRecord::anomaly(&trial(task * 100 + i, b"payload"), 500, "Internal Server Error");
                    log.write_record(&record).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(dir.path().join("fuzz.log")).unwrap();
        let blocks: Vec<&str> = content.split("\n\n").filter(|b| !b.trim().is_empty()).collect();
        assert_eq!(blocks.len(), 180);
        for block in blocks {
            let lines: Vec<&str> = block.lines().collect();
            assert_eq!(lines.len(), 5);
            assert!(lines[0].contains(SENDING_MARKER));
            assert!(lines[2].contains(ANOMALY_TAG));
        }
    }

    #[tokio::test]
    async fn test_create_truncates_previous_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("fuzz.log");

        let log = TranscriptLog::create(&path).await.unwrap();
        log.write_raw("first\n").await.unwrap();
        log.write_raw("second\n").await.unwrap();
        log.close().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");

        let log = TranscriptLog::create(&path).await.unwrap();
        log.close().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_open_failure_is_log_sink_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let result = TranscriptLog::create(blocker.join("fuzz.log")).await;
        assert!(matches!(result, Err(FuzzError::LogSinkOpen { .. })));
    }
}
