// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Failure of a single wire exchange. Always recoverable: callers record it
/// and move on to the next trial or case.
#[derive(Debug)]
pub enum TransportError {
    ConnectionRefused(String),
    ConnectTimeout(Duration),
    WriteTimeout(Duration),
    ReadTimeout(Duration),
    ConnectionReset(String),
    MalformedResponse(String),
    Io(std::io::Error),
    Http(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionRefused(addr) => write!(f, "Connection refused by {}", addr),
            Self::ConnectTimeout(t) => write!(f, "Connection timeout after {}ms", t.as_millis()),
            Self::WriteTimeout(t) => write!(f, "Write timeout after {}ms", t.as_millis()),
            Self::ReadTimeout(t) => write!(f, "Read timeout after {}ms", t.as_millis()),
            Self::ConnectionReset(msg) => write!(f, "Connection reset: {}", msg),
            Self::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Http(msg) => write!(f, "HTTP client error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::ConnectionRefused => Self::ConnectionRefused(error.to_string()),
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionReset(error.to_string()),
            _ => Self::Io(error),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}

/// Session-level failures. Only resource setup problems end up here; data
/// and transport problems are folded into log records instead.
#[derive(Debug)]
pub enum FuzzError {
    LogSinkOpen { path: PathBuf, source: std::io::Error },
    LogSinkWrite(std::io::Error),
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Configuration(String),
}

impl fmt::Display for FuzzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogSinkOpen { path, source } => {
                write!(f, "Failed to open log sink {}: {}", path.display(), source)
            }
            Self::LogSinkWrite(e) => write!(f, "Failed to write log sink: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for FuzzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::LogSinkOpen { source, .. } => Some(source),
            Self::LogSinkWrite(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Serialization(e) => Some(e),
            Self::Configuration(_) => None,
        }
    }
}

impl From<std::io::Error> for FuzzError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for FuzzError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error)
    }
}

pub type FuzzResult<T> = Result<T, FuzzError>;
