// File: scanner.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::rawhttp::send_raw_request;
use futures::future::join_all;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::net::TcpStream;

pub const UNKNOWN_SERVICE: &str = "Unknown";
pub const TLS_PORTS: [u16; 2] = [443, 8443];

pub fn is_unknown(service: &str) -> bool {
    service == UNKNOWN_SERVICE
}

/// Connect scan of every port at once; returns the open ones sorted.
pub async fn scan_ports(target: &str, ports: &[u16], timeout: Duration) -> Vec<u16> {
    let probes = ports.iter().map(|&port| async move {
        let addr = format!("{}:{}", target, port);
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => Some(port),
            Ok(Err(e)) => {
                debug!("Port {} closed: {}", port, e);
                None
            }
            Err(_) => {
                debug!("Port {} timed out after {:?}", port, timeout);
                None
            }
        }
    });

    let mut open: Vec<u16> = join_all(probes).await.into_iter().flatten().collect();
    open.sort_unstable();
    open.dedup();
    info!("Open HTTP ports on {}: {:?}", target, open);
    open
}

pub struct ServiceFingerprinter {
    timeout: Duration,
    tls_client: Option<reqwest::Client>,
}

impl ServiceFingerprinter {
    pub fn new(timeout: Duration) -> Self {
        let tls_client = match reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
        {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("TLS fingerprinting disabled: {}", e);
                None
            }
        };
        Self { timeout, tls_client }
    }

    /// The `Server` header value, or [`UNKNOWN_SERVICE`] on any failure.
    pub async fn detect(&self, target: &str, port: u16) -> String {
        let service = if TLS_PORTS.contains(&port) {
            self.detect_tls(target, port).await
        } else {
            self.detect_plain(target, port).await
        };
        let service = service.unwrap_or_else(|| UNKNOWN_SERVICE.to_string());
        info!("Port {} service: {}", port, service);
        service
    }

    async fn detect_plain(&self, target: &str, port: u16) -> Option<String> {
        let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", target);
        match send_raw_request(target, port, request.as_bytes(), self.timeout).await {
            Ok(response) => response.header("server").map(server_banner),
            Err(e) => {
                warn!("Error detecting service on {}:{}: {}", target, port, e);
                None
            }
        }
    }

    async fn detect_tls(&self, target: &str, port: u16) -> Option<String> {
        let client = self.tls_client.as_ref()?;
        match client.get(format!("https://{}:{}/", target, port)).send().await {
            Ok(response) => response
                .headers()
                .get(reqwest::header::SERVER)
                .and_then(|v| v.to_str().ok())
                .map(server_banner),
            Err(e) => {
                warn!("TLS error connecting to {}:{}: {}", target, port, e);
                None
            }
        }
    }
}

fn server_banner(value: &str) -> String {
    value.trim().to_string()
}
