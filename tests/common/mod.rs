// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use rfuzzprobe::config::{FuzzConfig, FuzzEngine, GenerationStrategy};
use rfuzzprobe::synthesizer::{build_request, SynthesizedCase};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answers every connection with the same canned response.
pub async fn canned_server(status_line: &str, server: Option<&str>, body: &str) -> u16 {
    let mut response = format!("{}\r\n", status_line);
    if let Some(server) = server {
        response.push_str(&format!("Server: {}\r\n", server));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 65536];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    port
}

pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn fast_config(dir: &Path, ports: Vec<u16>) -> FuzzConfig {
    let mut config = FuzzConfig::new();
    config.set_ports(ports);
    config.set_engine(FuzzEngine::Property);
    config.set_generation(GenerationStrategy::Resample);
    config.set_max_depth(2);
    config.set_num_examples(2);
    config.set_num_cases(3);
    config.set_trial_pause(Duration::ZERO);
    config.set_trial_timeout(Duration::from_secs(1));
    config.set_replay_timeout(Duration::from_secs(2));
    config.set_output_dir(dir.join("fuzz_output"));
    config.set_generated_dir(dir.join("generated_output"));
    config.set_cve_database(dir.join("missing_cve_database.json"));
    config.set_rate_limit(1000);
    config.set_seed(Some(7));
    config.set_quiet(true);
    config
}

pub fn cases(payloads: &[&str]) -> Vec<SynthesizedCase> {
    payloads
        .iter()
        .enumerate()
        .map(|(index, payload)| {
            let request = build_request(payload);
            SynthesizedCase {
                index,
                target_length: payload.len(),
                payload: payload.to_string(),
                byte_length: request.len(),
                request,
            }
        })
        .collect()
}
