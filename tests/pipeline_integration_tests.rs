// File: pipeline_integration_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

mod common;

use rfuzzprobe::escalation::EscalationState;
use rfuzzprobe::generalization::RESULTS_FILE_NAME;
use rfuzzprobe::pipeline::{Pipeline, GENERATED_CASES_FILE};
use rfuzzprobe::scanner::UNKNOWN_SERVICE;
use serde_json::Value;
use serial_test::serial;
use tempfile::TempDir;

const SERVER_ERROR: &str = "HTTP/1.1 500 Internal Server Error";
const OK: &str = "HTTP/1.1 200 OK";

#[tokio::test]
#[serial]
async fn test_anomalous_target_runs_full_pipeline() {
    let dir = TempDir::new().unwrap();
    let port = common::canned_server(SERVER_ERROR, Some("TestServer/0.1"), "").await;
    let closed = common::closed_port().await;
    let pipeline = Pipeline::new(common::fast_config(dir.path(), vec![closed, port]));

    let (report, path) = pipeline.run_and_save("127.0.0.1").await.unwrap();

    assert_eq!(report.open_ports, vec![port]);
    assert_eq!(report.ports.len(), 1);
    let entry = &report.ports[0];
    assert_eq!(entry.service, "TestServer/0.1");
    assert!(entry.vulnerabilities.is_empty());

    let fuzz = entry.fuzz.as_ref().unwrap();
    assert_eq!(fuzz.state, EscalationState::Stopped { depth: 1 });
    assert_eq!(fuzz.rounds, 1);
    assert_eq!(fuzz.anomaly_lengths.len(), 2);
    assert!(fuzz.transcript.as_ref().unwrap().ends_with("fuzz2.log"));

    assert_eq!(entry.synthesized_cases.len(), 3);
    assert_eq!(entry.generalization.len(), 3);
    assert!(entry.generalization.iter().all(|r| r.suspicious));

    let case_dir = dir
        .path()
        .join("generated_output")
        .join(format!("127.0.0.1_{}", port));
    assert!(case_dir.join(GENERATED_CASES_FILE).exists());
    assert!(case_dir.join(RESULTS_FILE_NAME).exists());

    assert_eq!(path, dir.path().join("fuzz_output").join("127.0.0.1_report.json"));
    let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["ports"][0]["fuzz"]["state"]["state"], "stopped");
    assert_eq!(
        json["statistics"]["anomalies"].as_u64().unwrap() + json["statistics"]["exceptions"].as_u64().unwrap(),
        2
    );
}

#[tokio::test]
#[serial]
async fn test_healthy_target_exhausts_depths() {
    let dir = TempDir::new().unwrap();
    let port = common::canned_server(OK, Some("nginx/1.25.3"), "welcome").await;
    let pipeline = Pipeline::new(common::fast_config(dir.path(), vec![port]));

    let report = pipeline.run("127.0.0.1").await;

    let entry = &report.ports[0];
    let fuzz = entry.fuzz.as_ref().unwrap();
    assert_eq!(fuzz.state, EscalationState::Exhausted { max_depth: 2 });
    assert_eq!(fuzz.rounds, 2);
    assert!(fuzz.anomaly_lengths.is_empty());
    assert!(entry.synthesized_cases.is_empty());
    assert!(entry.generalization.is_empty());
    assert_eq!(report.statistics.trials_sent, 2 + 4);
    assert_eq!(report.statistics.normal, 6);
}

#[tokio::test]
#[serial]
async fn test_unknown_service_skips_port() {
    let dir = TempDir::new().unwrap();
    let port = common::canned_server(OK, None, "").await;
    let pipeline = Pipeline::new(common::fast_config(dir.path(), vec![port]));

    let report = pipeline.run("127.0.0.1").await;

    let entry = &report.ports[0];
    assert_eq!(entry.service, UNKNOWN_SERVICE);
    assert!(entry.fuzz.is_none());
    assert!(entry.notes.iter().any(|n| n.contains("service unknown")));
    assert_eq!(report.statistics.trials_sent, 0);
}

#[tokio::test]
#[serial]
async fn test_known_vulnerability_skips_fuzzing() {
    let dir = TempDir::new().unwrap();
    let port = common::canned_server(OK, Some("Apache/2.4.41"), "SQL syntax error near '1'").await;
    let pipeline = Pipeline::new(common::fast_config(dir.path(), vec![port]));

    let report = pipeline.run("127.0.0.1").await;

    let entry = &report.ports[0];
    assert_eq!(entry.vulnerabilities, vec!["SQL Injection".to_string()]);
    assert!(entry.fuzz.is_none());
    assert_eq!(report.statistics.trials_sent, 0);
}

#[tokio::test]
#[serial]
async fn test_missing_engine_skips_fuzz_stage_only() {
    let dir = TempDir::new().unwrap();
    let port = common::canned_server(SERVER_ERROR, Some("TestServer/0.1"), "").await;
    let mut config = common::fast_config(dir.path(), vec![port]);
    config.set_engine_name("afl");
    let pipeline = Pipeline::new(config);

    let (report, path) = pipeline.run_and_save("127.0.0.1").await.unwrap();

    assert!(report.ports[0].fuzz.is_none());
    assert!(report.ports[0].notes.iter().any(|n| n.contains("no fuzzing engine")));
    assert!(path.exists());
}

#[tokio::test]
#[serial]
async fn test_no_open_ports_still_reports() {
    let dir = TempDir::new().unwrap();
    let closed = common::closed_port().await;
    let pipeline = Pipeline::new(common::fast_config(dir.path(), vec![closed]));

    let (report, path) = pipeline.run_and_save("127.0.0.1").await.unwrap();

    assert!(report.open_ports.is_empty());
    assert!(report.ports.is_empty());
    let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["target"], "127.0.0.1");
}
