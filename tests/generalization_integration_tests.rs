// File: generalization_integration_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

mod common;

use rfuzzprobe::generalization::{load_cases, GeneralizationTester, ReplayStatus};
use rfuzzprobe::synthesizer::write_cases;
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
#[serial]
async fn test_failing_case_is_isolated() {
    let server = MockServer::start().await;
    let cases = common::cases(&["first", "second", "third"]);

    Mock::given(method("GET"))
        .and(body_string(cases[1].request.clone()))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = common::fast_config(dir.path(), vec![]);
    config.set_replay_timeout(Duration::from_millis(400));
    let tester = GeneralizationTester::new(&config).unwrap();

    let results = tester.test("127.0.0.1", server.address().port(), &cases).await;

    assert_eq!(results.len(), 3);
    assert_eq!(
        results.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(results[0].status_code, ReplayStatus::Code(200));
    assert!(!results[0].suspicious);
    assert_eq!(results[1].status_code, ReplayStatus::Error("ERROR".to_string()));
    assert!(results[1].suspicious);
    assert!(results[1].error.is_some());
    assert!(results[1].response_time.is_none());
    assert_eq!(results[2].status_code, ReplayStatus::Code(200));
    assert!(!results[2].suspicious);
}

#[tokio::test]
#[serial]
async fn test_server_errors_are_suspicious() {
    let server = MockServer::start().await;
    let cases = common::cases(&["broken", "missing"]);

    Mock::given(method("GET"))
        .and(body_string(cases[0].request.clone()))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(body_string(cases[1].request.clone()))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let tester = GeneralizationTester::new(&common::fast_config(dir.path(), vec![])).unwrap();
    let results = tester.test("127.0.0.1", server.address().port(), &cases).await;

    assert_eq!(results[0].status_code, ReplayStatus::Code(503));
    assert!(results[0].suspicious);
    assert_eq!(results[1].status_code, ReplayStatus::Code(404));
    assert!(!results[1].suspicious);
    assert!(results.iter().all(|r| r.response_time.is_some()));
}

#[tokio::test]
#[serial]
async fn test_replay_from_case_log_on_disk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cases = common::cases(&["a", "bb", "ccc", "dddd"]);
    let path = write_cases(dir.path().join("generated_cases.log"), &cases)
        .await
        .unwrap();

    let reloaded = load_cases(&path).await;
    assert_eq!(reloaded, cases);

    let tester = GeneralizationTester::new(&common::fast_config(dir.path(), vec![])).unwrap();
    let results = tester.test("127.0.0.1", server.address().port(), &reloaded).await;
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.suspicious));
    assert_eq!(results[3].payload, cases[3].request);
}

#[tokio::test]
#[serial]
async fn test_unreachable_target_marks_every_case() {
    let port = common::closed_port().await;
    let dir = TempDir::new().unwrap();
    let tester = GeneralizationTester::new(&common::fast_config(dir.path(), vec![])).unwrap();

    let results = tester
        .test("127.0.0.1", port, &common::cases(&["x", "y"]))
        .await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.suspicious && r.error.is_some()));
}
