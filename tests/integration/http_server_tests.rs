//! Integration tests for the HTTP front end
//!
//! These tests verify that the server:
//! - answers health checks
//! - passes requests to the runner and returns camelCase results
//! - maps rejected input to 400 and core failures to 500
//! - drives the real V8 sandbox end to end

use async_trait::async_trait;
use coderun_sandbox::{
    AmbientMode, CodeRunner, ExecutionRequest, ExecutionResult, Result as SandboxResult,
    SandboxError,
};
use coderun_tests::{setup_test_logging, v8_service, TestServer};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Runner that echoes the request back without executing anything
#[derive(Default)]
struct EchoRunner {
    seen: Mutex<Vec<ExecutionRequest>>,
}

#[async_trait]
impl CodeRunner for EchoRunner {
    async fn run(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        let reply = ExecutionResult {
            stdout: request.code.clone(),
            stderr: request.args.join(","),
            exit_code: 0,
            error: String::new(),
            execution_time_ms: 7,
        };
        self.seen.lock().unwrap().push(request);
        Ok(reply)
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Runner that fails every request the same way
struct FailingRunner(fn() -> SandboxError);

#[async_trait]
impl CodeRunner for FailingRunner {
    async fn run(&self, _request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        Err((self.0)())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    setup_test_logging();
    let server = TestServer::start(Arc::new(EchoRunner::default())).await.unwrap();

    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");

    tokio_test::assert_ok!(server.stop().await);
}

#[tokio::test]
async fn test_run_passes_request_through() {
    let runner = Arc::new(EchoRunner::default());
    let server = TestServer::start(runner.clone()).await.unwrap();

    let response = reqwest::Client::new()
        .post(server.url("/run"))
        .json(&json!({
            "code": "print(1)",
            "timeout": 2,
            "args": ["a", "b"],
            "env": {"DEBUG": true, "LEVEL": 3}
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "stdout": "print(1)",
            "stderr": "a,b",
            "exitCode": 0,
            "error": "",
            "executionTimeMs": 7
        })
    );

    let seen = runner.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].timeout, Some(2.0));
    assert_eq!(seen[0].env_strings()["DEBUG"], "true");
    assert_eq!(seen[0].env_strings()["LEVEL"], "3");

    tokio_test::assert_ok!(server.stop().await);
}

#[tokio::test]
async fn test_invalid_input_maps_to_bad_request() {
    let server = TestServer::start(Arc::new(FailingRunner(|| {
        SandboxError::invalid("Code is required")
    })))
    .await
    .unwrap();

    let response = reqwest::Client::new()
        .post(server.url("/run"))
        .json(&json!({ "code": "" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: ExecutionResult = response.json().await.unwrap();
    assert_eq!(body, ExecutionResult::rejected("Code is required"));

    tokio_test::assert_ok!(server.stop().await);
}

#[tokio::test]
async fn test_internal_failure_maps_to_server_error() {
    let server = TestServer::start(Arc::new(FailingRunner(|| {
        SandboxError::internal("execution worker panicked")
    })))
    .await
    .unwrap();

    let response = reqwest::Client::new()
        .post(server.url("/run"))
        .json(&json!({ "code": "print(1)" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("execution worker panicked"));

    tokio_test::assert_ok!(server.stop().await);
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let server = TestServer::start(Arc::new(EchoRunner::default())).await.unwrap();

    let response = reqwest::Client::new()
        .post(server.url("/run"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    tokio_test::assert_ok!(server.stop().await);
}

#[tokio::test]
async fn test_v8_sandbox_over_http() {
    let server = TestServer::start(Arc::new(v8_service(AmbientMode::Isolated)))
        .await
        .unwrap();
    let client = reqwest::Client::new();

    let ok: ExecutionResult = client
        .post(server.url("/run"))
        .json(&json!({
            "code": "print(process.argv.slice(1).join('+'), process.env.WHO)",
            "args": ["x", "y"],
            "env": {"WHO": "world"}
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ok.stdout, "x+y world");
    assert!(ok.success());

    let timed_out: ExecutionResult = client
        .post(server.url("/run"))
        .json(&json!({ "code": "while (true) {}", "timeout": 0.2 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(timed_out.timed_out());

    let empty = client
        .post(server.url("/run"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);

    tokio_test::assert_ok!(server.stop().await);
}
