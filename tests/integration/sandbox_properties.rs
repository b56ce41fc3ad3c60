//! End-to-end properties of the sandbox against the V8 backend
//!
//! These tests verify that:
//! - printed output round-trips with one trailing newline removed
//! - request env/args are visible to the snippet and leave no trace
//! - overrunning snippets are stopped within the deadline
//! - snippet errors become structured results, including async ones
//! - timers run inside the deadline and never outlive it
//! - conflicting requests never see each other's ambient state

use assert_matches::assert_matches;
use coderun_sandbox::{
    AmbientMode, AmbientStore, ExecutionRequest, ProcessStore, ResourceLimits, SandboxError,
    TIMEOUT_ERROR,
};
use coderun_tests::{
    process_ambient, setup_test_logging, unique_env_key, v8_service, v8_service_with_limits,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutate the real environment only while no execution has it applied.
fn with_process_lock(mutate: impl FnOnce()) {
    let store = ProcessStore::global();
    let _lock = store.exclusive();
    mutate();
}

#[tokio::test]
async fn test_print_round_trip() {
    setup_test_logging();
    let service = v8_service(AmbientMode::Isolated);

    let started = Instant::now();
    let result = service
        .execute(ExecutionRequest::new(r#"print("hello")"#))
        .await
        .unwrap();
    let wall_ms = started.elapsed().as_millis() as u64;

    assert_eq!(result.stdout, "hello");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.error, "");
    assert!(result.execution_time_ms <= wall_ms);
}

#[tokio::test]
async fn test_only_one_trailing_newline_is_removed() {
    let service = v8_service(AmbientMode::Isolated);
    let result = service
        .execute(ExecutionRequest::new(r#"print("a"); print(""); print("b", { end: "\n\n" });"#))
        .await
        .unwrap();
    assert_eq!(result.stdout, "a\n\nb\n");
}

#[tokio::test]
async fn test_environment_is_restored_byte_for_byte() {
    let service = v8_service(AmbientMode::Process);
    let overridden = unique_env_key("OVERRIDDEN");
    with_process_lock(|| std::env::set_var(&overridden, "before"));
    let added = unique_env_key("ADDED");
    let before = process_ambient();

    let code = format!(
        r#"print(process.env["{overridden}"], process.env["{added}"]);"#,
        overridden = overridden,
        added = added,
    );
    let request = ExecutionRequest::new(code)
        .with_env(overridden.clone(), "during")
        .with_env(added.clone(), 42);
    let result = service.execute(request).await.unwrap();

    assert_eq!(result.stdout, "during 42");
    let after = process_ambient();
    assert_eq!(before.env, after.env);
    assert!(std::env::var(&added).is_err());
    assert_eq!(std::env::var(&overridden).unwrap(), "before");
    with_process_lock(|| std::env::remove_var(&overridden));
}

#[tokio::test]
async fn test_argument_vector_is_exact_and_restored() {
    let service = v8_service(AmbientMode::Process);
    let before = ProcessStore::global().argv();

    let request = ExecutionRequest::new(r#"print(JSON.stringify(process.argv))"#)
        .with_arg("first")
        .with_arg("second arg")
        .with_arg("");
    let result = service.execute(request).await.unwrap();

    assert_eq!(result.stdout, r#"["script.js","first","second arg",""]"#);
    assert_eq!(ProcessStore::global().argv(), before);
}

#[tokio::test]
async fn test_isolated_mode_never_touches_process_environment() {
    let service = v8_service(AmbientMode::Isolated);
    let key = unique_env_key("ISOLATED");

    let code = format!(r#"print(typeof process.env.PATH, process.env["{key}"])"#, key = key);
    let result = service
        .execute(ExecutionRequest::new(code).with_env(key.clone(), "private"))
        .await
        .unwrap();

    assert_eq!(result.stdout, "undefined private");
    assert!(std::env::var(&key).is_err());
}

#[tokio::test]
async fn test_timeout_latency_is_bounded() {
    let limits = ResourceLimits::default().with_max_execution_time(0.5);
    let service = v8_service_with_limits(AmbientMode::Isolated, limits);

    let started = Instant::now();
    let result = service
        .execute(ExecutionRequest::new(r#"print("spinning"); while (true) {}"#).with_timeout(30.0))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.exit_code, 1);
    assert_eq!(result.error, TIMEOUT_ERROR);
    assert_eq!(result.stderr, "Error: Execution timed out after 0.5 seconds\n");
    assert_eq!(result.stdout, "");
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_timeout_restores_process_state() {
    let limits = ResourceLimits::default().with_max_execution_time(0.3);
    let service = v8_service_with_limits(AmbientMode::Process, limits);
    let key = unique_env_key("TIMEOUT");
    let before = process_ambient();

    let result = service
        .execute(
            ExecutionRequest::new("for (;;) {}")
                .with_env(key.clone(), "leak?")
                .with_arg("x"),
        )
        .await
        .unwrap();

    assert!(result.timed_out());
    assert!(std::env::var(&key).is_err());
    assert_eq!(process_ambient().argv, before.argv);
}

#[tokio::test]
async fn test_empty_code_is_invalid_input() {
    let service = v8_service(AmbientMode::Isolated);
    let err = service.execute(ExecutionRequest::new("")).await.unwrap_err();
    assert_matches!(err, SandboxError::InvalidInput(ref message) if message == "Code is required");

    let absent: ExecutionRequest = serde_json::from_str("{}").unwrap();
    assert!(service.execute(absent).await.unwrap_err().is_invalid_input());
}

#[tokio::test]
async fn test_runtime_error_is_structured() {
    let service = v8_service(AmbientMode::Isolated);
    let code = r#"
print("working");
function parse(input) {
    throw new RangeError("value out of range: " + input);
}
parse(42);
"#;
    let result = service.execute(ExecutionRequest::new(code)).await.unwrap();

    assert_eq!(result.exit_code, 1);
    assert_eq!(result.error, "value out of range: 42");
    assert_eq!(result.stdout, "working");
    assert!(result.stderr.starts_with("Error: value out of range: 42\n"));
    assert!(result.stderr.contains("RangeError"));
    assert!(result.stderr.contains("at parse"));
}

#[tokio::test]
async fn test_async_failure_is_structured() {
    let service = v8_service(AmbientMode::Isolated);
    let code = r#"
async function main() {
    print("loading");
    await null;
    throw new Error("lookup failed");
}
main();
"#;
    let result = service.execute(ExecutionRequest::new(code)).await.unwrap();

    assert_eq!(result.exit_code, 1);
    assert_eq!(result.error, "lookup failed");
    assert_eq!(result.stdout, "loading");
    assert!(result.stderr.starts_with("Error: lookup failed\n"));
}

#[tokio::test]
async fn test_timer_output_is_collected() {
    let service = v8_service(AmbientMode::Isolated);
    let code = r#"
setTimeout(() => print("after"), 20);
print("before");
"#;
    let result = service.execute(ExecutionRequest::new(code)).await.unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "before\nafter");
}

#[tokio::test]
async fn test_endless_interval_times_out() {
    let limits = ResourceLimits::default().with_max_execution_time(0.3);
    let service = v8_service_with_limits(AmbientMode::Isolated, limits);

    let started = Instant::now();
    let result = service
        .execute(ExecutionRequest::new(r#"setInterval(() => print("tick"), 10);"#))
        .await
        .unwrap();

    assert!(result.timed_out());
    assert_eq!(result.stdout, "");
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn test_compile_error_is_structured() {
    let service = v8_service(AmbientMode::Isolated);
    let result = service
        .execute(ExecutionRequest::new("print('never');\nconst = 1;"))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 1);
    assert!(!result.error.is_empty());
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("SyntaxError"));
    assert!(result.stderr.contains("script.js:2"));
}

#[tokio::test]
async fn test_restricted_namespace() {
    let service = v8_service(AmbientMode::Isolated);
    let code = r#"
print([typeof Deno, typeof eval, typeof WebAssembly, typeof SharedArrayBuffer].join(","));
print([typeof Math.max, typeof JSON.parse, typeof Promise].join(","));
"#;
    let result = service.execute(ExecutionRequest::new(code)).await.unwrap();
    assert_eq!(
        result.stdout,
        "undefined,undefined,undefined,undefined\nfunction,function,function"
    );
}

#[tokio::test]
async fn test_executions_do_not_share_globals() {
    let service = v8_service(AmbientMode::Isolated);
    service
        .execute(ExecutionRequest::new("globalThis.leaked = 'secret';"))
        .await
        .unwrap();
    let result = service
        .execute(ExecutionRequest::new("print(typeof leaked)"))
        .await
        .unwrap();
    assert_eq!(result.stdout, "undefined");
}

#[tokio::test]
async fn test_output_cap_is_reported() {
    let limits = ResourceLimits {
        max_output_bytes: 64,
        ..Default::default()
    };
    let service = v8_service_with_limits(AmbientMode::Isolated, limits);
    let result = service
        .execute(ExecutionRequest::new(r#"for (let i = 0; i < 1000; i++) print("line " + i);"#))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.len() <= 64);
    assert!(result.stdout.starts_with("line 0\nline 1\n"));
    assert!(result.stderr.contains("[output truncated after 64 bytes]"));
}

/// `process.env` is copied into the isolate when it is created, so this only
/// shows each request reads its own values. Reads of the live environment
/// while another request waits are covered in `coderun-sandbox/src/service.rs`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conflicting_requests_see_their_own_values() {
    let service = Arc::new(v8_service(AmbientMode::Process));
    let key = unique_env_key("CONFLICT");

    let tasks: Vec<_> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|value| {
            let service = Arc::clone(&service);
            let code = format!(
                r#"
const first = process.env["{key}"];
const end = Date.now() + 100;
while (Date.now() < end) {{}}
print(first, process.env["{key}"], process.argv[1]);
"#,
                key = key
            );
            let request = ExecutionRequest::new(code)
                .with_env(key.clone(), value)
                .with_arg(value);
            tokio::spawn(async move { (value, service.execute(request).await) })
        })
        .collect();

    for task in tasks {
        let (value, result) = task.await.unwrap();
        assert_eq!(result.unwrap().stdout, format!("{value} {value} {value}"));
    }
    assert!(std::env::var(&key).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_isolated_requests_run_concurrently() {
    let service = Arc::new(v8_service(AmbientMode::Isolated));

    let started = Instant::now();
    let tasks: Vec<_> = (0..3)
        .map(|n| {
            let service = Arc::clone(&service);
            let request = ExecutionRequest::new(
                r#"const end = Date.now() + 300; while (Date.now() < end) {} print(process.argv[1]);"#,
            )
            .with_arg(n.to_string());
            tokio::spawn(async move { (n, service.execute(request).await) })
        })
        .collect();

    for task in tasks {
        let (n, result) = task.await.unwrap();
        assert_eq!(result.unwrap().stdout, n.to_string());
    }
    assert!(started.elapsed() < Duration::from_millis(900));
}
