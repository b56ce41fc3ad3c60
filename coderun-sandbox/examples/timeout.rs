//! Timeout enforcement against a snippet that never returns

#[cfg(feature = "v8")]
use coderun_sandbox::{ExecutionRequest, ResourceLimits, SandboxService, V8Interpreter};
#[cfg(feature = "v8")]
use std::time::Instant;

#[cfg(feature = "v8")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== V8 Timeout Test ===\n");

    let limits = ResourceLimits::default().with_max_execution_time(1.0);
    let service = SandboxService::with_limits(V8Interpreter::with_limits(&limits), limits);

    println!("1. Code that completes quickly:");
    let quick_code = r#"
        let sum = 0;
        for (let i = 0; i < 1000; i++) {
            sum += i;
        }
        console.log("Sum:", sum);
    "#;
    let result = service.execute(ExecutionRequest::new(quick_code)).await?;
    println!(
        "   Result: exit_code={}, duration={}ms, stdout={:?}",
        result.exit_code, result.execution_time_ms, result.stdout
    );

    println!("\n2. Infinite loop, asking for 30 seconds (clamped to 1):");
    let started = Instant::now();
    let request = ExecutionRequest::new("while (true) { Math.random(); }").with_timeout(30.0);
    let result = service.execute(request).await?;
    println!(
        "   Result: exit_code={}, duration={}ms, returned after {:?}",
        result.exit_code,
        result.execution_time_ms,
        started.elapsed()
    );
    print!("   stderr: {}", result.stderr);

    if result.timed_out() {
        println!("\n✓ Timeout enforcement working!");
    } else {
        println!("\n✗ Timeout NOT enforced - potential security issue!");
    }

    Ok(())
}

#[cfg(not(feature = "v8"))]
fn main() {
    eprintln!("This example requires the 'v8' feature.");
    eprintln!("Run with: cargo run --example timeout --features v8");
    std::process::exit(1);
}
