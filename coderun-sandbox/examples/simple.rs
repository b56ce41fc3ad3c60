//! Simple sandbox example - run a few snippets and print their results

#[cfg(feature = "v8")]
use coderun_sandbox::{ExecutionRequest, ExecutionResult, SandboxService, V8Interpreter};

#[cfg(feature = "v8")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let service = SandboxService::new(V8Interpreter::new());

    println!("=== Sandbox Service Example ===\n");
    println!("Runtime: {}\n", service.runtime_name());

    // Example 1: Hello world
    println!("Example 1: print");
    let request = ExecutionRequest::new(r#"print("Hello from the sandbox!")"#);
    show(service.execute(request).await?);

    // Example 2: Keyword options
    println!("\nExample 2: sep / end / file");
    let request = ExecutionRequest::new(
        r#"
        print(1, 2, 3, { sep: ", ", end: ".\n" });
        print("to stderr", { file: "stderr" });
        "#,
    );
    show(service.execute(request).await?);

    // Example 3: Arguments and environment
    println!("\nExample 3: process.argv and process.env");
    let request = ExecutionRequest::new(
        r#"print(process.argv.join(" "), "/", process.env.GREETING)"#,
    )
    .with_arg("--count")
    .with_arg("3")
    .with_env("GREETING", "hi");
    show(service.execute(request).await?);

    // Example 4: Exception
    println!("\nExample 4: thrown error");
    let request = ExecutionRequest::new(r#"print("partial"); null.property;"#);
    show(service.execute(request).await?);

    Ok(())
}

#[cfg(feature = "v8")]
fn show(result: ExecutionResult) {
    println!("  stdout: {:?}", result.stdout);
    println!("  stderr: {:?}", result.stderr);
    println!(
        "  Result: exit_code={} duration={}ms error={:?}",
        result.exit_code, result.execution_time_ms, result.error
    );
}

#[cfg(not(feature = "v8"))]
fn main() {
    eprintln!("This example requires the 'v8' feature.");
    eprintln!("Run with: cargo run --example simple --features v8");
    std::process::exit(1);
}
