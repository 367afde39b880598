// Integration tests for the minirpc binary
//
// Servers run inside the test process on ephemeral loopback ports; the
// binary is invoked as a child process.

use std::process::{Child, Command, Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use minirpc_cli::{calculator_router, CALCULATOR_SERVICE};
use minirpc_registry::{CoordinatorServer, MemoryCoordinator, ServiceRegistry};
use minirpc_server::{RpcServer, ServerConfig};

// ============================================================================
// Test Helpers
// ============================================================================

async fn start_calculator() -> String {
    let server = RpcServer::bind("127.0.0.1:0", calculator_router(), ServerConfig::default())
        .await
        .unwrap();
    let endpoint = server.advertised_endpoint().unwrap();
    tokio::spawn(server.run());
    endpoint
}

/// Run the binary off the runtime so in-process servers keep serving.
async fn minirpc(args: &[&str]) -> Output {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    tokio::task::spawn_blocking(move || {
        Command::new(env!("CARGO_BIN_EXE_minirpc"))
            .args(&args)
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

/// Coordination service in the test process; returns its address and a
/// registry on the same namespace.
async fn start_coordinator() -> (String, ServiceRegistry) {
    let ensemble = MemoryCoordinator::new();
    let server = CoordinatorServer::bind("127.0.0.1:0", ensemble.clone()).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.run());
    (addr, ServiceRegistry::new(Arc::new(ensemble.connect())))
}

fn spawn_minirpc(args: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_minirpc"))
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

/// Poll until `service` has exactly `count` registered endpoints.
async fn wait_for_endpoints(registry: &ServiceRegistry, service: &str, count: usize) -> Vec<String> {
    for _ in 0..500 {
        let endpoints = registry.get_service_endpoints(service).await.unwrap();
        if endpoints.len() == count {
            return endpoints;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {} endpoints", service, count);
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

// ============================================================================
// call
// ============================================================================

#[tokio::test]
async fn test_call_prints_raw_result() {
    let endpoint = start_calculator().await;

    let output = minirpc(&["call", "CalculatorService", "add", "-e", &endpoint, "-p", "[4, 5]"]).await;
    assert!(output.status.success());
    assert_eq!(stdout(&output), "9");

    let output = minirpc(&["call", "CalculatorService", "sub", "-e", &endpoint, "--params", "[4, 5]"]).await;
    assert!(output.status.success());
    assert_eq!(stdout(&output), "-1");
}

#[tokio::test]
async fn test_call_unknown_method_fails() {
    let endpoint = start_calculator().await;

    let output = minirpc(&["call", "CalculatorService", "mul", "-e", &endpoint, "-p", "[4, 5]"]).await;
    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("404"));
}

#[tokio::test]
async fn test_call_rejects_non_array_params() {
    let endpoint = start_calculator().await;

    let output = minirpc(&["call", "CalculatorService", "add", "-e", &endpoint, "-p", "{\"a\": 1}"]).await;
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_call_unreachable_endpoint() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    drop(listener);

    let output = minirpc(&["call", "CalculatorService", "add", "-e", &endpoint, "-p", "[1, 2]"]).await;
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_call_needs_exactly_one_target() {
    let output = minirpc(&["call", "CalculatorService", "add", "-p", "[1, 2]"]).await;
    assert!(!output.status.success());

    let output = minirpc(&[
        "call",
        "CalculatorService",
        "add",
        "-e",
        "127.0.0.1:1",
        "-r",
        "127.0.0.1:2",
    ])
    .await;
    assert!(!output.status.success());
}

// ============================================================================
// discovery across processes
// ============================================================================

#[tokio::test]
async fn test_serve_advertises_and_call_discovers() {
    let (coordinator, registry) = start_coordinator().await;

    let mut server = spawn_minirpc(&["serve", "-b", "127.0.0.1:0", "--registry", &coordinator]);
    let endpoints = wait_for_endpoints(&registry, CALCULATOR_SERVICE, 1).await;
    assert!(endpoints[0].starts_with("127.0.0.1:"));

    let output = minirpc(&[
        "call",
        CALCULATOR_SERVICE,
        "add",
        "-p",
        "[4, 5]",
        "--registry",
        &coordinator,
        "--policy",
        "random",
    ])
    .await;
    assert!(output.status.success());
    assert_eq!(stdout(&output), "9");

    // A killed server never unregisters; its session ending does it
    server.kill().unwrap();
    server.wait().unwrap();
    wait_for_endpoints(&registry, CALCULATOR_SERVICE, 0).await;

    let output = minirpc(&["call", CALCULATOR_SERVICE, "add", "-p", "[4, 5]", "-r", &coordinator]).await;
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_serve_with_unreachable_registry_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let output = minirpc(&["serve", "-b", "127.0.0.1:0", "--registry", &addr]).await;
    assert!(!output.status.success());
}

// ============================================================================
// demo
// ============================================================================

#[tokio::test]
async fn test_demo_runs_to_completion() {
    let output = minirpc(&["demo", "--servers", "2", "--calls", "4", "--policy", "weighted:3,1"]).await;
    assert!(output.status.success());

    let out = stdout(&output);
    assert!(out.contains("add(3, 30) = 33"));
    assert!(out.contains("policy: weighted:3,1"));
    assert!(out.contains("3 calls"));
    assert!(out.contains("1 calls"));
}

#[tokio::test]
async fn test_demo_rejects_unknown_policy() {
    let output = minirpc(&["demo", "--policy", "fastest"]).await;
    assert!(!output.status.success());
}
