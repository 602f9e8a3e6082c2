//! End-to-end tests against a real Docker daemon.
//!
//! These build the executor image on first use and start real containers,
//! so they are ignored by default. Run with `cargo test -- --ignored`.

use pybox_core::config::SandboxConfig;
use pybox_core::runtime::{ensure_image, BuildContext, DockerRuntime, RuntimeClient};
use pybox_core::{ExecutionOrchestrator, ExecutionRequest};
use pybox_types::ExecuteRequest;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn setup() -> (Arc<DockerRuntime>, ExecutionOrchestrator, SandboxConfig) {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut config = SandboxConfig::default();
    config.executor.build_context = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../docker");

    let runtime = Arc::new(
        DockerRuntime::connect(&config.docker)
            .await
            .expect("Docker daemon must be reachable for ignored tests"),
    );
    let context = BuildContext {
        context_dir: config.executor.build_context.clone(),
        dockerfile: config.executor.dockerfile_path.clone(),
    };
    ensure_image(runtime.as_ref(), &config.executor.image_name, &context)
        .await
        .expect("executor image must build");

    let orchestrator = ExecutionOrchestrator::new(runtime.clone(), &config).unwrap();
    (runtime, orchestrator, config)
}

fn validated(config: &SandboxConfig, request: ExecuteRequest) -> ExecutionRequest {
    ExecutionRequest::validate(&request, &config.request_policy()).unwrap()
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_docker_hello_world() {
    let (runtime, orchestrator, config) = setup().await;
    assert!(runtime.is_available().await);

    let report = orchestrator
        .execute(&validated(&config, ExecuteRequest::new("print('hi')").with_timeout(10)))
        .await
        .unwrap();

    assert!(report.outcome.success());
    assert_eq!(report.outcome.exit_code(), 0);
    assert!(report.outcome.output().contains("hi"));
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_docker_timeout_is_enforced() {
    let (_runtime, orchestrator, config) = setup().await;

    let started = Instant::now();
    let report = orchestrator
        .execute(&validated(
            &config,
            ExecuteRequest::new("import time\nprint('before', flush=True)\nwhile True: time.sleep(0.1)")
                .with_timeout(2),
        ))
        .await
        .unwrap();

    assert!(!report.outcome.success());
    assert!(report.outcome.timed_out());
    assert!(report.outcome.output().contains("before"));
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_docker_network_is_disabled() {
    let (_runtime, orchestrator, config) = setup().await;

    let code = "import socket\nsocket.create_connection(('1.1.1.1', 53), timeout=2)";
    let report = orchestrator
        .execute(&validated(&config, ExecuteRequest::new(code)))
        .await
        .unwrap();

    assert!(!report.outcome.success());
    assert_ne!(report.outcome.exit_code(), 0);
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_docker_image_artifact() {
    let (_runtime, orchestrator, config) = setup().await;

    let code = "\
import matplotlib
matplotlib.use('Agg')
import matplotlib.pyplot as plt
plt.plot([1, 2, 3])
plt.savefig('plot.png')
open('notes.txt', 'w').write('not an artifact')
";
    let report = orchestrator
        .execute(&validated(&config, ExecuteRequest::new(code).with_timeout(60)))
        .await
        .unwrap();

    assert!(report.outcome.success(), "{}", report.outcome.output());
    assert_eq!(report.artifacts.len(), 1);
    assert_eq!(report.artifacts[0].filename, "plot.png");
    assert!(report.artifacts[0].size > 0);
}
