use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use pybox_core::config::SandboxConfig;
use pybox_core::test_utils::{FileRoute, FileServer, MockRuntime, ScriptedExit};
use pybox_core::ExecutionOrchestrator;
use pybox_server::{AppState, SandboxServer, ServerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

struct TestApp {
    router: Router,
    runtime: Arc<MockRuntime>,
    staging_root: TempDir,
}

fn app(runtime: MockRuntime) -> TestApp {
    let staging_root = tempfile::tempdir().unwrap();
    let mut config = SandboxConfig::default();
    config.workspace.staging_root = Some(staging_root.path().to_path_buf());
    config.workspace.download_timeout_secs = 5;

    let runtime = Arc::new(runtime);
    let orchestrator = Arc::new(ExecutionOrchestrator::new(runtime.clone(), &config).unwrap());
    let server = SandboxServer::with_config(
        AppState::new(orchestrator, runtime.clone()),
        ServerConfig::new().with_logging(false),
    );

    TestApp {
        router: server.build_router(),
        runtime,
        staging_root,
    }
}

async fn post_execute(router: &Router, body: Value) -> (StatusCode, Value) {
    send(
        router,
        Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_execute_hello_world() {
    let app = app(MockRuntime::new().with_logs("hi\n"));

    let (status, body) = post_execute(&app.router, json!({"code": "print('hi')", "timeout": 10})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["exit_code"], 0);
    assert_eq!(body["output"], "hi\n");
    assert_eq!(body["container_id"].as_str().unwrap().len(), 12);
    assert_eq!(body["generated_images"], json!([]));
    assert_eq!(body["timed_out"], false);
    assert!(body.get("error_message").is_none());
    assert!(app.runtime.live_units().is_empty());
}

#[tokio::test]
async fn test_execute_timeout() {
    let app = app(MockRuntime::new().with_exit(ScriptedExit::Timeout).with_logs("started\n"));

    let (status, body) =
        post_execute(&app.router, json!({"code": "while True: pass", "timeout": 2})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["timed_out"], true);
    assert_eq!(body["exit_code"], -1);
    assert_eq!(body["output"], "started\n");
    assert!(app.runtime.live_units().is_empty());
}

#[tokio::test]
async fn test_execute_in_code_error() {
    let app = app(
        MockRuntime::new()
            .with_exit(ScriptedExit::Code(1))
            .with_logs("ZeroDivisionError: division by zero\n"),
    );

    let (status, body) = post_execute(&app.router, json!({"code": "1/0"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["exit_code"], 1);
    assert!(body["output"].as_str().unwrap().contains("ZeroDivisionError"));
    assert!(body.get("error_message").is_none());
}

#[tokio::test]
async fn test_validation_errors_are_bad_requests() {
    let app = app(MockRuntime::new());

    let cases = vec![
        json!({"code": ""}),
        json!({"code": "   "}),
        json!({"code": "x = 1", "timeout": 0}),
        json!({"code": "x = 1", "timeout": 301}),
        json!({"code": "x = 1", "timeout": "soon"}),
        json!({"code": "x = 1", "work_dir": "/etc"}),
        json!({"code": "x = 1", "work_dir": "/data/../etc"}),
        json!({"code": "x = 1", "ref_files": [{"url": "not-a-valid-url"}]}),
        json!({"timeout": 5}),
    ];

    for case in cases {
        let (status, body) = post_execute(&app.router, case.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "case {}", case);
        assert!(body["error"].is_string(), "case {}", case);
        assert!(body["details"].is_string(), "case {}", case);
        assert!(body["timestamp"].is_string(), "case {}", case);
    }

    // Nothing was ever created.
    assert!(app.runtime.created_specs().is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = app(MockRuntime::new());
    let (status, _) = send(
        &app.router,
        Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .body(Body::from("{\"code\": "))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_failure_is_bad_request_and_cleaned() {
    let files = FileServer::start(vec![FileRoute::status("/gone.csv", 404)]).await;
    let app = app(MockRuntime::new());

    let (status, body) = post_execute(
        &app.router,
        json!({"code": "print(1)", "ref_files": [{"url": files.url("/gone.csv")}]}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].as_str().unwrap().contains("404"));
    assert!(app.runtime.created_specs().is_empty());
    assert_eq!(
        std::fs::read_dir(app.staging_root.path()).unwrap().count(),
        0
    );
}

#[tokio::test]
async fn test_ref_file_is_staged() {
    let files = FileServer::start(vec![FileRoute::ok("/data.csv", b"a,b\n1,2\n".to_vec())]).await;
    let app = app(MockRuntime::new().with_logs("2 rows\n"));

    let (status, body) = post_execute(
        &app.router,
        json!({
            "code": "print(open('input.csv').read())",
            "ref_files": [{"url": files.url("/data.csv"), "filename": "input.csv"}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(app.runtime.copy_ins().len(), 1);
    assert_eq!(
        std::fs::read_dir(app.staging_root.path()).unwrap().count(),
        0
    );
}

#[tokio::test]
async fn test_unusable_staging_root_is_500() {
    let app = app(MockRuntime::new());
    let mut config = SandboxConfig::default();
    config.workspace.staging_root = Some(app.staging_root.path().join("missing"));
    let orchestrator =
        Arc::new(ExecutionOrchestrator::new(app.runtime.clone(), &config).unwrap());
    let router = SandboxServer::with_config(
        AppState::new(orchestrator, app.runtime.clone()),
        ServerConfig::new().with_logging(false),
    )
    .build_router();

    let (status, body) = post_execute(&router, json!({"code": "print(1)"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
    assert!(body["details"].as_str().unwrap().contains("staging directory"));
    assert!(app.runtime.created_specs().is_empty());
}

#[tokio::test]
async fn test_runtime_unavailable_is_503() {
    let app = app(MockRuntime::new().with_create_failure());

    let (status, body) = post_execute(&app.router, json!({"code": "print(1)"})).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Execution runtime unavailable");
}

#[tokio::test]
async fn test_generated_images_are_returned() {
    let app = app(
        MockRuntime::new()
            .with_output_file("plot.png", vec![0x89, b'P', b'N', b'G'])
            .with_output_file("table.csv", b"a,b\n".to_vec()),
    );

    let (status, body) = post_execute(&app.router, json!({"code": "plot()"})).await;

    assert_eq!(status, StatusCode::OK);
    let images = body["generated_images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["filename"], "plot.png");
    assert_eq!(images[0]["size"], 4);
    assert_eq!(images[0]["content"], "iVBORw==");
}

#[tokio::test]
async fn test_health_states() {
    let healthy = app(MockRuntime::new());
    let (status, body) = send(&healthy.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["docker_connected"], true);
    assert_eq!(body["executor_image_ready"], true);
    assert_eq!(body["image"], "sandbox-executor");

    let degraded = app(MockRuntime::new().with_image_present(false));
    let (status, body) = send(&degraded.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["executor_image_ready"], false);

    let unhealthy = app(MockRuntime::new().with_unavailable());
    let (status, body) = send(&unhealthy.router, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["docker_connected"], false);
}

#[tokio::test]
async fn test_root() {
    let app = app(MockRuntime::new());
    let (status, body) = send(&app.router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn test_concurrent_requests_do_not_share_output() {
    let app = app(MockRuntime::new().with_echo_code());

    let mut handles = Vec::new();
    for i in 0..6 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            let code = format!("print({})", i);
            let (status, body) = post_execute(&router, json!({ "code": code })).await;
            (code, status, body)
        }));
    }

    for handle in handles {
        let (code, status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], code);
    }
    assert!(app.runtime.live_units().is_empty());
}
