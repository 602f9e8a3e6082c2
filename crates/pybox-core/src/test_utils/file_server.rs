// src/test_utils/file_server.rs
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// A path served by [`FileServer`].
#[derive(Debug, Clone)]
pub struct FileRoute {
    pub path: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FileRoute {
    pub fn ok(path: &str, body: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            status: 200,
            body,
        }
    }

    pub fn status(path: &str, status: u16) -> Self {
        Self {
            path: path.to_string(),
            status,
            body: Vec::new(),
        }
    }
}

#[derive(Clone)]
struct FileServerState {
    routes: Arc<HashMap<String, FileRoute>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

async fn serve_file(State(state): State<FileServerState>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    *state.hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    match state.routes.get(&path) {
        Some(route) => {
            let status = StatusCode::from_u16(route.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, route.body.clone()).into_response()
        }
        None => {
            log::debug!("File server has no route for {}", path);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Local HTTP server for reference file downloads. Unknown paths get 404.
pub struct FileServer {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FileServer {
    pub async fn start(routes: Vec<FileRoute>) -> Self {
        let state = FileServerState {
            routes: Arc::new(routes.into_iter().map(|r| (r.path.clone(), r)).collect()),
            hits: Arc::new(Mutex::new(HashMap::new())),
        };
        let hits = state.hits.clone();

        let app = Router::new().fallback(serve_file).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap_or_else(|e| {
            panic!("Failed to bind file server to 127.0.0.1:0. Error: {}", e);
        });
        let addr = listener.local_addr().unwrap();
        log::info!("Test file server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap_or_else(|e| log::error!("Test file server error: {}", e));
        });

        Self {
            addr,
            hits,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of requests received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
