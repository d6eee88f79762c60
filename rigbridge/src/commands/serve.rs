//! `rigbridge serve`: HTTP upload surface over the pipeline.
//!
//! - `GET /`          upload page, or the startup error page when the host is unavailable
//! - `GET /health`    readiness as JSON (503 while unavailable)
//! - `POST /api/rig`  raw `.glb` body in, rigged `.glb` out (`?filename=<name>.glb`)
//!
//! Pipeline work runs on the blocking pool. Ctrl+C stops accepting requests
//! and cancels running stages.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rigbridge_core::config::ServeConfig;
use rigbridge_core::path_validation::sanitize_file_name;
use rigbridge_pipeline::{Pipeline, PipelineOptions, RigError};
use rigbridge_runner::{CancelToken, InterpreterEnvironment};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use super::AppContext;

const GLB_CONTENT_TYPE: &str = "model/gltf-binary";
const DEFAULT_UPLOAD_NAME: &str = "upload.glb";

/// Whether the host environment came up at startup.
pub enum Readiness {
    Ready(InterpreterEnvironment),
    Unavailable(String),
}

pub struct AppState {
    pub ctx: AppContext,
    pub readiness: Readiness,
    pub options: PipelineOptions,
    /// Fired on shutdown; every running stage watches it
    pub cancel: CancelToken,
}

#[derive(Debug, Deserialize)]
pub struct RigQuery {
    filename: Option<String>,
}

pub fn create_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/rig", post(rig_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn status_for(err: &RigError) -> StatusCode {
    match err {
        RigError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        e if e.is_environment() => StatusCode::SERVICE_UNAVAILABLE,
        RigError::StageTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &RigError) -> Response {
    (
        status_for(err),
        Json(serde_json::json!({ "error": err.user_message() })),
    )
        .into_response()
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const UPLOAD_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>rigbridge</title>
    <style>
        body { font-family: system-ui, sans-serif; margin: 2rem; max-width: 40rem; }
        #status { margin-top: 1rem; white-space: pre-wrap; }
    </style>
</head>
<body>
    <h1>rigbridge</h1>
    <p>Upload a 3D mesh (<code>.glb</code>) to get it back with a skeleton and skinning weights.
       Rigging can take several minutes.</p>
    <input type="file" id="mesh" accept=".glb">
    <button id="go">Rig it</button>
    <div id="status"></div>
    <script>
        document.getElementById('go').onclick = async () => {
            const file = document.getElementById('mesh').files[0];
            const status = document.getElementById('status');
            if (!file) { status.textContent = 'Choose a .glb file first.'; return; }
            status.textContent = 'Rigging...';
            const resp = await fetch('/api/rig?filename=' + encodeURIComponent(file.name), {
                method: 'POST', body: file,
            });
            if (!resp.ok) {
                const body = await resp.json().catch(() => ({ error: resp.statusText }));
                status.textContent = 'Error: ' + body.error;
                return;
            }
            const blob = await resp.blob();
            const link = document.createElement('a');
            link.href = URL.createObjectURL(blob);
            link.download = file.name.replace(/\.glb$/i, '') + '_rigged_final.glb';
            link.textContent = 'Download rigged mesh';
            status.textContent = '';
            status.appendChild(link);
        };
    </script>
</body>
</html>"#;

fn startup_error_page(reason: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>rigbridge - startup error</title></head>
<body style="font-family: system-ui, sans-serif; margin: 2rem;">
    <h1>Application startup error</h1>
    <p>{}</p>
    <p>Check the server logs for details.</p>
</body>
</html>"#,
        escape_html(reason)
    )
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    match &state.readiness {
        Readiness::Ready(_) => Html(UPLOAD_PAGE.to_string()),
        Readiness::Unavailable(reason) => Html(startup_error_page(reason)),
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.readiness {
        Readiness::Ready(env) => Json(serde_json::json!({
            "status": "ok",
            "ready": true,
            "version": env!("CARGO_PKG_VERSION"),
            "smoke_ok": env.smoke_ok,
            "device": state.options.device.to_string(),
        }))
        .into_response(),
        Readiness::Unavailable(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "ready": false,
                "reason": reason,
            })),
        )
            .into_response(),
    }
}

async fn rig_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RigQuery>,
    body: Bytes,
) -> Response {
    match rig_upload(state, query.filename, body).await {
        Ok((name, bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, GLB_CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{name}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Rig request failed");
            error_response(&e)
        }
    }
}

async fn rig_upload(
    state: Arc<AppState>,
    filename: Option<String>,
    body: Bytes,
) -> Result<(String, Vec<u8>), RigError> {
    if let Readiness::Unavailable(reason) = &state.readiness {
        return Err(RigError::EnvironmentUnavailable(reason.clone()));
    }
    if body.is_empty() {
        return Err(RigError::InvalidInput("Empty upload.".to_string()));
    }
    let name = sanitize_file_name(filename.as_deref().unwrap_or(DEFAULT_UPLOAD_NAME));

    tokio::task::spawn_blocking(move || rig_blocking(&state, &name, &body))
        .await
        .map_err(|e| RigError::Unexpected(format!("worker task failed: {e}")))?
}

fn rig_blocking(state: &AppState, name: &str, body: &[u8]) -> Result<(String, Vec<u8>), RigError> {
    let Readiness::Ready(env) = &state.readiness else {
        return Err(RigError::EnvironmentUnavailable("host not ready".to_string()));
    };
    let upload_dir = tempfile::Builder::new()
        .prefix("rigbridge_upload_")
        .tempdir()
        .map_err(|e| RigError::Unexpected(format!("could not create upload dir: {e}")))?;
    let input = upload_dir.path().join(name);
    fs::write(&input, body)
        .map_err(|e| RigError::Unexpected(format!("could not store upload: {e}")))?;

    // The result only lives until it is in the response body.
    let mut options = state.options.clone();
    options.output_dir = upload_dir.path().join("out");
    let pipeline = Pipeline::new(state.ctx.runner(env), &env.repo_root, options);
    let output = pipeline.process_upload(&input, &state.cancel)?;
    let bytes = fs::read(&output)
        .map_err(|e| RigError::Unexpected(format!("could not read result: {e}")))?;
    let out_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rigged_final.glb".to_string());
    Ok((out_name, bytes))
}

/// Resolve at startup (a failure only switches the server into its error page)
/// and serve until Ctrl+C.
pub fn cmd_serve(ctx: AppContext, listen: Option<String>) -> Result<()> {
    let serve_cfg = ServeConfig::from_env();
    let listen = listen.unwrap_or_else(|| serve_cfg.listen.clone());
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("Invalid listen address: {listen}"))?;

    let readiness = match ctx.resolve() {
        Ok(env) => Readiness::Ready(env),
        Err(e) => {
            tracing::error!(error = %e, "Host environment unavailable, serving startup error page");
            Readiness::Unavailable(e.user_message())
        }
    };
    let device = ctx.device(None)?;
    let options = ctx.pipeline_options(device, None, ctx.pipeline.run_diagnostic);
    let state = Arc::new(AppState {
        ctx,
        readiness,
        options,
        cancel: CancelToken::new(),
    });

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    rt.block_on(serve(state, addr, serve_cfg.max_upload_bytes()))
}

async fn serve(state: Arc<AppState>, addr: SocketAddr, max_upload_bytes: usize) -> Result<()> {
    let app = create_router(state.clone(), max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Serving rigbridge at http://{}", addr);

    let cancel = state.cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received shutdown signal, cancelling running stages"),
                Err(e) => tracing::warn!(error = %e, "Ctrl+C listener failed, shutting down"),
            }
            cancel.cancel();
        })
        .await
        .context("HTTP server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
