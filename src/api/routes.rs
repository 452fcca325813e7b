use std::future::Future;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::{Json, Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::api::models::{
    CompileRequest, ExecuteRequest, ExportRequest, ExtractRequest, ExtractResponse, HistoryListItem,
    SelectorScrapeRequest, SelectorScrapeResponse,
};
use crate::api::response;
use crate::error::{AppError, Result};
use crate::export::ExportFormat;
use crate::pipeline::{Pipeline, TargetRequest};
use crate::row::Row;
use crate::selectors::PageScraper;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/extract", post(extract_handler))
        .route("/api/compile", post(compile_handler))
        .route("/api/execute", post(execute_handler))
        .route("/api/scrape", post(selector_scrape_handler))
        .route("/api/export/:format", post(export_handler))
        .route("/api/history", get(list_history).delete(clear_history))
        .route("/api/history/:id", get(get_history).delete(delete_history))
        .route("/api/history/:id/export/:format", get(export_history))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

/// Drives `run` to completion, cancelling `cancel` once `limit` passes so
/// unfinished URLs settle as failures instead of being lost.
async fn bounded_run<F: Future>(limit: Duration, cancel: &CancellationToken, run: F) -> F::Output {
    // Dropping the handler mid-run cancels in-flight work too.
    let _guard = cancel.clone().drop_guard();
    tokio::pin!(run);

    tokio::select! {
        output = &mut run => output,
        _ = tokio::time::sleep(limit) => {
            warn!(limit = ?limit, "run timed out, cancelling outstanding URLs");
            cancel.cancel();
            run.await
        }
    }
}

async fn extract_handler(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<impl IntoResponse> {
    let start = Instant::now();
    let request = TargetRequest::new(req.urls.into_vec(), &req.query)?;
    info!(urls = request.urls().len(), query = request.query(), "processing extraction request");

    let pipeline = Pipeline::from_config(&state.config, state.http.clone())?;
    let cancel = CancellationToken::new();
    let output = bounded_run(
        state.config.run_timeout,
        &cancel,
        pipeline.run_extraction(&request, &cancel),
    )
    .await?;

    let history_id = if req.persist {
        let rows: Vec<Row> = output
            .results
            .iter()
            .flat_map(|result| result.rows().iter().cloned())
            .collect();
        let mut history = state.history.lock().await;
        let record = history.create(request.urls(), request.query(), rows).await?;
        Some(record.id)
    } else {
        None
    };

    info!(elapsed = ?start.elapsed(), items = output.summary.total_items_extracted, "extraction request done");
    Ok(response::success(ExtractResponse { output, history_id }))
}

async fn compile_handler(
    State(state): State<AppState>,
    Json(req): Json<CompileRequest>,
) -> Result<impl IntoResponse> {
    let start = Instant::now();
    let request = TargetRequest::new(req.urls.into_vec(), &req.query)?;
    let pipeline = Pipeline::from_config(&state.config, state.http.clone())?;

    let compiled = tokio::time::timeout(state.config.run_timeout, pipeline.compile(&request))
        .await
        .map_err(|_| AppError::Cancelled)??;

    info!(elapsed = ?start.elapsed(), "compile request done");
    Ok(response::success(compiled))
}

async fn execute_handler(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<impl IntoResponse> {
    let start = Instant::now();
    let request = TargetRequest::new(req.urls.into_vec(), &req.query)?;
    let pipeline = Pipeline::from_config(&state.config, state.http.clone())?;

    let cancel = CancellationToken::new();
    let output = bounded_run(
        state.config.run_timeout,
        &cancel,
        pipeline.execute(&request, &req.firecrawl_config, &cancel),
    )
    .await;

    info!(elapsed = ?start.elapsed(), items = output.summary.total_items_extracted, "execute request done");
    Ok(response::success(output))
}

async fn selector_scrape_handler(
    State(state): State<AppState>,
    Json(req): Json<SelectorScrapeRequest>,
) -> Result<impl IntoResponse> {
    let start = Instant::now();
    let request = TargetRequest::new(vec![req.url], &req.query)?;
    let [url] = request.urls() else {
        return Err(AppError::InvalidRequest("selector scrape takes a single URL".to_string()));
    };
    info!(url = %url, query = request.query(), "processing selector scrape");

    let scraper = PageScraper::new(state.http.clone(), state.config.scrape_timeout);
    let scrape = scraper.scrape(url, request.query()).await?;

    let history_id = if req.persist {
        let mut history = state.history.lock().await;
        let record = history
            .create(request.urls(), request.query(), scrape.rows.clone())
            .await?;
        Some(record.id)
    } else {
        None
    };

    info!(elapsed = ?start.elapsed(), items = scrape.total_items, "selector scrape request done");
    Ok(response::success(SelectorScrapeResponse { scrape, history_id }))
}

async fn export_handler(
    Path(format): Path<String>,
    Json(req): Json<ExportRequest>,
) -> Result<Response> {
    let format: ExportFormat = format.parse()?;
    export_rows(format, &req.rows)
}

fn export_rows(format: ExportFormat, rows: &[Row]) -> Result<Response> {
    let now = Utc::now();
    let body = format.render(rows, now)?;
    info!(format = format.extension(), rows = rows.len(), bytes = body.len(), "export rendered");
    Ok(response::attachment(format.content_type(), &format.file_name(now), body))
}

async fn list_history(State(state): State<AppState>) -> impl IntoResponse {
    let history = state.history.lock().await;
    let items: Vec<HistoryListItem> = history.list().iter().map(HistoryListItem::from).collect();
    response::success(items)
}

async fn get_history(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    let history = state.history.lock().await;
    let record = history
        .get(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("history record {}", id)))?;
    Ok(response::success(record))
}

async fn delete_history(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    state.history.lock().await.delete(id).await?;
    info!(%id, "history record deleted");
    Ok(response::success(id))
}

async fn clear_history(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.history.lock().await.clear().await?;
    Ok(response::success(()))
}

async fn export_history(
    State(state): State<AppState>,
    Path((id, format)): Path<(Uuid, String)>,
) -> Result<Response> {
    let format: ExportFormat = format.parse()?;
    let history = state.history.lock().await;
    let record = history
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("history record {}", id)))?;
    export_rows(format, &record.results)
}
