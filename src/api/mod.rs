//! The HTTP façade: query, write, free and debug endpoints.
//!
//! Queries are batched: one request carries many sub-queries and every
//! sub-query fails or succeeds on its own, so a partially successful
//! batch still returns its good results.

use crate::core::{Float, Result, StoreError, NAN};
use crate::ingest::LineDecoder;
use crate::storage::{last_checkpoint, MemoryStore, Selector, SelectorElement};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Shared state of all handlers.
pub struct ApiState {
    store: Arc<MemoryStore>,
    decoder: LineDecoder,
    dev: bool,
}

impl ApiState {
    pub fn new(store: Arc<MemoryStore>, dev: bool) -> Self {
        Self {
            decoder: LineDecoder::new(Arc::clone(&store)),
            store,
            dev,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A batch query over one cluster and time range.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiQueryRequest {
    pub cluster: String,
    pub from: i64,
    pub to: i64,
    #[serde(default = "default_true")]
    pub with_stats: bool,
    #[serde(default = "default_true")]
    pub with_data: bool,
    #[serde(default = "default_true")]
    pub with_padding: bool,
    #[serde(default)]
    pub queries: Vec<ApiQuery>,
    #[serde(default)]
    pub for_all_nodes: Option<Vec<String>>,
}

/// One sub-query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiQuery {
    pub metric: String,
    #[serde(rename = "host")]
    pub hostname: String,
    #[serde(default, rename = "aggreg")]
    pub aggregate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_by: Option<Float>,
    #[serde(default)]
    pub resolution: i64,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_ids: Vec<String>,
    #[serde(default, rename = "subtype", skip_serializing_if = "Option::is_none")]
    pub subtype_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtype_ids: Vec<String>,
}

/// Results come in the same order as the sub-queries; expanded
/// `for-all-nodes` queries are echoed back in `queries`.
#[derive(Debug, Default, Serialize)]
pub struct ApiQueryResponse {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<ApiQuery>,
    pub results: Vec<Vec<ApiMetricData>>,
}

/// Data and statistics of one selector read.
#[derive(Debug, Default, Serialize)]
pub struct ApiMetricData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub from: i64,
    pub to: i64,
    pub resolution: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Float>>,
    pub avg: Float,
    pub min: Float,
    pub max: Float,
}

impl ApiMetricData {
    fn add_stats(&mut self) {
        let Some(data) = &self.data else { return };

        let mut n = 0usize;
        let (mut sum, mut min, mut max) = (0.0f64, f64::INFINITY, f64::NEG_INFINITY);
        for x in data {
            if x.is_nan() {
                continue;
            }
            n += 1;
            sum += x.to_f64();
            min = min.min(x.to_f64());
            max = max.max(x.to_f64());
        }

        if n > 0 {
            self.avg = Float::from(sum / n as f64);
            self.min = Float::from(min);
            self.max = Float::from(max);
        } else {
            self.avg = NAN;
            self.min = NAN;
            self.max = NAN;
        }
    }

    fn scale_by(&mut self, factor: Float) {
        if factor == Float(0.0) || factor == Float(1.0) {
            return;
        }

        self.avg *= factor;
        self.min *= factor;
        self.max *= factor;
        if let Some(data) = &mut self.data {
            for x in data {
                *x *= factor;
            }
        }
    }

    /// Left-pad with NaN so the first sample lines up with the request's
    /// `from` on the metric's frequency grid.
    fn pad_data_with_null(&mut self, store: &MemoryStore, from: i64, metric: &str) {
        let Some(config) = store.metric_config(metric) else {
            return;
        };
        let Some(data) = &mut self.data else { return };

        if (self.from / config.frequency) > (from / config.frequency) {
            let pad_front = ((self.from / config.frequency) - (from / config.frequency)) as usize;
            let mut padded = Vec::with_capacity(pad_front + data.len());
            padded.resize(pad_front, NAN);
            padded.append(data);
            *data = padded;
        }
    }
}

/// Build the selectors a sub-query addresses. With aggregation (or no
/// type at all) that is a single selector with groups over the ids;
/// without, one selector per id combination.
fn build_selectors(cluster: &str, query: &ApiQuery) -> Vec<Selector> {
    fn id_element(prefix: &str, ids: &[String]) -> SelectorElement {
        if ids.len() == 1 {
            SelectorElement::String(format!("{prefix}{}", ids[0]))
        } else {
            SelectorElement::Group(ids.iter().map(|id| format!("{prefix}{id}")).collect())
        }
    }

    if query.aggregate || query.type_name.is_none() {
        let mut selector = vec![
            SelectorElement::String(cluster.to_string()),
            SelectorElement::String(query.hostname.clone()),
        ];
        if let Some(type_name) = &query.type_name {
            selector.push(id_element(type_name, &query.type_ids));
            if let Some(subtype_name) = &query.subtype_name {
                selector.push(id_element(subtype_name, &query.subtype_ids));
            }
        }
        return vec![selector];
    }

    let Some(type_name) = &query.type_name else {
        return Vec::new();
    };
    let mut selectors = Vec::new();
    for type_id in &query.type_ids {
        match &query.subtype_name {
            Some(subtype_name) => {
                for subtype_id in &query.subtype_ids {
                    selectors.push(vec![
                        SelectorElement::String(cluster.to_string()),
                        SelectorElement::String(query.hostname.clone()),
                        SelectorElement::String(format!("{type_name}{type_id}")),
                        SelectorElement::String(format!("{subtype_name}{subtype_id}")),
                    ]);
                }
            },
            None => selectors.push(vec![
                SelectorElement::String(cluster.to_string()),
                SelectorElement::String(query.hostname.clone()),
                SelectorElement::String(format!("{type_name}{type_id}")),
            ]),
        }
    }
    selectors
}

async fn handle_query(
    State(state): State<Arc<ApiState>>,
    Json(mut req): Json<ApiQueryRequest>,
) -> Json<ApiQueryResponse> {
    let mut response = ApiQueryResponse::default();

    if let Some(metrics) = req.for_all_nodes.take() {
        for node in state.store.list_children(&[&req.cluster]) {
            for metric in &metrics {
                let query = ApiQuery {
                    metric: metric.clone(),
                    hostname: node.clone(),
                    ..ApiQuery::default()
                };
                req.queries.push(query.clone());
                response.queries.push(query);
            }
        }
    }

    for query in &req.queries {
        let mut results = Vec::new();
        for selector in build_selectors(&req.cluster, query) {
            let mut data = ApiMetricData::default();
            match state
                .store
                .read(&selector, &query.metric, req.from, req.to, query.resolution)
            {
                Ok((values, from, to, resolution)) => {
                    data.from = from;
                    data.to = to;
                    data.resolution = resolution;
                    data.data = Some(values);
                },
                Err(err) => {
                    data.error = Some(err.to_string());
                    results.push(data);
                    continue;
                },
            }

            if req.with_stats {
                data.add_stats();
            }
            if let Some(factor) = query.scale_by {
                data.scale_by(factor);
            }
            if req.with_padding {
                data.pad_data_with_null(&state.store, req.from, &query.metric);
            }
            if !req.with_data {
                data.data = None;
            }
            results.push(data);
        }
        response.results.push(results);
    }

    Json(response)
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    #[serde(default)]
    cluster: String,
}

async fn handle_write(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<WriteParams>,
    body: String,
) -> Response {
    match state.decoder.decode(&body, &params.cluster) {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => {
            tracing::warn!("write request failed: {}", err);
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        },
    }
}

#[derive(Debug, Deserialize)]
struct FreeParams {
    to: i64,
}

async fn handle_free(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<FreeParams>,
    Json(selectors): Json<Vec<Vec<String>>>,
) -> Response {
    // Never free data that has not been checkpointed yet.
    let horizon = params.to.min(last_checkpoint());

    let mut freed = 0;
    for selector in &selectors {
        let parts: Vec<&str> = selector.iter().map(String::as_str).collect();
        match state.store.free(&parts, horizon) {
            Ok(n) => freed += n,
            Err(err) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            },
        }
    }

    (StatusCode::OK, format!("buffers freed: {freed}\n")).into_response()
}

#[derive(Debug, Deserialize)]
struct DebugParams {
    #[serde(default)]
    selector: String,
}

async fn handle_debug(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<DebugParams>,
) -> Response {
    let selector: Vec<&str> = if params.selector.is_empty() {
        Vec::new()
    } else {
        params.selector.split(':').collect()
    };

    let mut out = Vec::new();
    match state.store.debug_dump(&mut out, &selector) {
        Ok(()) => (StatusCode::OK, String::from_utf8_lossy(&out).into_owned()).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

/// Build the API router.
pub fn router(state: Arc<ApiState>) -> Router {
    let dev = state.dev;
    let mut app = Router::new()
        .route("/api/query", post(handle_query))
        .route("/api/write", post(handle_write))
        .route("/api/free", post(handle_free))
        .route("/api/debug", axum::routing::get(handle_debug))
        .with_state(state);

    if dev {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serve the API until the shutdown future resolves; in-flight requests
/// drain before this returns.
pub async fn serve(
    address: &str,
    state: Arc<ApiState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(address).await.map_err(|e| {
        StoreError::config(format!("cannot bind API server to {address}: {e}"))
    })?;
    tracing::info!("API endpoint listening on {}", address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
