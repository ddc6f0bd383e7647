use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::header::{CONTENT_LOCATION, CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{Instrument, field, info_span, warn};

use crate::KittyError;

use super::{Balances, HttpConfig, KittyLookup, KittyService, KittyUpdate, NewKitty};

#[derive(Clone)]
pub struct KittyHttpState {
    service: Arc<KittyService>,
    trust_forwarded_for: bool,
    allowed_origins: Vec<String>,
}

impl KittyHttpState {
    pub fn new(service: Arc<KittyService>) -> Self {
        Self {
            service,
            trust_forwarded_for: false,
            allowed_origins: Vec::new(),
        }
    }

    pub fn with_http_config(self, config: &HttpConfig) -> Self {
        self.with_trust_forwarded_for(config.trust_forwarded_for)
            .with_allowed_origins(config.allowed_origins.iter().cloned())
    }

    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_forwarded_for {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(ip) = forwarded {
                return ip.to_string();
            }
        }
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
    retryable: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Body of `PUT /kitty`; a present `name` turns the create into an update.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KittyPutBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    balances: Balances,
    #[serde(default)]
    baseline: Balances,
    #[serde(default)]
    baseline_timestamp: u64,
    #[serde(default)]
    party_size: u32,
    #[serde(default)]
    split_ratio: i64,
    #[serde(default)]
    config: Value,
}

impl KittyPutBody {
    fn into_update(self, name: String) -> KittyUpdate {
        KittyUpdate {
            name,
            baseline: self.baseline,
            baseline_timestamp: self.baseline_timestamp,
            target: self.balances,
            party_size: self.party_size,
            split_ratio: self.split_ratio,
            config: self.config,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KittyBalancesResponse {
    name: String,
    balances: Balances,
    last_update: u64,
}

#[derive(Debug, Deserialize)]
struct SinceQuery {
    since: Option<u64>,
}

pub fn router(state: KittyHttpState) -> Router {
    let cors = cors_layer(&state.allowed_origins);
    let router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/kitty", put(put_kitty))
        .route(
            "/kitty/:name",
            put(put_named_kitty).get(get_kitty).delete(delete_kitty),
        )
        .with_state(state);

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::PUT, Method::DELETE])
            .allow_headers([CONTENT_TYPE])
            .expose_headers([CONTENT_LOCATION]),
    )
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn metrics(State(state): State<KittyHttpState>) -> Json<super::ObservabilitySnapshot> {
    Json(state.service.observability())
}

async fn put_kitty(
    State(state): State<KittyHttpState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<KittyPutBody>, JsonRejection>,
) -> Response {
    traced("PUT", "/kitty", async move {
        let Json(body) = body.map_err(invalid_body)?;
        let ip = state.client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));

        if let Some(name) = body.name.clone() {
            let updated = state
                .service
                .update_kitty(body.into_update(name), &ip)
                .await?;
            return Ok(balances_response(
                StatusCode::OK,
                updated.name.to_string(),
                updated.balances,
                updated.last_update,
            ));
        }

        let created = state
            .service
            .create_kitty(
                NewKitty {
                    balances: body.balances,
                    party_size: body.party_size,
                    split_ratio: body.split_ratio,
                    config: body.config,
                },
                &ip,
            )
            .await?;
        Ok(balances_response(
            StatusCode::CREATED,
            created.name.to_string(),
            created.balances,
            created.last_update,
        ))
    })
    .await
}

async fn put_named_kitty(
    State(state): State<KittyHttpState>,
    Path(name): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<KittyPutBody>, JsonRejection>,
) -> Response {
    traced("PUT", "/kitty/:name", async move {
        let Json(body) = body.map_err(invalid_body)?;
        let ip = state.client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
        let updated = state
            .service
            .update_kitty(body.into_update(name), &ip)
            .await?;
        Ok(balances_response(
            StatusCode::OK,
            updated.name.to_string(),
            updated.balances,
            updated.last_update,
        ))
    })
    .await
}

async fn get_kitty(
    State(state): State<KittyHttpState>,
    Path(name): Path<String>,
    query: Result<Query<SinceQuery>, QueryRejection>,
) -> Response {
    traced("GET", "/kitty/:name", async move {
        let Query(query) = query.map_err(|rejection| KittyError::InvalidRequest {
            reason: rejection.body_text(),
        })?;
        match state.service.get_kitty(&name, query.since).await? {
            KittyLookup::Found(record) => Ok((StatusCode::OK, Json(record)).into_response()),
            KittyLookup::NotModified => Ok(StatusCode::NOT_MODIFIED.into_response()),
        }
    })
    .await
}

async fn delete_kitty(State(state): State<KittyHttpState>, Path(name): Path<String>) -> Response {
    traced("DELETE", "/kitty/:name", async move {
        state.service.delete_kitty(&name).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    })
    .await
}

async fn traced<F>(method: &'static str, route: &'static str, handler: F) -> Response
where
    F: Future<Output = Result<Response, KittyError>>,
{
    let span = info_span!("kitty.request", method, route, status = field::Empty);
    let response = match handler.instrument(span.clone()).await {
        Ok(response) => response,
        Err(err) => map_kitty_error(err),
    };
    span.record("status", response.status().as_u16());
    response
}

fn balances_response(
    status: StatusCode,
    name: String,
    balances: Balances,
    last_update: u64,
) -> Response {
    let location = HeaderValue::from_str(&name).ok();
    let mut response = (
        status,
        Json(KittyBalancesResponse {
            name,
            balances,
            last_update,
        }),
    )
        .into_response();
    if let Some(location) = location {
        response.headers_mut().insert(CONTENT_LOCATION, location);
    }
    response
}

fn invalid_body(rejection: JsonRejection) -> KittyError {
    KittyError::InvalidRequest {
        reason: rejection.body_text(),
    }
}

fn map_kitty_error(err: KittyError) -> Response {
    let status = match &err {
        KittyError::InvalidName { .. }
        | KittyError::InvalidRequest { .. }
        | KittyError::MissingCurrencyBaseline { .. }
        | KittyError::MissingCurrencyTarget { .. }
        | KittyError::FutureTimestamp { .. } => StatusCode::BAD_REQUEST,
        KittyError::NotFound { .. } => StatusCode::NOT_FOUND,
        KittyError::FutureBaseline { .. } => StatusCode::CONFLICT,
        KittyError::Overflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        KittyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        KittyError::NameExhausted | KittyError::StorageUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        KittyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let retry_after_secs = match &err {
        KittyError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
        _ => None,
    };
    if status.is_server_error() {
        warn!(code = err.code(), error = %err, "kitty request failed");
    }

    let body = ErrorResponse {
        error: ErrorDetail {
            code: err.code(),
            message: err.to_string(),
            currency: err.currency().map(str::to_string),
            retry_after_secs,
            retryable: err.is_retryable(),
        },
    };
    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = retry_after_secs {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_map_to_500_without_retry_after() {
        let response = map_kitty_error(KittyError::Internal {
            message: "os randomness unavailable".to_string(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }

    #[test]
    fn updates_carry_content_location_too() {
        let response = balances_response(
            StatusCode::OK,
            "happy-otter".to_string(),
            Balances::new(),
            10,
        );
        assert_eq!(response.status(), StatusCode::OK);
        let location = response.headers().get(CONTENT_LOCATION);
        assert_eq!(location, Some(&HeaderValue::from_static("happy-otter")));
    }
}
