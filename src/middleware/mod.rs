use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
    classify::{ServerErrorsAsFailures, SharedClassifier},
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{Level, Span};

use crate::models::Role;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Вызывающий пользователь. Аутентификацию делает шлюз перед сервисом,
/// сюда приходят уже проверенные id и роль.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unauthorized(&'static str);

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.0 }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
        };

        let user_id = header(USER_ID_HEADER)
            .ok_or(Unauthorized("missing user id"))?
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(Unauthorized("invalid user id"))?;

        // Без заголовка роли считаем обычным пользователем
        let role = match header(USER_ROLE_HEADER) {
            Some(raw) => raw.parse::<Role>().map_err(|_| Unauthorized("invalid user role"))?,
            None => Role::User,
        };

        Ok(AuthUser { user_id, role })
    }
}

/// Последовательные id запросов в пределах процесса.
#[derive(Clone, Default)]
pub struct CounterRequestId {
    next: Arc<AtomicU64>,
}

impl MakeRequestId for CounterRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req-{id}").parse().ok().map(RequestId::new)
    }
}

/// Спан запроса с request id, чтобы все логи сервиса внутри него были связаны.
#[derive(Clone, Copy, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "http",
            method = %request.method(),
            uri = %request.uri(),
            request_id,
        )
    }
}

pub fn set_request_id() -> SetRequestIdLayer<CounterRequestId> {
    SetRequestIdLayer::new(REQUEST_ID_HEADER, CounterRequestId::default())
}

pub fn propagate_request_id() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(REQUEST_ID_HEADER)
}

pub fn trace() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
    TraceLayer::new_for_http()
        .make_span_with(RequestSpan)
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}
