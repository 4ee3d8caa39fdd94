pub mod bookings;
pub mod events;

use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::BookingError;
use crate::{middleware, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(events::routes())
        .merge(bookings::routes())
}

/// Полный роутер сервиса вместе со слоями request id и трассировки.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(routes())
        .with_state(state)
        .layer(middleware::propagate_request_id())
        .layer(middleware::trace())
        .layer(middleware::set_request_id())
}

/// Ограничивает обработку запроса дедлайном. Незавершённая транзакция
/// откатывается вместе с брошенной future.
///
/// Дедлайн покрывает и COMMIT: если он истёк во время коммита, запись
/// могла успеть сохраниться. Поэтому 504 означает "исход неизвестен", а не
/// "ничего не изменилось"; клиент перечитывает состояние через списки броней
/// и событий, прежде чем повторять запрос.
pub(crate) async fn within_deadline<T, F>(deadline: Duration, op: F) -> Result<T, BookingError>
where
    F: Future<Output = Result<T, BookingError>>,
{
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?deadline, "request deadline exceeded");
            Err(BookingError::DeadlineExceeded)
        }
    }
}
