//! Request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::warn;

use edgestat_core::RefreshKind;

use crate::ApiState;

pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET {path}
///
/// Runs a foreground refresh through the scheduler and returns its own
/// outcome: the exposition text, or the error message with a 500.
pub async fn scrape(State(state): State<ApiState>) -> impl IntoResponse {
    match state
        .scheduler
        .submit(RefreshKind::Foreground, state.output_path.as_path())
        .await
    {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", EXPOSITION_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            let message = e.to_string();
            warn!(error = %message, "foreground refresh failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                message,
            )
                .into_response()
        }
    }
}
