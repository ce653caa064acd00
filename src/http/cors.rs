use axum::{
    extract::{Request, State},
    http::{header, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    transport::cors::{cors_headers, preflight_reply},
    AppState,
};

/// Answers preflights before any other layer and decorates every other response, errors
/// included, with the configured CORS headers.
pub async fn cors_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if request.method() == Method::OPTIONS {
        return preflight_reply(&state.cors, origin.as_deref()).into_response();
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .extend(cors_headers(&state.cors, origin.as_deref()));
    response
}
