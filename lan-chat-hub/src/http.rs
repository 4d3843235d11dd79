use std::{path::PathBuf, sync::Arc};

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::debug;

const NOT_FOUND_BODY: &str = "404 Not Found: index.html not found.";

/// Serves the dashboard page for a GET on any path.
pub fn router(index: PathBuf) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/*path", get(serve_index))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(index))
}

async fn serve_index(State(index): State<Arc<PathBuf>>) -> Response {
    match tokio::fs::read(index.as_path()).await {
        Ok(page) => ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], page).into_response(),
        Err(err) => {
            debug!(path = %index.display(), ?err, "index page unavailable");
            (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                NOT_FOUND_BODY,
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use tower::ServiceExt;

    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("lan-chat-hub-{name}-{nanos}.html"))
    }

    async fn fetch(router: Router, uri: &str) -> (StatusCode, String, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, content_type, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn serves_index_on_any_path() {
        let path = scratch_path("present");
        tokio::fs::write(&path, "<h1>chat</h1>").await.expect("write index");

        for uri in ["/", "/index.html", "/deep/link"] {
            let (status, content_type, body) = fetch(router(path.clone()), uri).await;
            assert_eq!(status, StatusCode::OK, "uri {uri}");
            assert_eq!(content_type, "text/html; charset=utf-8");
            assert_eq!(body, "<h1>chat</h1>");
        }

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_index_is_plain_404() {
        let (status, content_type, body) = fetch(router(scratch_path("missing")), "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(content_type, "text/plain; charset=utf-8");
        assert_eq!(body, NOT_FOUND_BODY);
    }
}
