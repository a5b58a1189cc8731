//! HTTP plumbing shared by the remote embedding and language model backends.

use std::time::Duration;

/// Why a JSON request gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HttpFailure {
    /// Network error, non-success status, or a body that cannot be re-sent.
    Request(String),
    /// A success status whose body is not JSON.
    Response(String),
}

/// Send `request` and decode the JSON body, with exponential backoff on 429,
/// 5xx, and network errors.
///
/// Backoff: 1s, 2s, 4s, ... capped at 32s. Other 4xx statuses fail at once.
/// `to_error` maps the final failure into the caller's error type.
pub(crate) async fn send_json_with_retry<E>(
    provider: &str,
    request: reqwest::RequestBuilder,
    max_retries: u32,
    to_error: impl Fn(HttpFailure) -> E,
) -> Result<serde_json::Value, E> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let Some(req) = request.try_clone() else {
            return Err(to_error(HttpFailure::Request(
                "request body cannot be retried".to_string(),
            )));
        };

        match req.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| to_error(HttpFailure::Response(e.to_string())));
                }

                let body_text = response.text().await.unwrap_or_default();
                let failure = HttpFailure::Request(format!("API error {status}: {body_text}"));
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(provider, attempt, %status, "request failed, retrying");
                    last_err = Some(failure);
                    continue;
                }
                return Err(to_error(failure));
            }
            Err(e) => {
                tracing::warn!(provider, attempt, error = %e, "request failed, retrying");
                last_err = Some(HttpFailure::Request(e.to_string()));
            }
        }
    }

    Err(to_error(last_err.unwrap_or_else(|| {
        HttpFailure::Request("failed after retries".to_string())
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serve `statuses` in order (the last one repeats) and count hits.
    async fn stub(statuses: Vec<StatusCode>) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/",
            post(move || {
                let counter = Arc::clone(&counter);
                let statuses = statuses.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    let status = statuses[n.min(statuses.len() - 1)];
                    (status, Json(json!({ "ok": status.is_success() })))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), hits)
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let (url, hits) = stub(vec![StatusCode::SERVICE_UNAVAILABLE, StatusCode::OK]).await;
        let request = reqwest::Client::new().post(&url).json(&json!({}));

        let body: Value = send_json_with_retry("stub", request, 1, |f| f).await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_error_fails_without_retry() {
        let (url, hits) = stub(vec![StatusCode::BAD_REQUEST]).await;
        let request = reqwest::Client::new().post(&url).json(&json!({}));

        let err = send_json_with_retry("stub", request, 3, |f| f).await.unwrap_err();
        assert!(matches!(err, HttpFailure::Request(ref m) if m.contains("400")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_host_maps_through_caller_error() {
        let request = reqwest::Client::new().post("http://127.0.0.1:1/");
        let err = send_json_with_retry("stub", request, 0, |f| format!("wrapped: {f:?}"))
            .await
            .unwrap_err();
        assert!(err.starts_with("wrapped: Request("));
    }
}
