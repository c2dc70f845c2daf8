//! Shared request plumbing for the HTTP collaborators.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → the service's
//!   transient error, retried by the pipeline
//! - HTTP 4xx (client error, not 429) → [`Error::Rejected`], never retried
//! - Network errors and timeouts → transient
//!
//! Adapters make exactly one attempt per call; backoff lives in
//! `compliance_rag_core::retry`.

use std::time::Duration;

use compliance_rag_core::{Error, Result};

pub fn client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a prepared request and decode the JSON body.
pub async fn send_json(
    service: &str,
    request: reqwest::RequestBuilder,
    transient: fn(String) -> Error,
) -> Result<serde_json::Value> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            transient(format!("{service} request timed out: {e}"))
        } else {
            transient(format!("{service} connection error: {e}"))
        }
    })?;

    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(|e| Error::Rejected {
            service: service.to_string(),
            message: format!("invalid response body: {e}"),
        });
    }

    let body_text = response.text().await.unwrap_or_default();
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(transient(format!("{service} API error {status}: {body_text}")));
    }
    Err(Error::Rejected {
        service: service.to_string(),
        message: format!("{status}: {body_text}"),
    })
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
pub(crate) mod stub {
    use axum::Router;

    /// Serve `app` on an ephemeral local port and return its base URL.
    pub async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    #[tokio::test]
    async fn test_status_classification() {
        let app = Router::new()
            .route("/ok", post(|| async { Json(serde_json::json!({"ok": true})) }))
            .route("/busy", post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }))
            .route("/down", post(|| async { (StatusCode::BAD_GATEWAY, "upstream") }))
            .route("/auth", post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }));
        let base = stub::serve(app).await;
        let http = client(5).unwrap();

        let ok = send_json("svc", http.post(format!("{base}/ok")), Error::Generation).await.unwrap();
        assert_eq!(ok["ok"], true);

        let busy = send_json("svc", http.post(format!("{base}/busy")), Error::Generation).await.unwrap_err();
        assert!(matches!(busy, Error::Generation(_)));
        assert!(busy.is_retryable());

        let down = send_json("svc", http.post(format!("{base}/down")), Error::EmbeddingService).await.unwrap_err();
        assert!(matches!(down, Error::EmbeddingService(_)));

        let auth = send_json("svc", http.post(format!("{base}/auth")), Error::Generation).await.unwrap_err();
        assert!(matches!(auth, Error::Rejected { .. }));
        assert!(!auth.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let http = client(2).unwrap();
        let err = send_json("svc", http.post("http://127.0.0.1:9/none"), Error::EntityRecognition)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EntityRecognition(_)));
    }
}
