use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};

use crate::{HostcoreError, HostcoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Asks the main proxy to apply a new document.
#[async_trait]
pub trait ProxyReloader: Send + Sync {
    /// Applies `document`. On error the previously loaded document stays live.
    async fn reload(&self, document: &str) -> HostcoreResult<()>;
}

/// Posts the document to the proxy's admin API `/load` endpoint.
#[derive(Debug, Clone)]
pub struct AdminApiReloader {
    client: Client,
    load_url: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AdminApiReloader {
    /// Creates a reloader for the admin API at `admin_url`, e.g. `http://localhost:2019`.
    pub fn new(admin_url: &str, timeout: Duration) -> HostcoreResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            load_url: format!("{}/load", admin_url.trim_end_matches('/')),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ProxyReloader for AdminApiReloader {
    async fn reload(&self, document: &str) -> HostcoreResult<()> {
        let response = self
            .client
            .post(&self.load_url)
            .header(CONTENT_TYPE, "text/caddyfile")
            .body(document.to_string())
            .send()
            .await
            .map_err(|e| HostcoreError::ProxyReload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HostcoreError::ProxyReload(format!("{status}: {body}")));
        }

        tracing::info!(url = %self.load_url, "proxy reloaded");
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use tokio::net::TcpListener;

    use super::*;

    type Received = Arc<Mutex<Vec<(String, String)>>>;

    async fn serve(status: StatusCode) -> anyhow::Result<(String, Received)> {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/load",
                post(
                    move |State(received): State<Received>, headers: HeaderMap, body: String| async move {
                        let content_type = headers
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        received.lock().unwrap().push((content_type, body));
                        (status, "rejected by test")
                    },
                ),
            )
            .with_state(Arc::clone(&received));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move { axum::serve(listener, app).await });

        Ok((format!("http://{addr}/"), received))
    }

    #[tokio::test]
    async fn test_reload_posts_caddyfile() -> anyhow::Result<()> {
        let (url, received) = serve(StatusCode::OK).await?;
        let reloader = AdminApiReloader::new(&url, Duration::from_secs(5))?;

        reloader.reload("{\n}\n").await?;

        let received = received.lock().unwrap().clone();
        assert_eq!(
            received,
            vec![("text/caddyfile".to_string(), "{\n}\n".to_string())]
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_reload_failure_is_surfaced() -> anyhow::Result<()> {
        let (url, _) = serve(StatusCode::BAD_REQUEST).await?;
        let reloader = AdminApiReloader::new(&url, Duration::from_secs(5))?;

        match reloader.reload("broken {").await {
            Err(HostcoreError::ProxyReload(message)) => {
                assert!(message.contains("400"));
                assert!(message.contains("rejected by test"));
            }
            other => panic!("expected reload error, got {other:?}"),
        }

        let unreachable = AdminApiReloader::new("http://127.0.0.1:1", Duration::from_secs(2))?;
        assert!(matches!(
            unreachable.reload("{}").await,
            Err(HostcoreError::ProxyReload(_))
        ));

        Ok(())
    }
}
