use std::time::Duration;

use async_trait::async_trait;
use hostutils::{UnixHttpClient, UnixHttpResponse};
use serde::Deserialize;

use crate::{HostcoreError, HostcoreResult};

use super::InstanceSpec;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const LOAD_PATH: &str = "/load";
const RESTART_WORKERS_PATH: &str = "/frankenphp/workers/restart";
const THREADS_PATH: &str = "/frankenphp/threads";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Control of a running instance through its admin API.
#[async_trait]
pub trait InstanceAdmin: Send + Sync {
    /// Replaces the instance's routing with `document` without restarting it.
    async fn load_config(&self, spec: &InstanceSpec, document: &str) -> HostcoreResult<()>;

    /// Restarts the persistent workers. The request socket stays bound throughout.
    async fn restart_workers(&self, spec: &InstanceSpec) -> HostcoreResult<()>;

    /// The number of PHP threads the runtime reports.
    async fn thread_count(&self, spec: &InstanceSpec) -> HostcoreResult<u32>;
}

/// Talks to the admin API over the instance's admin socket.
#[derive(Debug, Clone)]
pub struct AdminSocketClient {
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ThreadsResponse {
    #[serde(rename = "Threads", default)]
    threads: Vec<serde_json::Value>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AdminSocketClient {
    /// Creates a client with a per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self, spec: &InstanceSpec) -> UnixHttpClient {
        UnixHttpClient::new(&spec.admin_socket).with_timeout(self.timeout)
    }

    fn check(spec: &InstanceSpec, response: UnixHttpResponse) -> HostcoreResult<UnixHttpResponse> {
        if response.is_success() {
            return Ok(response);
        }

        Err(HostcoreError::AdminApi {
            socket: spec.admin_socket.clone(),
            status: response.status.as_u16(),
            body: response.text(),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl InstanceAdmin for AdminSocketClient {
    async fn load_config(&self, spec: &InstanceSpec, document: &str) -> HostcoreResult<()> {
        let response = self
            .client(spec)
            .post(LOAD_PATH, Some("text/caddyfile"), document.to_string())
            .await?;
        Self::check(spec, response)?;

        tracing::info!(instance = %spec.key, "reloaded instance configuration");
        Ok(())
    }

    async fn restart_workers(&self, spec: &InstanceSpec) -> HostcoreResult<()> {
        let response = self
            .client(spec)
            .post(RESTART_WORKERS_PATH, None, Vec::new())
            .await?;
        Self::check(spec, response)?;

        tracing::info!(instance = %spec.key, "restarted workers");
        Ok(())
    }

    async fn thread_count(&self, spec: &InstanceSpec) -> HostcoreResult<u32> {
        let response = Self::check(spec, self.client(spec).get(THREADS_PATH).await?)?;
        let threads: ThreadsResponse = serde_json::from_slice(&response.body)?;
        Ok(threads.threads.len() as u32)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use tempfile::tempdir;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::UnixListener,
        task::JoinHandle,
    };

    use crate::php::InstanceKey;

    use super::*;

    fn spec(admin_socket: &Path) -> InstanceSpec {
        InstanceSpec {
            key: InstanceKey::new("alice", "8.4"),
            uid: 1001,
            gid: 1001,
            binary: PathBuf::from("/usr/local/bin/frankenphp"),
            config_path: PathBuf::from("/tmp/alice.Caddyfile"),
            socket: PathBuf::from("/tmp/php-8.4.sock"),
            admin_socket: admin_socket.to_path_buf(),
            pid_file: PathBuf::from("/tmp/php-8.4.pid"),
            log_path: PathBuf::from("/tmp/php-8.4.log"),
            home_dir: PathBuf::from("/tmp"),
            work_dir: PathBuf::from("/tmp"),
            output_max_bytes: 1024,
            output_keep: 1,
        }
    }

    fn serve_once(socket: &Path, response: &'static str) -> anyhow::Result<JoinHandle<String>> {
        let listener = UnixListener::bind(socket)?;
        Ok(tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        }))
    }

    #[tokio::test]
    async fn test_load_config_posts_caddyfile() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let socket = dir.path().join("admin.sock");
        let server = serve_once(
            &socket,
            "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )?;

        let client = AdminSocketClient::new(Duration::from_secs(5));
        client.load_config(&spec(&socket), "http:// {\n}\n").await?;

        let request = server.await?;
        assert!(request.starts_with("POST /load HTTP/1.1"));
        assert!(request.to_lowercase().contains("content-type: text/caddyfile"));
        assert!(request.ends_with("http:// {\n}\n"));

        Ok(())
    }

    #[tokio::test]
    async fn test_thread_count_and_errors() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let socket = dir.path().join("admin.sock");
        let body = r#"{"Threads":[{"Name":"a"},{"Name":"b"},{"Name":"c"}]}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            )
            .into_boxed_str(),
        );
        let server = serve_once(&socket, response)?;

        let client = AdminSocketClient::new(Duration::from_secs(5));
        assert_eq!(client.thread_count(&spec(&socket)).await?, 3);
        server.await?;

        std::fs::remove_file(&socket)?;
        let server = serve_once(
            &socket,
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\nnope",
        )?;
        match client.restart_workers(&spec(&socket)).await {
            Err(HostcoreError::AdminApi { status, body, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "nope");
            }
            other => panic!("expected admin api error, got {other:?}"),
        }
        server.await?;

        Ok(())
    }
}
