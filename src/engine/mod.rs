//! The query-engine subprocess.
//!
//! The engine is a native binary speaking GraphQL over HTTP. It is started
//! on a free local port with the Prisma datamodel in its environment and
//! killed when the supervisor reaps it.
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::header::CONTENT_TYPE;
use http::StatusCode;
use tokio::process::Child;
use tokio::process::Command;
use tokio::time::Instant;

use crate::error::EngineError;

pub(crate) mod binaries;
pub mod introspection;
pub mod lazy;

const READINESS_BACKOFF: Duration = Duration::from_millis(10);
const DEFAULT_READY_BUDGET: Duration = Duration::from_secs(5);

/// The engine interface the supervisor manages. The production
/// implementation is [`PrismaEngine`]; tests substitute their own.
#[async_trait]
pub(crate) trait QueryEngine: Send + Sync {
    /// POSTs the request to the engine and appends the response body to
    /// `out`. Any non-200 status is an error.
    async fn execute(&self, request: &[u8], out: &mut Vec<u8>) -> Result<(), EngineError>;

    async fn close(&mut self);
}

/// A running query-engine subprocess.
pub struct PrismaEngine {
    url: String,
    client: reqwest::Client,
    child: Option<Child>,
}

impl PrismaEngine {
    /// Spawns the engine and waits until its HTTP endpoint answers.
    ///
    /// The working directory is the WunderGraph directory so relative
    /// sqlite paths resolve the same way they did during introspection.
    pub async fn start(
        prisma_schema: &str,
        wundergraph_dir: &Path,
        ready_budget: Duration,
    ) -> Result<Self, EngineError> {
        let paths = binaries::EnginePaths::resolve(wundergraph_dir)?;
        let port = free_port()?;
        let url = format!("http://127.0.0.1:{port}");

        tracing::debug!(%url, "starting query engine");
        let child = Command::new(&paths.query_engine)
            .arg("-p")
            .arg(port.to_string())
            .current_dir(wundergraph_dir)
            .env("PRISMA_DML", prisma_schema)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| EngineError::StartFailed {
                reason: error.to_string(),
            })?;

        let mut engine = PrismaEngine {
            url,
            client: reqwest::Client::new(),
            child: Some(child),
        };
        engine.wait_until_ready(ready_budget).await?;
        Ok(engine)
    }

    /// Polls the engine root until it answers. A dead child or an elapsed
    /// budget is a start failure, distinct from request-time unavailability.
    async fn wait_until_ready(&mut self, budget: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + budget;
        loop {
            if let Some(child) = &mut self.child {
                if let Some(status) = child.try_wait()? {
                    return Err(EngineError::StartFailed {
                        reason: format!("engine exited with {status} before becoming ready"),
                    });
                }
            }
            if self.client.get(&self.url).send().await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(EngineError::StartFailed {
                    reason: format!("engine did not answer within {budget:?}"),
                });
            }
            tokio::time::sleep(READINESS_BACKOFF).await;
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    #[cfg(test)]
    pub(crate) fn for_url(url: String) -> Self {
        PrismaEngine {
            url,
            client: reqwest::Client::new(),
            child: None,
        }
    }
}

#[async_trait]
impl QueryEngine for PrismaEngine {
    async fn execute(&self, request: &[u8], out: &mut Vec<u8>) -> Result<(), EngineError> {
        let response = self
            .client
            .post(format!("{}/", self.url))
            .header(CONTENT_TYPE, "application/json")
            .body(request.to_vec())
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(EngineError::Status(response.status().as_u16()));
        }
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk?;
            out.extend_from_slice(&chunk);
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

fn free_port() -> Result<u16, EngineError> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
