//! Introspection surface consumed by the CLI front-end.
//!
//! The datamodel is introspected over a JSON-RPC line protocol on the
//! introspection binary's stdio; the GraphQL SDL and the DMMF come from a
//! running query engine over HTTP.
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::time::Instant;

use super::binaries::EnginePaths;
use super::PrismaEngine;
use crate::error::EngineError;

const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_INITIAL: Duration = Duration::from_millis(50);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Serialize)]
struct IntrospectionRequest<'a> {
    id: u32,
    jsonrpc: &'a str,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    result: Option<IntrospectionResult>,
    #[serde(default)]
    error: Option<IntrospectionRpcError>,
}

#[derive(Deserialize)]
struct IntrospectionResult {
    #[serde(default)]
    datamodel: String,
}

#[derive(Deserialize)]
struct IntrospectionRpcError {
    #[serde(default)]
    data: IntrospectionRpcErrorData,
}

#[derive(Deserialize, Default)]
struct IntrospectionRpcErrorData {
    #[serde(default)]
    message: String,
}

/// Runs the introspection engine against the given Prisma schema and
/// returns the introspected datamodel.
///
/// `Bytes` columns are rewritten to `String`, the bridge has no binary
/// scalar representation.
pub async fn introspect_datamodel(
    wundergraph_dir: &Path,
    introspection_schema: &str,
) -> Result<String, EngineError> {
    let paths = EnginePaths::resolve(wundergraph_dir)?;

    let request = IntrospectionRequest {
        id: 1,
        jsonrpc: "2.0",
        method: "introspect",
        params: serde_json::json!([{
            "schema": introspection_schema,
            "compositeTypeDepth": -1,
        }]),
    };
    let mut request_line =
        serde_json::to_vec(&request).map_err(|e| EngineError::Introspection(e.to_string()))?;
    request_line.push(b'\n');

    let mut child = Command::new(&paths.introspection_engine)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&request_line).await?;
    }
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::Introspection("engine stdout is not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| EngineError::Introspection("engine stderr is not piped".to_string()))?;
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stderr_open = true;

    let deadline = tokio::time::sleep(INTROSPECTION_TIMEOUT);
    tokio::pin!(deadline);

    let mut response_data = String::new();
    loop {
        tokio::select! {
            _ = &mut deadline => {
                return Err(EngineError::Introspection(
                    "introspection timed out".to_string(),
                ));
            }
            status = child.wait() => {
                let status = status?;
                return Err(EngineError::Introspection(format!(
                    "engine exited with {status} before answering"
                )));
            }
            line = stdout_lines.next_line() => {
                let Some(line) = line? else {
                    return Err(EngineError::Introspection(
                        "engine closed its stdout before answering".to_string(),
                    ));
                };
                response_data.push_str(&line);
                // a partial response does not parse yet, keep reading until
                // the deadline kills us
                if let Ok(response) = serde_json::from_str::<IntrospectionResponse>(&response_data) {
                    if let Some(error) = response.error {
                        return Err(EngineError::Introspection(error.data.message));
                    }
                    let datamodel = response.result.map(|r| r.datamodel).unwrap_or_default();
                    return Ok(datamodel.replace(" Bytes", " String"));
                }
            }
            line = stderr_lines.next_line(), if stderr_open => {
                match line? {
                    Some(line) => {
                        return Err(EngineError::Introspection(format!(
                            "engine reported an error: {line}"
                        )));
                    }
                    None => stderr_open = false,
                }
            }
        }
    }
}

impl PrismaEngine {
    /// Fetches the engine's SDL and prepends the schema header the
    /// consumer expects.
    pub async fn introspect_graphql_schema(&self, budget: Duration) -> Result<String, EngineError> {
        let body = self.get_with_backoff("/sdl", budget).await?;
        let sdl = String::from_utf8_lossy(&body);
        Ok(format!("schema {{ query: Query mutation: Mutation }}\n{sdl}"))
    }

    /// Fetches the engine's DMMF JSON.
    pub async fn introspect_dmmf(&self, budget: Duration) -> Result<String, EngineError> {
        let body = self.get_with_backoff("/dmmf", budget).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Retries transient failures with exponential backoff until the budget
    /// elapses, then surfaces the last error.
    async fn get_with_backoff(&self, path: &str, budget: Duration) -> Result<Bytes, EngineError> {
        let deadline = Instant::now() + budget;
        let mut delay = BACKOFF_INITIAL;
        loop {
            let error = match self
                .http_client()
                .get(format!("{}{path}", self.url()))
                .send()
                .await
            {
                Ok(response) if response.status() == StatusCode::OK => {
                    return Ok(response.bytes().await?);
                }
                Ok(response) => EngineError::Status(response.status().as_u16()),
                Err(error) => EngineError::Transport(error),
            };
            if Instant::now() + delay >= deadline {
                return Err(error);
            }
            tracing::debug!(%error, ?delay, "introspection request failed, retrying");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(BACKOFF_MAX);
        }
    }
}
