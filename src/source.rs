//! The request-time data source for one plan.
//!
//! `load` sanitizes the bound fetch input, executes it against the lazy
//! engine with bounded retries and streams the response to the caller.
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::engine::lazy::LazyEngine;
use crate::error::EngineError;
use crate::error::FetchError;

const LOAD_DEADLINE: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct Source {
    engine: Arc<LazyEngine>,
}

impl Source {
    pub(crate) fn new(engine: Arc<LazyEngine>) -> Self {
        Source { engine }
    }

    /// Executes the request and writes the response body to `out`.
    ///
    /// The engine may be mid-restart when the request arrives, so
    /// unavailability is retried every 500 ms inside an overall 5 s
    /// deadline. A closed supervisor fails immediately.
    pub async fn load<W>(&self, input: &[u8], out: &mut W) -> Result<(), FetchError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let request = ensure_variables(input);
        let request = un_null(&request);
        tracing::debug!(
            request = %String::from_utf8_lossy(&request),
            "executing database request"
        );

        let response = tokio::time::timeout(LOAD_DEADLINE, self.fetch(&request))
            .await
            .map_err(|_| FetchError::DeadlineExceeded)??;
        out.write_all(&response).await.map_err(FetchError::Write)?;
        Ok(())
    }

    async fn fetch(&self, request: &[u8]) -> Result<Vec<u8>, FetchError> {
        let mut buf = Vec::new();
        loop {
            match self.engine.execute(request, &mut buf).await {
                Ok(()) => return Ok(buf),
                Err(EngineError::Closed) => return Err(EngineError::Closed.into()),
                Err(error) => {
                    tracing::debug!(%error, "database request failed, retrying");
                    buf.clear();
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Inserts an empty `variables` member when the request has none. The
/// upstream normalizer may have extracted variables that are bound
/// per-request elsewhere; an existing member is left untouched.
fn ensure_variables(input: &[u8]) -> Vec<u8> {
    let Ok(mut request) = serde_json::from_slice::<serde_json::Value>(input) else {
        return input.to_vec();
    };
    let Some(object) = request.as_object_mut() else {
        return input.to_vec();
    };
    if !object.contains_key("variables") {
        object.insert(
            "variables".to_string(),
            serde_json::Value::Object(serde_json::Map::new()),
        );
        return serde_json::to_vec(&request).unwrap_or_else(|_| input.to_vec());
    }
    input.to_vec()
}

/// Deletes every `<delimiter> key: null` span from the request.
///
/// The engine rejects explicit-null filter operands the planner produces
/// for optional arguments; removing them yields equivalent absence
/// semantics. Each `: null` is dropped together with everything back to
/// the nearest `{`, `(`, `,` or space, in a single pass over the input.
pub(crate) fn un_null(input: &[u8]) -> Vec<u8> {
    const NULL_SUFFIX: &[u8] = b": null";
    let mut out = Vec::with_capacity(input.len());
    let mut index = 0;
    while index < input.len() {
        if input[index..].starts_with(NULL_SUFFIX) {
            while let Some(&last) = out.last() {
                if matches!(last, b'{' | b'(' | b',' | b' ') {
                    break;
                }
                out.pop();
            }
            index += NULL_SUFFIX.len();
        } else {
            out.push(input[index]);
            index += 1;
        }
    }
    out
}
