//! The external-model adapter surface.
//!
//! The model itself is an opaque, fallible, non-deterministic collaborator.
//! The core talks to it through the [`Oracle`] trait and the
//! [`OracleClient`] wrapper, which enforces per-call timeouts, classifies
//! transport vs schema failures, and applies linear backoff within the
//! configured retry budget. Tests substitute a [`ScriptedOracle`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::schemas::SchemaKind;

/// Failure modes of a single oracle call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum OracleError {
    /// Network or rate-limit failure; retriable.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The response does not satisfy the requested schema.
    #[error("schema violation: {0}")]
    Schema(String),
    /// The adapter's per-call timeout elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Opaque generation oracle.
///
/// `generate` returns the raw response content for the named schema; the
/// wrapper validates it. Implementations must be cheap to clone behind an
/// `Arc` and safe to call concurrently.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        schema: SchemaKind,
    ) -> std::result::Result<String, OracleError>;
}

impl std::fmt::Debug for dyn Oracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Oracle")
    }
}

/// Retry/timeout policy wrapper around an [`Oracle`].
#[derive(Clone)]
pub struct OracleClient {
    inner: Arc<dyn Oracle>,
    /// Per-call timeout enforced with `tokio::time::timeout`.
    timeout: Duration,
    /// Attempts per logical call, shared by transport and schema failures.
    max_attempts: u32,
    /// Linear backoff unit: attempt `n` sleeps `n * backoff`.
    backoff: Duration,
}

impl OracleClient {
    pub fn new(inner: Arc<dyn Oracle>, timeout: Duration, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            timeout,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Call the oracle and deserialize the response into `T`.
    ///
    /// Transport failures and timeouts retry with linear backoff; schema
    /// failures retry with a fresh call (the model is non-deterministic).
    /// Exhausting the budget yields [`Error::OracleTransient`] or
    /// [`Error::OracleMalformed`]. Cancellation wins over everything.
    pub async fn generate<T: DeserializeOwned>(
        &self,
        prompt: &str,
        schema: SchemaKind,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let mut last_transport = String::new();
        let mut last_schema = String::new();
        let mut transport_failures = 0u32;
        let mut schema_failures = 0u32;

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }
            if attempt > 1 {
                let pause = self.backoff * (attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Canceled),
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            let call = self.inner.generate(prompt, schema);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Canceled),
                outcome = tokio::time::timeout(self.timeout, call) => outcome,
            };

            let content = match outcome {
                Err(_) => {
                    transport_failures += 1;
                    last_transport = format!("timed out after {:?}", self.timeout);
                    tracing::warn!(schema = %schema, attempt, "oracle call timed out");
                    continue;
                }
                Ok(Err(OracleError::Transport(detail))) => {
                    transport_failures += 1;
                    tracing::warn!(schema = %schema, attempt, %detail, "oracle transport failure");
                    last_transport = detail;
                    continue;
                }
                Ok(Err(OracleError::Timeout(elapsed))) => {
                    transport_failures += 1;
                    last_transport = format!("adapter timeout after {elapsed:?}");
                    continue;
                }
                Ok(Err(OracleError::Schema(detail))) => {
                    schema_failures += 1;
                    tracing::warn!(schema = %schema, attempt, %detail, "oracle schema failure");
                    last_schema = detail;
                    continue;
                }
                Ok(Ok(content)) => content,
            };

            match serde_json::from_str::<T>(&content) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    schema_failures += 1;
                    last_schema = err.to_string();
                    tracing::warn!(
                        schema = %schema,
                        attempt,
                        error = %last_schema,
                        "oracle response failed schema validation"
                    );
                }
            }
        }

        if schema_failures >= transport_failures {
            Err(Error::OracleMalformed {
                schema: schema.name().to_string(),
                attempts: self.max_attempts,
                detail: last_schema,
            })
        } else {
            Err(Error::OracleTransient {
                attempts: self.max_attempts,
                detail: last_transport,
            })
        }
    }
}

/// One scripted reply for the fixture oracle.
#[derive(Clone, Debug)]
pub enum ScriptedReply {
    /// Return this content.
    Content(String),
    /// Fail with a transport error.
    Transport(String),
    /// Fail with a schema error.
    Malformed(String),
}

/// Deterministic fixture oracle.
///
/// Replies are queued per schema kind and consumed in order; an exhausted
/// queue is a transport error so tests fail loudly instead of hanging.
/// Every prompt is recorded for assertions.
#[derive(Default)]
pub struct ScriptedOracle {
    scripts: Mutex<BTreeMap<&'static str, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<(SchemaKind, String)>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw reply for the given schema.
    pub fn push(&self, schema: SchemaKind, reply: ScriptedReply) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(schema.name())
            .or_default()
            .push_back(reply);
    }

    /// Queue a successful JSON reply serialized from `value`.
    pub fn push_json<T: serde::Serialize>(&self, schema: SchemaKind, value: &T) {
        let content = serde_json::to_string(value).unwrap_or_default();
        self.push(schema, ScriptedReply::Content(content));
    }

    /// Prompts observed so far, in call order.
    pub fn calls(&self) -> Vec<(SchemaKind, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of calls made for one schema kind.
    pub fn call_count(&self, schema: SchemaKind) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(kind, _)| *kind == schema)
            .count()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(
        &self,
        prompt: &str,
        schema: SchemaKind,
    ) -> std::result::Result<String, OracleError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((schema, prompt.to_string()));
        let reply = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(schema.name())
            .and_then(VecDeque::pop_front);
        match reply {
            Some(ScriptedReply::Content(content)) => Ok(content),
            Some(ScriptedReply::Transport(detail)) => Err(OracleError::Transport(detail)),
            Some(ScriptedReply::Malformed(detail)) => Err(OracleError::Schema(detail)),
            None => Err(OracleError::Transport(format!(
                "script exhausted for schema {schema}"
            ))),
        }
    }
}
