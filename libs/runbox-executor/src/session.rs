/// Execution Session Client - one cached WebSocket per worker
///
/// **Single-flight per language:** the connection slot's lock is held for the
/// whole request/reply exchange, so only one job is ever awaiting a reply on a
/// given connection. A reply that arrives after the outer timeout cannot be
/// mistaken for the next job's reply, because a timed-out connection is
/// dropped instead of being returned to the cache.
///
/// Failure mapping:
/// - worker could not be started: propagated (infrastructure)
/// - could not connect / connection dropped / unparsable reply: error result
/// - outer timeout: timeout result, connection dropped, worker recycled
use crate::coordinator::CodeExecutor;
use crate::error::ExecutorError;
use crate::supervisor::WorkerPool;
use async_trait::async_trait;
use futures_util::{FutureExt, SinkExt, StreamExt};
use runbox_common::config::ExecutionLimits;
use runbox_common::protocol::{JobMessage, JobReply};
use runbox_common::types::{ExecutionResult, Language, NO_OUTPUT};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

type WorkerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_WORKER_HOST: &str = "127.0.0.1";

pub struct SessionClient {
    pool: Arc<WorkerPool>,
    limits: ExecutionLimits,
    worker_host: String,
    connections: HashMap<Language, Mutex<Option<WorkerSocket>>>,
}

impl SessionClient {
    pub fn new(pool: Arc<WorkerPool>, limits: ExecutionLimits) -> Self {
        Self::with_host(pool, limits, DEFAULT_WORKER_HOST)
    }

    /// `worker_host` is where published worker ports are reachable from
    pub fn with_host(pool: Arc<WorkerPool>, limits: ExecutionLimits, worker_host: impl Into<String>) -> Self {
        let connections = Language::ALL.iter().map(|lang| (*lang, Mutex::new(None))).collect();
        Self {
            pool,
            limits,
            worker_host: worker_host.into(),
            connections,
        }
    }

    fn slot(&self, language: Language) -> &Mutex<Option<WorkerSocket>> {
        &self.connections[&language]
    }

    /// Run one job on the language's worker, starting the worker if needed
    #[instrument(skip(self, code, input), fields(language = %language, code_bytes = code.len()))]
    pub async fn execute_code(
        &self,
        language: Language,
        code: &str,
        input: &str,
    ) -> Result<ExecutionResult, ExecutorError> {
        let payload = serde_json::to_string(&JobMessage {
            code: code.to_string(),
            input: input.to_string(),
        })
        .map_err(|e| ExecutorError::Transport(format!("Failed to encode job: {}", e)))?;

        let mut slot = self.slot(language).lock().await;
        // under the lock: the job ahead of us may have recycled the worker
        self.pool.ensure_running(language).await?;
        let started = Instant::now();
        let exchange = self.exchange(language, &mut slot, payload);

        let result = match tokio::time::timeout(self.limits.transport_timeout, exchange).await {
            Ok(Ok(text)) => self.interpret_reply(&text, started),
            Ok(Err(ExecutorError::Connect { language, reason })) => {
                ExecutionResult::failed(format!("Execution error: Could not connect to {} executor: {}", language, reason))
            }
            Ok(Err(e)) => {
                *slot = None;
                warn!(error = %e, "Worker transport failed");
                ExecutionResult::failed(format!("WebSocket error: {}", e))
            }
            Err(_) => {
                // a late reply must never reach the next job
                *slot = None;
                drop(slot);
                warn!(
                    timeout_secs = self.limits.transport_timeout.as_secs(),
                    "Worker did not reply in time, recycling it"
                );
                self.recycle_worker(language).await;
                ExecutionResult::timed_out(
                    format!(
                        "Error: Code execution timed out ({} second limit)",
                        self.limits.transport_timeout.as_secs()
                    ),
                    self.limits.transport_timeout,
                )
            }
        };

        debug!(error = result.error, execution_time = %result.execution_time, "Job finished");
        Ok(result)
    }

    /// Send one job and wait for the one reply
    async fn exchange(
        &self,
        language: Language,
        slot: &mut Option<WorkerSocket>,
        payload: String,
    ) -> Result<String, ExecutorError> {
        let reused = self.drop_if_closed(slot);

        let sent = self
            .connection(language, slot)
            .await?
            .send(Message::Text(payload.clone()))
            .await;
        if let Err(e) = sent {
            *slot = None;
            if !reused {
                return Err(ExecutorError::Transport(e.to_string()));
            }
            // the job never left; retry once on a fresh connection
            debug!(error = %e, "Cached connection was stale, reconnecting");
            self.connection(language, slot)
                .await?
                .send(Message::Text(payload))
                .await
                .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        }

        let socket = self.connection(language, slot).await?;
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
                Some(Ok(Message::Close(_))) | None => {
                    info!(language = %language, "Worker closed the connection");
                    return Err(ExecutorError::Transport("connection closed by executor".to_string()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ExecutorError::Transport(e.to_string())),
            }
        }
    }

    /// Poll a cached connection without waiting; drop it if the worker hung up.
    /// Returns whether a connection is still cached.
    fn drop_if_closed(&self, slot: &mut Option<WorkerSocket>) -> bool {
        let Some(socket) = slot.as_mut() else {
            return false;
        };
        match socket.next().now_or_never() {
            None => true,
            Some(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => true,
            Some(Some(Ok(other))) => {
                warn!(message = ?other, "Discarding unsolicited worker message");
                *slot = None;
                false
            }
            Some(Some(Err(_))) | Some(None) => {
                debug!("Cached connection is closed");
                *slot = None;
                false
            }
        }
    }

    /// The cached connection, opening one if there is none
    async fn connection<'a>(
        &self,
        language: Language,
        slot: &'a mut Option<WorkerSocket>,
    ) -> Result<&'a mut WorkerSocket, ExecutorError> {
        if slot.is_none() {
            *slot = Some(self.connect(language).await?);
        }
        slot.as_mut()
            .ok_or_else(|| ExecutorError::Transport("connection unavailable".to_string()))
    }

    async fn connect(&self, language: Language) -> Result<WorkerSocket, ExecutorError> {
        let port = self
            .pool
            .container_port(language)
            .await
            .map_err(|e| ExecutorError::Connect {
                language,
                reason: e.to_string(),
            })?;
        let url = format!("ws://{}:{}", self.worker_host, port);

        match tokio::time::timeout(self.limits.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((socket, _response))) => {
                info!(language = %language, url = %url, "Connected to worker");
                Ok(socket)
            }
            Ok(Err(e)) => Err(ExecutorError::Connect {
                language,
                reason: e.to_string(),
            }),
            Err(_) => Err(ExecutorError::Connect {
                language,
                reason: format!(
                    "timed out after {} seconds",
                    self.limits.connect_timeout.as_secs()
                ),
            }),
        }
    }

    fn interpret_reply(&self, text: &str, started: Instant) -> ExecutionResult {
        let reply: JobReply = match serde_json::from_str(text) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Malformed worker reply");
                return ExecutionResult::failed(format!("Error parsing response: {}", e));
            }
        };

        if reply.timed_out {
            // the worker's own limit, which may differ from ours
            let limit = reply
                .limit_secs
                .map(Duration::from_secs)
                .unwrap_or(self.limits.worker_job_timeout);
            return ExecutionResult::timed_out(reply.output, limit);
        }

        let success = reply.is_success();
        let output = if !reply.output.is_empty() {
            reply.output
        } else {
            reply
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| NO_OUTPUT.to_string())
        };

        if success {
            ExecutionResult::success(output, started.elapsed())
        } else {
            ExecutionResult::program_error(output, started.elapsed())
        }
    }

    /// Stop a hung worker so its job dies with it; the next job restarts it
    async fn recycle_worker(&self, language: Language) {
        if let Err(e) = self.pool.stop_container(language).await {
            warn!(language = %language, error = %e, "Failed to recycle unresponsive worker");
        }
    }

    /// Close every cached connection (shutdown path)
    pub async fn close_all_connections(&self) {
        for lang in Language::ALL {
            let mut slot = self.slot(lang).lock().await;
            if let Some(mut socket) = slot.take() {
                if let Err(e) = socket.close(None).await {
                    debug!(language = %lang, error = %e, "Error closing worker connection");
                }
                info!(language = %lang, "Worker connection closed");
            }
        }
    }
}

#[async_trait]
impl CodeExecutor for SessionClient {
    async fn execute(&self, language: Language, code: &str, input: &str) -> Result<ExecutionResult, ExecutorError> {
        self.execute_code(language, code, input).await
    }

    fn strategy(&self) -> &'static str {
        "persistent"
    }
}
