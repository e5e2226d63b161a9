//! Request processor: decode, dispatch, respond.
//!
//! Each inbound request walks `RECEIVED -> DECODED -> {COMPILING |
//! LOOKUP_HIT | RELEASING} -> EXECUTING? -> RESPONDED`. Every recognized
//! request with a readable script id gets exactly one response, failures
//! included; unrecognized and malformed bodies are logged and dropped.
//!
//! Concurrent invokes of the same uncached script share one compilation:
//! the first caller compiles, the others wait on the same cell.

use crate::telemetry::{InvokeTelemetry, SlowRequestLog};
use async_trait::async_trait;
use script_executor_core::protocol::{
    CompileRequest, CompileResponse, InvokeRequest, InvokeResponse, ReleaseRequest,
    ReleaseResponse, RequestKind,
};
use script_executor_core::stats::{ProcessorStats, RequestCounters};
use script_executor_core::traits::{RequestHandler, ResponseProducer, ScriptExecutor};
use script_executor_core::{
    InboundRequest, RemoteResponse, RequestId, ScriptConfig, ScriptError, ScriptId, ScriptRequest,
};
use script_executor_sandbox::ScriptCache;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

type CompileCell<S> = Arc<OnceCell<Result<S, ScriptError>>>;

#[derive(Debug, Default)]
struct Counters {
    compile_requests: AtomicU64,
    invoke_requests: AtomicU64,
    release_requests: AtomicU64,
    unrecognized_requests: AtomicU64,
    malformed_requests: AtomicU64,
    compilation_errors: AtomicU64,
    runtime_errors: AtomicU64,
    timeout_errors: AtomicU64,
    compilations: AtomicU64,
    responses_sent: AtomicU64,
    publish_failures: AtomicU64,
    slow_requests: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn snapshot(&self) -> RequestCounters {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RequestCounters {
            compile_requests: load(&self.compile_requests),
            invoke_requests: load(&self.invoke_requests),
            release_requests: load(&self.release_requests),
            unrecognized_requests: load(&self.unrecognized_requests),
            malformed_requests: load(&self.malformed_requests),
            compilation_errors: load(&self.compilation_errors),
            runtime_errors: load(&self.runtime_errors),
            timeout_errors: load(&self.timeout_errors),
            compilations: load(&self.compilations),
            responses_sent: load(&self.responses_sent),
            publish_failures: load(&self.publish_failures),
            slow_requests: load(&self.slow_requests),
        }
    }

    fn record_failure(&self, err: &ScriptError) {
        match err {
            ScriptError::Compilation { .. } => bump(&self.compilation_errors),
            ScriptError::Runtime { .. } => bump(&self.runtime_errors),
            ScriptError::Timeout { .. } => bump(&self.timeout_errors),
        }
    }
}

/// Handles compile, invoke and release requests against a script cache.
///
/// # Examples
///
/// ```
/// use script_executor_core::traits::{RequestHandler, ResponseProducer};
/// use script_executor_core::{InboundRequest, MessageHeaders, RequestId, ScriptConfig};
/// use script_executor_sandbox::{SandboxConfig, ScriptSandbox};
/// use script_executor_server::RequestProcessor;
/// use std::sync::Arc;
///
/// # struct Discard;
/// # #[async_trait::async_trait]
/// # impl ResponseProducer for Discard {
/// #     async fn send(&self, _: &str, _: &str, _: Vec<u8>, _: &MessageHeaders)
/// #         -> script_executor_core::Result<()> { Ok(()) }
/// # }
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let sandbox = Arc::new(ScriptSandbox::new(SandboxConfig::strict()));
/// let processor = RequestProcessor::new(sandbox, Discard, &ScriptConfig::default());
///
/// let body = br#"{"compileRequest":{"scriptIdMSB":0,"scriptIdLSB":1,"scriptBody":"return 1+1;"}}"#;
/// let headers = MessageHeaders::for_request(RequestId::new_v4(), "replies");
/// processor
///     .handle(InboundRequest::from_parts(headers, body.to_vec()).unwrap())
///     .await;
///
/// assert_eq!(processor.cache().len(), 1);
/// # }
/// ```
pub struct RequestProcessor<E: ScriptExecutor, P: ResponseProducer> {
    executor: Arc<E>,
    producer: P,
    cache: ScriptCache<E::Script>,
    compiling: Mutex<HashMap<ScriptId, CompileCell<E::Script>>>,
    default_timeout: Duration,
    telemetry: InvokeTelemetry,
    slow_log: SlowRequestLog,
    counters: Counters,
}

impl<E: ScriptExecutor, P: ResponseProducer> std::fmt::Debug for RequestProcessor<E, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestProcessor")
            .field("cache", &self.cache)
            .field("default_timeout", &self.default_timeout)
            .field("counters", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl<E: ScriptExecutor, P: ResponseProducer> RequestProcessor<E, P> {
    /// Creates a processor with an empty cache of
    /// `config.max_active_scripts` entries.
    #[must_use]
    pub fn new(executor: Arc<E>, producer: P, config: &ScriptConfig) -> Self {
        Self {
            executor,
            producer,
            cache: ScriptCache::new(config.max_active_scripts),
            compiling: Mutex::new(HashMap::new()),
            default_timeout: config.default_timeout(),
            telemetry: InvokeTelemetry::new(config),
            slow_log: SlowRequestLog::new(config),
            counters: Counters::default(),
        }
    }

    /// Returns the compiled script cache.
    #[must_use]
    pub const fn cache(&self) -> &ScriptCache<E::Script> {
        &self.cache
    }

    /// Returns the script executor.
    #[must_use]
    pub const fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    /// Returns a snapshot of the request counters and cache occupancy.
    #[must_use]
    pub fn collect_stats(&self) -> ProcessorStats {
        ProcessorStats::new(
            self.counters.snapshot(),
            self.cache.len(),
            self.cache.capacity(),
        )
    }

    fn compiling(&self) -> MutexGuard<'_, HashMap<ScriptId, CompileCell<E::Script>>> {
        self.compiling.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn compile(&self, script_id: ScriptId, body: &str) -> Result<E::Script, ScriptError> {
        tracing::debug!("Compiling script [{script_id}]");
        bump(&self.counters.compilations);
        self.executor.compile(body).await
    }

    /// Returns the cached script, compiling and caching `body` on a miss.
    ///
    /// Callers racing on the same uncached id share one compilation.
    async fn get_or_compile(
        &self,
        script_id: ScriptId,
        body: Option<&str>,
    ) -> Result<E::Script, ScriptError> {
        if let Some(script) = self.cache.get(&script_id) {
            tracing::trace!("Script [{script_id}] found in cache");
            return Ok(script);
        }
        let Some(body) = body else {
            return Err(ScriptError::missing_body());
        };

        let cell = Arc::clone(self.compiling().entry(script_id).or_default());
        let result = cell
            .get_or_init(|| async {
                if let Some(script) = self.cache.get(&script_id) {
                    return Ok(script);
                }
                let compiled = self.compile(script_id, body).await;
                if let Ok(script) = &compiled {
                    self.cache.put(script_id, script.clone());
                }
                compiled
            })
            .await
            .clone();

        let mut compiling = self.compiling();
        if compiling
            .get(&script_id)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            compiling.remove(&script_id);
        }
        result
    }

    async fn process_compile(
        &self,
        request_id: RequestId,
        request: &CompileRequest,
    ) -> CompileResponse {
        let script_id = request.script_id();
        tracing::debug!("[{request_id}] Processing compile request, scriptId: [{script_id}]");

        match self.compile(script_id, &request.script_body).await {
            Ok(script) => {
                self.cache.put(script_id, script);
                CompileResponse::success(script_id)
            }
            Err(err) => {
                self.counters.record_failure(&err);
                tracing::debug!("[{request_id}] Failed to compile script [{script_id}]: {err}");
                CompileResponse::failure(script_id, &err)
            }
        }
    }

    async fn process_invoke(&self, request_id: RequestId, request: InvokeRequest) -> InvokeResponse {
        let script_id = request.script_id();
        let tick = self.telemetry.record();
        tracing::debug!(
            "[{request_id}] Processing invoke request, scriptId: [{script_id}], function: [{}]",
            request.function_name
        );
        if tick.trace_body {
            tracing::info!(
                "[{request_id}] Script body of function [{}]: {}",
                request.function_name,
                request.script_body.as_deref().unwrap_or("<not supplied>")
            );
        }

        let timeout = match request.timeout {
            0 => self.default_timeout,
            ms => Duration::from_millis(ms),
        };

        let outcome = match self
            .get_or_compile(script_id, request.script_body.as_deref())
            .await
        {
            Ok(script) => self.executor.execute(&script, request.args, timeout).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(result) => InvokeResponse::success(result),
            Err(err) => {
                self.counters.record_failure(&err);
                tracing::debug!(
                    "[{request_id}] Failed to invoke function [{}] of script [{script_id}]: {err}",
                    request.function_name
                );
                InvokeResponse::failure(&err)
            }
        }
    }

    fn process_release(&self, request_id: RequestId, request: ReleaseRequest) -> ReleaseResponse {
        let script_id = request.script_id();
        tracing::debug!("[{request_id}] Processing release request, scriptId: [{script_id}]");
        if self.cache.remove(&script_id) {
            tracing::debug!("[{request_id}] Released script [{script_id}]");
        }
        ReleaseResponse::success(script_id)
    }

    fn process_rejected(
        &self,
        request_id: RequestId,
        kind: RequestKind,
        script_id: ScriptId,
        error: &ScriptError,
    ) -> RemoteResponse {
        tracing::error!("[{request_id}] Invalid {kind} request for script [{script_id}]: {error}");
        match kind {
            RequestKind::Compile => {
                bump(&self.counters.compile_requests);
                self.counters.record_failure(error);
                RemoteResponse::compile(request_id, CompileResponse::failure(script_id, error))
            }
            RequestKind::Invoke => {
                bump(&self.counters.invoke_requests);
                self.counters.record_failure(error);
                RemoteResponse::invoke(request_id, InvokeResponse::failure(error))
            }
            // Only the script id is read from a release request.
            RequestKind::Release => {
                bump(&self.counters.release_requests);
                let (script_id_msb, script_id_lsb) = script_id.to_bits();
                let release = ReleaseRequest {
                    script_id_msb,
                    script_id_lsb,
                };
                RemoteResponse::release(request_id, self.process_release(request_id, release))
            }
        }
    }

    /// Decodes and answers one request. Returns the invoked function name
    /// for the slow-request log.
    async fn dispatch(&self, request: &InboundRequest) -> Option<String> {
        let request_id = request.request_id;

        let decoded = match ScriptRequest::decode(&request.body) {
            Ok(decoded) => decoded,
            Err(err) => {
                bump(&self.counters.malformed_requests);
                tracing::error!("[{request_id}] Failed to decode request: {err}");
                return None;
            }
        };
        tracing::trace!("[{request_id}] Decoded {} request", decoded.kind());

        let function_name = match &decoded {
            ScriptRequest::Invoke(invoke) => Some(invoke.function_name.clone()),
            _ => None,
        };

        let (script_id, response) = match decoded {
            ScriptRequest::Compile(compile) => {
                bump(&self.counters.compile_requests);
                let response = self.process_compile(request_id, &compile).await;
                (compile.script_id(), RemoteResponse::compile(request_id, response))
            }
            ScriptRequest::Invoke(invoke) => {
                bump(&self.counters.invoke_requests);
                let script_id = invoke.script_id();
                let response = self.process_invoke(request_id, invoke).await;
                (script_id, RemoteResponse::invoke(request_id, response))
            }
            ScriptRequest::Release(release) => {
                bump(&self.counters.release_requests);
                let response = self.process_release(request_id, release);
                (release.script_id(), RemoteResponse::release(request_id, response))
            }
            ScriptRequest::Rejected {
                kind,
                script_id,
                error,
            } => (
                script_id,
                self.process_rejected(request_id, kind, script_id, &error),
            ),
            ScriptRequest::Unrecognized => {
                bump(&self.counters.unrecognized_requests);
                tracing::error!("[{request_id}] Unsupported request type, dropping it");
                return None;
            }
        };

        self.send_response(request, script_id, response).await;
        function_name
    }

    async fn send_response(
        &self,
        request: &InboundRequest,
        script_id: ScriptId,
        response: RemoteResponse,
    ) {
        let request_id = request.request_id;
        let payload = match response.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                bump(&self.counters.publish_failures);
                tracing::error!("[{request_id}] Failed to encode response: {err}");
                return;
            }
        };

        match self
            .producer
            .send(
                &request.response_topic,
                &script_id.to_string(),
                payload,
                &request.headers,
            )
            .await
        {
            Ok(()) => {
                bump(&self.counters.responses_sent);
                tracing::trace!("[{request_id}] Response sent to [{}]", request.response_topic);
            }
            Err(err) => {
                bump(&self.counters.publish_failures);
                tracing::error!(
                    "[{request_id}] Failed to send response to [{}]: {err}",
                    request.response_topic
                );
            }
        }
    }
}

#[async_trait]
impl<E: ScriptExecutor, P: ResponseProducer> RequestHandler for RequestProcessor<E, P> {
    async fn handle(&self, request: InboundRequest) {
        let started = Instant::now();
        let function_name = self.dispatch(&request).await;
        if self.slow_log.check(
            &request.request_id,
            started.elapsed(),
            function_name.as_deref(),
            &request.body,
        ) {
            bump(&self.counters.slow_requests);
        }
    }
}
