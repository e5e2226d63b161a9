//! Request processor behaviour with a stub executor and a mocked producer.

use async_trait::async_trait;
use mockall::mock;
use script_executor_core::protocol::ErrorCode;
use script_executor_core::traits::{RequestHandler, ResponseProducer, ScriptExecutor};
use script_executor_core::{
    Error, InboundRequest, MessageHeaders, RemoteResponse, RequestId, ScriptConfig, ScriptError,
    ScriptId,
};
use script_executor_server::RequestProcessor;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mock! {
    pub Producer {}

    #[async_trait]
    impl ResponseProducer for Producer {
        async fn send(
            &self,
            topic: &str,
            key: &str,
            payload: Vec<u8>,
            headers: &MessageHeaders,
        ) -> script_executor_core::Result<()>;
    }
}

type Sent = Arc<Mutex<Vec<(String, String, RemoteResponse)>>>;

/// Producer expecting exactly `times` responses, recording each of them.
fn recording_producer(times: usize) -> (MockProducer, Sent) {
    let sent: Sent = Arc::default();
    let mut producer = MockProducer::new();
    let record = Arc::clone(&sent);
    producer
        .expect_send()
        .times(times)
        .returning(move |topic, key, payload, _| {
            let response = RemoteResponse::from_slice(&payload).unwrap();
            record
                .lock()
                .unwrap()
                .push((topic.to_string(), key.to_string(), response));
            Ok(())
        });
    (producer, sent)
}

/// Executor treating script bodies as JSON literals.
///
/// Bodies that are not JSON fail to compile. The literals `"throw"` and
/// `"spin"` fail at run time with a runtime error and a timeout.
#[derive(Default)]
struct StubExecutor {
    compiles: AtomicUsize,
    compile_delay: Duration,
    last_timeout: Mutex<Option<Duration>>,
}

impl StubExecutor {
    fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptExecutor for StubExecutor {
    type Script = Value;

    async fn compile(&self, body: &str) -> Result<Value, ScriptError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if !self.compile_delay.is_zero() {
            tokio::time::sleep(self.compile_delay).await;
        }
        serde_json::from_str(body).map_err(|e| ScriptError::Compilation {
            message: "Unexpected token".to_string(),
            line: Some(e.line()),
        })
    }

    async fn execute(
        &self,
        script: &Value,
        _args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, ScriptError> {
        *self.last_timeout.lock().unwrap() = Some(timeout);
        match script.as_str() {
            Some("throw") => Err(ScriptError::Runtime {
                name: "Error",
                message: "bad input".to_string(),
                line: Some(3),
            }),
            Some("spin") => Err(ScriptError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap(),
            }),
            _ => Ok(script.clone()),
        }
    }
}

fn config(max_active_scripts: usize) -> ScriptConfig {
    ScriptConfig {
        max_active_scripts,
        ..ScriptConfig::default()
    }
}

fn processor(
    executor: &Arc<StubExecutor>,
    producer: MockProducer,
    max_active_scripts: usize,
) -> RequestProcessor<StubExecutor, MockProducer> {
    RequestProcessor::new(Arc::clone(executor), producer, &config(max_active_scripts))
}

fn script(n: i64) -> ScriptId {
    ScriptId::from_bits(0, n)
}

fn inbound(request_id: RequestId, body: &Value) -> InboundRequest {
    InboundRequest::from_parts(
        MessageHeaders::for_request(request_id, "replies"),
        serde_json::to_vec(body).unwrap(),
    )
    .unwrap()
}

fn compile(n: i64, body: &str) -> InboundRequest {
    inbound(
        RequestId::new_v4(),
        &json!({"compileRequest": {"scriptIdMSB": 0, "scriptIdLSB": n, "scriptBody": body}}),
    )
}

fn invoke(n: i64, body: Option<&str>, timeout: u64) -> InboundRequest {
    let mut request = json!({
        "scriptIdMSB": 0,
        "scriptIdLSB": n,
        "functionName": "f",
        "args": [],
        "timeout": timeout,
    });
    if let Some(body) = body {
        request["scriptBody"] = json!(body);
    }
    inbound(RequestId::new_v4(), &json!({ "invokeRequest": request }))
}

fn release(n: i64) -> InboundRequest {
    inbound(
        RequestId::new_v4(),
        &json!({"releaseRequest": {"scriptIdMSB": 0, "scriptIdLSB": n}}),
    )
}

fn invoke_response(sent: &Sent, index: usize) -> script_executor_core::protocol::InvokeResponse {
    sent.lock().unwrap()[index].2.invoke_response.clone().unwrap()
}

#[tokio::test]
async fn test_compile_success_caches_and_echoes_id() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, sent) = recording_producer(1);
    let processor = processor(&executor, producer, 10);

    let request = compile(1, "2");
    let request_id = request.request_id;
    processor.handle(request).await;

    let sent = sent.lock().unwrap();
    let (topic, key, response) = &sent[0];
    assert_eq!(topic, "replies");
    assert_eq!(key, &script(1).to_string());
    assert_eq!(response.request_id(), request_id);

    let compiled = response.compile_response.as_ref().unwrap();
    assert!(compiled.success);
    assert_eq!(compiled.error_code, None);
    assert_eq!((compiled.script_id_msb, compiled.script_id_lsb), (0, 1));
    assert!(processor.cache().contains(&script(1)));
}

#[tokio::test]
async fn test_compile_failure_is_not_cached() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, sent) = recording_producer(1);
    let processor = processor(&executor, producer, 10);

    processor.handle(compile(1, "{oops")).await;

    let response = sent.lock().unwrap()[0].2.compile_response.clone().unwrap();
    assert!(!response.success);
    assert_eq!(response.error_code, Some(ErrorCode::CompilationError));
    assert_eq!(
        response.error_details,
        "SyntaxError: Unexpected token in at line number 1"
    );
    assert!(processor.cache().is_empty());
}

#[tokio::test]
async fn test_invoke_compiles_once_then_hits_cache() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, sent) = recording_producer(2);
    let processor = processor(&executor, producer, 10);

    processor.handle(invoke(1, Some("2"), 1000)).await;
    processor.handle(invoke(1, Some("2"), 1000)).await;

    assert_eq!(executor.compiles(), 1);
    for index in 0..2 {
        let response = invoke_response(&sent, index);
        assert!(response.success);
        assert_eq!(response.result, json!(2));
    }
    assert_eq!(processor.collect_stats().counters().compilations, 1);
}

#[tokio::test]
async fn test_concurrent_invokes_share_one_compilation() {
    let executor = Arc::new(StubExecutor {
        compile_delay: Duration::from_millis(50),
        ..StubExecutor::default()
    });
    let (producer, sent) = recording_producer(8);
    let processor = processor(&executor, producer, 10);

    futures::future::join_all((0..8).map(|_| processor.handle(invoke(1, Some("7"), 1000)))).await;

    assert_eq!(executor.compiles(), 1);
    for index in 0..8 {
        assert_eq!(invoke_response(&sent, index).result, json!(7));
    }
}

#[tokio::test]
async fn test_invoke_compile_failure_reported_as_invoke() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, sent) = recording_producer(1);
    let processor = processor(&executor, producer, 10);

    processor.handle(invoke(1, Some("{oops"), 1000)).await;

    let recorded = sent.lock().unwrap();
    assert!(recorded[0].2.compile_response.is_none());
    let response = recorded[0].2.invoke_response.clone().unwrap();
    assert_eq!(response.error_code, Some(ErrorCode::CompilationError));
    assert_eq!(response.result, json!(""));
}

#[tokio::test]
async fn test_runtime_and_timeout_classification() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, sent) = recording_producer(2);
    let processor = processor(&executor, producer, 10);

    processor.handle(invoke(1, Some(r#""throw""#), 1000)).await;
    processor.handle(invoke(2, Some(r#""spin""#), 50)).await;

    let runtime = invoke_response(&sent, 0);
    assert_eq!(runtime.error_code, Some(ErrorCode::RuntimeError));
    assert_eq!(runtime.error_details, "Error: bad input in at line number 3");

    let timeout = invoke_response(&sent, 1);
    assert_eq!(timeout.error_code, Some(ErrorCode::TimeoutError));
    assert_eq!(
        timeout.error_details,
        "Error: Script execution timed out after 50ms"
    );

    let counters = *processor.collect_stats().counters();
    assert_eq!(counters.runtime_errors, 1);
    assert_eq!(counters.timeout_errors, 1);
}

#[tokio::test]
async fn test_zero_timeout_uses_default() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, _sent) = recording_producer(1);
    let processor = processor(&executor, producer, 10);

    processor.handle(invoke(1, Some("1"), 0)).await;

    assert_eq!(
        *executor.last_timeout.lock().unwrap(),
        Some(ScriptConfig::default().default_timeout())
    );
}

#[tokio::test]
async fn test_release_then_invoke_without_body() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, sent) = recording_producer(4);
    let processor = processor(&executor, producer, 10);

    processor.handle(compile(1, "1")).await;
    processor.handle(release(1)).await;
    processor.handle(release(1)).await;
    processor.handle(invoke(1, None, 1000)).await;

    let recorded = sent.lock().unwrap();
    for (_, _, response) in &recorded[1..3] {
        assert!(response.release_response.unwrap().success);
    }
    let response = recorded[3].2.invoke_response.clone().unwrap();
    assert_eq!(response.error_code, Some(ErrorCode::CompilationError));
    assert!(processor.cache().is_empty());
}

#[tokio::test]
async fn test_cache_evicts_oldest_compiled_script() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, _sent) = recording_producer(4);
    let processor = processor(&executor, producer, 2);

    processor.handle(compile(1, "1")).await;
    processor.handle(compile(2, "2")).await;
    processor.handle(invoke(1, None, 1000)).await;
    processor.handle(compile(3, "3")).await;

    assert_eq!(processor.cache().ids(), vec![script(2), script(3)]);
}

#[tokio::test]
async fn test_unrecognized_and_malformed_get_no_response() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, _sent) = recording_producer(0);
    let processor = processor(&executor, producer, 10);

    processor.handle(inbound(RequestId::new_v4(), &json!({"pingRequest": {}}))).await;
    processor
        .handle(InboundRequest::from_parts(
            MessageHeaders::for_request(RequestId::new_v4(), "replies"),
            b"not json".to_vec(),
        )
        .unwrap())
        .await;
    processor
        .handle(inbound(
            RequestId::new_v4(),
            &json!({
                "releaseRequest": {"scriptIdMSB": 0, "scriptIdLSB": 1},
                "compileRequest": {"scriptIdMSB": 0, "scriptIdLSB": 1, "scriptBody": "1"},
            }),
        ))
        .await;

    let counters = *processor.collect_stats().counters();
    assert_eq!(counters.unrecognized_requests, 1);
    assert_eq!(counters.malformed_requests, 2);
    assert_eq!(counters.responses_sent, 0);
}

#[tokio::test]
async fn test_publish_failure_is_counted() {
    let executor = Arc::new(StubExecutor::default());
    let mut producer = MockProducer::new();
    producer.expect_send().times(1).returning(|topic, _, _, _| {
        Err(Error::TransportError {
            topic: topic.to_string(),
            message: "broker unavailable".to_string(),
            source: None,
        })
    });
    let processor = processor(&executor, producer, 10);

    processor.handle(release(1)).await;

    let counters = *processor.collect_stats().counters();
    assert_eq!(counters.publish_failures, 1);
    assert_eq!(counters.responses_sent, 0);
}

#[tokio::test]
async fn test_request_id_halves_round_trip() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, sent) = recording_producer(1);
    let processor = processor(&executor, producer, 10);

    let request_id = RequestId::from_bits(i64::MIN, -1);
    processor
        .handle(inbound(
            request_id,
            &json!({"releaseRequest": {"scriptIdMSB": 0, "scriptIdLSB": 1}}),
        ))
        .await;

    let response = &sent.lock().unwrap()[0].2;
    assert_eq!(
        (response.request_id_msb, response.request_id_lsb),
        (i64::MIN, -1)
    );
    assert_eq!(response.request_id(), request_id);
}

#[tokio::test]
async fn test_loosely_typed_invoke_fields_still_get_a_response() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, sent) = recording_producer(2);
    let processor = processor(&executor, producer, 10);

    let with_fields = |function_name: Value, timeout: Value| {
        inbound(
            RequestId::new_v4(),
            &json!({"invokeRequest": {
                "scriptIdMSB": 0,
                "scriptIdLSB": 1,
                "scriptBody": "5",
                "functionName": function_name,
                "args": null,
                "timeout": timeout,
            }}),
        )
    };

    processor.handle(with_fields(Value::Null, json!(100))).await;
    assert_eq!(
        *executor.last_timeout.lock().unwrap(),
        Some(Duration::from_millis(100))
    );

    processor.handle(with_fields(json!("f"), json!(-1))).await;
    assert_eq!(
        *executor.last_timeout.lock().unwrap(),
        Some(ScriptConfig::default().default_timeout())
    );

    for index in 0..2 {
        let response = invoke_response(&sent, index);
        assert!(response.success);
        assert_eq!(response.result, json!(5));
    }
}

#[tokio::test]
async fn test_mistyped_request_fields_get_a_failure_response() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, sent) = recording_producer(2);
    let processor = processor(&executor, producer, 10);

    processor
        .handle(inbound(
            RequestId::new_v4(),
            &json!({"invokeRequest": {"scriptIdMSB": 0, "scriptIdLSB": 4, "scriptBody": "1", "args": "x"}}),
        ))
        .await;
    processor
        .handle(inbound(
            RequestId::new_v4(),
            &json!({"compileRequest": {"scriptIdMSB": 0, "scriptIdLSB": 5, "scriptBody": 42}}),
        ))
        .await;

    let recorded = sent.lock().unwrap();
    let (_, key, response) = &recorded[0];
    assert_eq!(key, &script(4).to_string());
    let invoke = response.invoke_response.clone().unwrap();
    assert!(!invoke.success);
    assert_eq!(invoke.error_code, Some(ErrorCode::RuntimeError));
    assert!(invoke.error_details.starts_with("TypeError: invalid invokeRequest: "));

    let compile = recorded[1].2.compile_response.clone().unwrap();
    assert_eq!(compile.error_code, Some(ErrorCode::CompilationError));
    assert_eq!((compile.script_id_msb, compile.script_id_lsb), (0, 5));

    assert_eq!(executor.compiles(), 0);
    assert!(processor.cache().is_empty());
    let counters = *processor.collect_stats().counters();
    assert_eq!(counters.malformed_requests, 0);
    assert_eq!(counters.invoke_requests, 1);
    assert_eq!(counters.compile_requests, 1);
    assert_eq!(counters.responses_sent, 2);
}

#[tokio::test]
async fn test_slow_request_check_covers_undecodable_bodies() {
    let executor = Arc::new(StubExecutor::default());
    let (producer, _sent) = recording_producer(0);
    let config = ScriptConfig {
        slow_query_log_ms: 0,
        ..ScriptConfig::default()
    };
    let processor = RequestProcessor::new(Arc::clone(&executor), producer, &config);

    processor
        .handle(InboundRequest::from_parts(
            MessageHeaders::for_request(RequestId::new_v4(), "replies"),
            b"not json".to_vec(),
        )
        .unwrap())
        .await;

    let counters = *processor.collect_stats().counters();
    assert_eq!(counters.malformed_requests, 1);
    assert_eq!(counters.slow_requests, 1);
}
