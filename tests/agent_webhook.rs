use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use jurema::agent::{AgentClient, AgentError, AgentQuestion, RetryPolicy};

/// Webhook n8n de mentira: responde 500 nas primeiras `fail_first` chamadas e
/// depois passa a responder `{"output": ...}`, contando tudo o que recebeu.
struct Stub {
    hits: AtomicUsize,
    fail_first: usize,
    output: &'static str,
    last_body: Mutex<Option<Value>>,
    last_request_id: Mutex<Option<String>>,
}

impl Stub {
    fn new(fail_first: usize, output: &'static str) -> Arc<Self> {
        Arc::new(Self {
            hits: AtomicUsize::new(0),
            fail_first,
            output,
            last_body: Mutex::new(None),
            last_request_id: Mutex::new(None),
        })
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn answer(
    State(stub): State<Arc<Stub>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let n = stub.hits.fetch_add(1, Ordering::SeqCst);
    *stub.last_body.lock().unwrap() = Some(body);
    *stub.last_request_id.lock().unwrap() = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if n < stub.fail_first {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "fluxo indisponível" })),
        );
    }
    (StatusCode::OK, Json(json!({ "output": stub.output })))
}

async fn start_stub(stub: Arc<Stub>) -> String {
    let app = Router::new()
        .route("/webhook/jurema", post(answer))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/webhook/jurema")
}

/// Retentativas rápidas para o teste não dormir de verdade.
fn fast_policy(retries: u32) -> RetryPolicy {
    RetryPolicy {
        retries,
        backoff: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn first_attempt_success_does_not_retry() {
    let stub = Stub::new(0, "pong");
    let url = start_stub(stub.clone()).await;
    let client = AgentClient::new(fast_policy(3)).unwrap();

    let mut question = AgentQuestion::new("como começo?", 42);
    question.username = Some("ana");
    let answer = client.ask(&url, &question).await.unwrap();

    assert_eq!(answer.as_deref(), Some("pong"));
    assert_eq!(stub.hits(), 1);

    // o corpo no fio leva a pergunta, o canal como string e o requestId
    let body = stub.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["question"], "como começo?");
    assert_eq!(body["channelId"], "42");
    assert_eq!(body["username"], "ana");
    let rid = body["requestId"].as_str().unwrap().to_owned();
    assert!(rid.starts_with("req_"));
    // e o mesmo id vai no header de correlação
    assert_eq!(
        stub.last_request_id.lock().unwrap().as_deref(),
        Some(rid.as_str())
    );
}

#[tokio::test]
async fn exhausts_attempts_then_reports_how_many() {
    let stub = Stub::new(usize::MAX, "nunca chega");
    let url = start_stub(stub.clone()).await;
    let client = AgentClient::new(fast_policy(2)).unwrap();

    let err = client
        .ask(&url, &AgentQuestion::new("oi", 1))
        .await
        .unwrap_err();

    match err {
        AgentError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("esperava Exhausted, veio {other:?}"),
    }
    // 1 chamada + 2 retentativas
    assert_eq!(stub.hits(), 3);
}

#[tokio::test]
async fn recovers_after_transient_failures() {
    let stub = Stub::new(2, "agora sim");
    let url = start_stub(stub.clone()).await;
    let client = AgentClient::new(fast_policy(3)).unwrap();

    let answer = client.ask(&url, &AgentQuestion::new("oi", 1)).await.unwrap();

    assert_eq!(answer.as_deref(), Some("agora sim"));
    assert_eq!(stub.hits(), 3);
}

#[tokio::test]
async fn blank_output_counts_as_no_answer() {
    let stub = Stub::new(0, "   ");
    let url = start_stub(stub.clone()).await;
    let client = AgentClient::new(fast_policy(0)).unwrap();

    let answer = client.ask(&url, &AgentQuestion::new("oi", 1)).await.unwrap();

    assert_eq!(answer, None);
    assert_eq!(stub.hits(), 1);
}
