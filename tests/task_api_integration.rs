//! Integration tests for the task REST + SSE API.
//!
//! Each test spins up an Axum server on a random port with a running
//! processor and exercises the real HTTP contract with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use task_runner::config::{DispatchMode, TaskConfig};
use task_runner::load::ManualLoadProbe;
use task_runner::store::InMemoryTaskStore;
use task_runner::tasks::{HandlerRegistry, Pipeline, ProcessorHandle, task_routes};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    base: String,
    client: reqwest::Client,
    probe: Arc<ManualLoadProbe>,
    processor: Option<ProcessorHandle>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn submit(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/tasks"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn submit_ok(&self, body: Value) -> String {
        let resp = self.submit(body).await;
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        body["taskId"].as_str().unwrap().to_string()
    }

    async fn get_json(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    /// Poll the result endpoint until the task reaches a terminal status.
    async fn wait_for_result(&self, id: &str) -> Value {
        loop {
            let (_, body) = self.get_json(&format!("/tasks/{id}/result")).await;
            if body["status"] == "COMPLETED" || body["status"] == "FAILED" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Start a server with the given processor settings.
async fn start_server(
    check_interval: Duration,
    delay: Duration,
    overloaded: bool,
    run_processor: bool,
) -> TestServer {
    let config = TaskConfig {
        queue_check_interval: check_interval,
        processing_delay_min: delay,
        processing_delay_max: delay,
        dispatch: DispatchMode::Concurrent { max_in_flight: 4 },
        ..TaskConfig::default()
    };
    let probe = Arc::new(ManualLoadProbe::new(overloaded));
    let pipeline = Pipeline::build(
        Arc::new(InMemoryTaskStore::new()),
        probe.clone(),
        HandlerRegistry::with_builtins(),
        &config,
    );
    let processor = run_processor.then(|| Arc::clone(&pipeline.processor).spawn());
    let app = task_routes(Arc::clone(&pipeline.service));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        client: reqwest::Client::new(),
        probe,
        processor,
    }
}

async fn fast_server() -> TestServer {
    start_server(Duration::from_millis(10), Duration::ZERO, false, true).await
}

// ── Health ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let server = fast_server().await;
        let (status, body) = server.get_json("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "task-runner");
    })
    .await
    .expect("test timed out");
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn sum_task_completes() {
    timeout(TEST_TIMEOUT, async {
        let server = fast_server().await;
        let id = server
            .submit_ok(json!({"type": "sum", "params": [1, 2, 3]}))
            .await;

        let result = server.wait_for_result(&id).await;
        assert_eq!(result["status"], "COMPLETED");
        assert_eq!(result["result"], 6.0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn multiply_task_completes() {
    timeout(TEST_TIMEOUT, async {
        let server = fast_server().await;
        let id = server
            .submit_ok(json!({"type": "multiply", "params": [2, 3, 4]}))
            .await;

        let result = server.wait_for_result(&id).await;
        assert_eq!(result["status"], "COMPLETED");
        assert_eq!(result["result"], 24.0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_type_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = fast_server().await;
        let resp = server
            .submit(json!({"type": "unknown", "params": [1]}))
            .await;
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Unsupported task type: 'unknown'");

        let (_, all) = server.get_json("/tasks/all/status").await;
        assert_eq!(all.as_array().unwrap().len(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn duplicate_submission_returns_same_id() {
    timeout(TEST_TIMEOUT, async {
        let server = fast_server().await;
        let body = json!({"type": "sum", "params": [5, 5]});
        let (first, second) = tokio::join!(server.submit(body.clone()), server.submit(body));
        let first: Value = first.json().await.unwrap();
        let second: Value = second.json().await.unwrap();
        assert_eq!(first["taskId"], second["taskId"]);

        let (_, all) = server.get_json("/tasks/all/status").await;
        assert_eq!(all.as_array().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

// ── Validation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_submissions_are_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = fast_server().await;
        for body in [
            json!({"type": "sum", "params": []}),
            json!({"type": "sum", "params": ["a", "b"]}),
            json!({"type": "sum"}),
            json!({"params": [1, 2]}),
        ] {
            let resp = server.submit(body.clone()).await;
            assert_eq!(resp.status(), 400, "body {body} should be rejected");
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn invalid_and_unknown_ids() {
    timeout(TEST_TIMEOUT, async {
        let server = fast_server().await;

        let (status, body) = server.get_json("/tasks/not-a-uuid/status").await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Invalid task ID");

        let missing = uuid::Uuid::new_v4();
        for path in ["status", "result", "events"] {
            let (status, body) = server.get_json(&format!("/tasks/{missing}/{path}")).await;
            assert_eq!(status, 404, "{path}");
            assert_eq!(body["error"], format!("Task with ID {missing} was not found"));
        }
    })
    .await
    .expect("test timed out");
}

// ── Freshness and overload ──────────────────────────────────────────────

#[tokio::test]
async fn result_of_pending_task_is_not_completed() {
    timeout(TEST_TIMEOUT, async {
        // No processor: the task stays pending.
        let server = start_server(Duration::from_millis(10), Duration::ZERO, false, false).await;
        let id = server
            .submit_ok(json!({"type": "sum", "params": [1, 1]}))
            .await;

        let (status, body) = server.get_json(&format!("/tasks/{id}/result")).await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "Task is not yet completed.");
        assert_eq!(body["status"], "PENDING");
        assert!(body.get("result").is_none());

        let (_, body) = server.get_json(&format!("/tasks/{id}/status")).await;
        assert_eq!(body["status"], "PENDING");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn overload_defers_until_load_drops() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::from_millis(10), Duration::ZERO, true, true).await;
        let id = server
            .submit_ok(json!({"type": "multiply", "params": [3, 3]}))
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let (_, body) = server.get_json(&format!("/tasks/{id}/status")).await;
        assert_eq!(body["status"], "PENDING");

        let resp = server
            .client
            .post(server.url(&format!("/tasks/{id}/execute")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);

        server.probe.set_overloaded(false);
        let result = server.wait_for_result(&id).await;
        assert_eq!(result["result"], 9.0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn forced_execution_and_conflict() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::from_millis(10), Duration::ZERO, false, false).await;
        let id = server
            .submit_ok(json!({"type": "sum", "params": [2, 2]}))
            .await;
        let url = server.url(&format!("/tasks/{id}/execute"));

        let resp = server.client.post(&url).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let task: Value = resp.json().await.unwrap();
        assert_eq!(task["status"], "COMPLETED");
        assert_eq!(task["result"], 4.0);
        assert_eq!(task["type"], "sum");

        let resp = server.client.post(&url).send().await.unwrap();
        assert_eq!(resp.status(), 409);
    })
    .await
    .expect("test timed out");
}

// ── Events ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn event_stream_delivers_terminal_state() {
    timeout(TEST_TIMEOUT, async {
        // Slow enough that the subscriber attaches before completion.
        let server = start_server(
            Duration::from_millis(10),
            Duration::from_millis(300),
            false,
            true,
        )
        .await;
        let id = server
            .submit_ok(json!({"type": "sum", "params": [1, 2, 3]}))
            .await;

        let mut resp = server
            .client
            .get(server.url(&format!("/tasks/{id}/events")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(
            resp.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let mut received = String::new();
        while let Some(chunk) = resp.chunk().await.unwrap() {
            received.push_str(&String::from_utf8_lossy(&chunk));
        }

        assert!(received.contains("event: taskUpdate"));
        assert!(received.contains(&format!("id: {id}")));
        assert!(received.contains("\"status\":\"COMPLETED\""));
        assert!(received.contains("\"result\":6.0"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn late_event_subscriber_stream_ends_immediately() {
    timeout(TEST_TIMEOUT, async {
        let server = fast_server().await;
        let id = server
            .submit_ok(json!({"type": "sum", "params": [7]}))
            .await;
        server.wait_for_result(&id).await;

        let resp = server
            .client
            .get(server.url(&format!("/tasks/{id}/events")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body = resp.text().await.unwrap();
        assert!(!body.contains("taskUpdate"));
    })
    .await
    .expect("test timed out");
}

// ── Listing and shutdown ────────────────────────────────────────────────

#[tokio::test]
async fn list_returns_every_task() {
    timeout(TEST_TIMEOUT, async {
        let server = fast_server().await;
        let a = server
            .submit_ok(json!({"type": "sum", "params": [1]}))
            .await;
        let b = server
            .submit_ok(json!({"type": "multiply", "params": [2]}))
            .await;

        let (status, all) = server.get_json("/tasks/all/status").await;
        assert_eq!(status, 200);
        let ids: Vec<&str> = all
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&a.as_str()));
        assert!(ids.contains(&b.as_str()));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn shutdown_reports_queued_tasks() {
    timeout(TEST_TIMEOUT, async {
        let mut server = start_server(Duration::from_millis(10), Duration::ZERO, true, true).await;
        let id = server
            .submit_ok(json!({"type": "sum", "params": [1, 2]}))
            .await;

        let report = server.processor.take().unwrap().shutdown().await;
        assert_eq!(report.pending.len(), 1);
        assert_eq!(report.pending[0].id, id);

        let (_, body) = server.get_json(&format!("/tasks/{id}/status")).await;
        assert_eq!(body["status"], "PENDING");
    })
    .await
    .expect("test timed out");
}
