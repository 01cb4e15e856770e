//! End-to-end job flows against a mock rendering service.

use std::time::Duration;

use httpmock::prelude::*;
use render_relay::{
    models::{
        generation::{GenerationRequest, JobStatusResponse},
        job::JobStatus,
    },
    services::{
        credentials::CredentialPool,
        failover::{submit_with_failover, FailoverOutcome},
        render::RenderClient,
        runner::{Orchestrator, RunnerSettings},
    },
};
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

const CREATE_PATH: &str = "/image-generator/create";
const QUEUE_PATH: &str = "/ai-generator/queue-list";

fn request() -> GenerationRequest {
    GenerationRequest {
        prompt: "a paper boat on a rainy street".to_string(),
        model_id: 7,
        gnum: 1,
        width: 768,
        height: 768,
        size_id: 2,
        negative_prompt: "blurry".to_string(),
        style_id: 0,
        kind: "normal".to_string(),
    }
}

fn settings() -> RunnerSettings {
    RunnerSettings {
        max_concurrent_jobs: 2,
        poll_interval: Duration::from_millis(20),
        generation_timeout: Duration::from_secs(3),
        registry_capacity: 100,
    }
}

fn client(server: &MockServer) -> RenderClient {
    RenderClient::new(&server.base_url(), Duration::from_secs(2)).unwrap()
}

async fn pool_with(dir: &TempDir, tokens: &[&str]) -> CredentialPool {
    let pool = CredentialPool::new(dir.path().join("credentials.txt"));
    pool.append(tokens.iter().copied()).await.unwrap();
    pool
}

fn exhausted_body() -> serde_json::Value {
    json!({"code": 1003, "message": "Credits not enough", "data": []})
}

fn accepted_body(task_id: i64, queue_id: i64) -> serde_json::Value {
    json!({"code": 0, "message": "success", "data": [{"id": task_id, "queue_id": queue_id}]})
}

fn queue_body(queue_id: i64, task: serde_json::Value) -> serde_json::Value {
    json!({"code": 0, "data": {"list": [{"id": queue_id, "tasks": [task]}], "total": 1}})
}

/// Poll the registry until the job is terminal, recording every progress value seen.
async fn wait_for_terminal(orchestrator: &Orchestrator, job_id: Uuid) -> (JobStatusResponse, Vec<u8>) {
    let mut seen = Vec::new();
    for _ in 0..500 {
        let status = orchestrator.get_job_status(&job_id).expect("job should exist");
        seen.push(status.progress);
        if status.status != JobStatus::Processing {
            return (status, seen);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish in time");
}

#[tokio::test]
async fn test_exhausted_credential_is_removed_and_next_one_used() {
    let server = MockServer::start_async().await;
    let exhausted = server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH).header("authorization", "Bearer tokA");
            then.status(200).json_body(exhausted_body());
        })
        .await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH).header("authorization", "Bearer tokB");
            then.status(200).json_body(accepted_body(501, 77));
        })
        .await;
    let queue = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(QUEUE_PATH)
                .query_param("page", "1")
                .query_param("page_size", "20")
                .query_param("paranoid", "1")
                .header("authorization", "Bearer tokB");
            then.status(200).json_body(queue_body(
                77,
                json!({"id": 501, "status": 2, "result_url": "/files/501.png"}),
            ));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(client(&server), pool_with(&dir, &["tokA", "tokB"]).await, settings());

    let job_id = orchestrator.submit_job("user-1".to_string(), request()).unwrap();
    let (status, _) = wait_for_terminal(&orchestrator, job_id).await;

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(status.result_url, Some(format!("{}/files/501.png", server.base_url())));
    assert!(status.error.is_none());

    assert_eq!(exhausted.hits_async().await, 1);
    assert_eq!(accepted.hits_async().await, 1);
    assert!(queue.hits_async().await >= 1);
    assert_eq!(orchestrator.pool().load().await.unwrap(), vec!["tokB"]);
}

#[tokio::test]
async fn test_failover_reports_which_credential_succeeded() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH).header("authorization", "Bearer tokA");
            then.status(402).json_body(exhausted_body());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH).header("authorization", "Bearer tokB");
            then.status(200).json_body(accepted_body(9, 3));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let pool = pool_with(&dir, &["tokA", "tokB"]).await;
    let snapshot = pool.load().await.unwrap();

    let outcome = submit_with_failover(&client(&server), &pool, &snapshot, &request()).await;
    assert_eq!(
        outcome,
        FailoverOutcome::Submitted {
            credential: "tokB".to_string(),
            task_id: Some(9),
            queue_id: Some(3),
        }
    );
}

#[tokio::test]
async fn test_accepted_response_echoing_marker_text_keeps_credential() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH).header("authorization", "Bearer tokA");
            then.status(200).json_body(json!({
                "code": 0,
                "message": "success",
                "data": [{"id": 5, "queue_id": 6, "prompt": "there is not enough light in the alley"}]
            }));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let pool = pool_with(&dir, &["tokA", "tokB"]).await;
    let snapshot = pool.load().await.unwrap();

    let outcome = submit_with_failover(&client(&server), &pool, &snapshot, &request()).await;

    assert_eq!(
        outcome,
        FailoverOutcome::Submitted {
            credential: "tokA".to_string(),
            task_id: Some(5),
            queue_id: Some(6),
        }
    );
    assert_eq!(create.hits_async().await, 1);
    assert_eq!(pool.load().await.unwrap(), vec!["tokA", "tokB"]);
}

#[tokio::test]
async fn test_every_credential_exhausted_empties_the_pool() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH);
            then.status(200).json_body(exhausted_body());
        })
        .await;

    let dir = TempDir::new().unwrap();
    let pool = pool_with(&dir, &["tokA", "tokB", "tokC"]).await;
    let snapshot = pool.load().await.unwrap();

    let outcome = submit_with_failover(&client(&server), &pool, &snapshot, &request()).await;

    assert_eq!(outcome, FailoverOutcome::AllExhausted { tried: 3 });
    assert_eq!(create.hits_async().await, 3);
    assert!(pool.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_job_fails_when_all_credentials_exhausted() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH);
            then.status(200).json_body(exhausted_body());
        })
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(client(&server), pool_with(&dir, &["tokA", "tokB"]).await, settings());

    let job_id = orchestrator.submit_job("user-1".to_string(), request()).unwrap();
    let (status, _) = wait_for_terminal(&orchestrator, job_id).await;

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_code.as_deref(), Some("credentials_exhausted"));
}

#[tokio::test]
async fn test_empty_pool_is_reported_as_misconfiguration() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH);
            then.status(200).json_body(accepted_body(1, 1));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(client(&server), pool_with(&dir, &[]).await, settings());

    let job_id = orchestrator.submit_job("user-1".to_string(), request()).unwrap();
    let (status, _) = wait_for_terminal(&orchestrator, job_id).await;

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_code.as_deref(), Some("no_credentials_available"));
    assert_eq!(create.hits_async().await, 0);
}

#[tokio::test]
async fn test_hard_rejection_does_not_fail_over() {
    let server = MockServer::start_async().await;
    let rejected = server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH).header("authorization", "Bearer tokA");
            then.status(200).json_body(json!({"code": 500, "message": "prompt violates policy"}));
        })
        .await;
    let untouched = server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH).header("authorization", "Bearer tokB");
            then.status(200).json_body(accepted_body(1, 1));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(client(&server), pool_with(&dir, &["tokA", "tokB"]).await, settings());

    let job_id = orchestrator.submit_job("user-1".to_string(), request()).unwrap();
    let (status, _) = wait_for_terminal(&orchestrator, job_id).await;

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_code.as_deref(), Some("submission_rejected"));
    assert!(status.error.unwrap().contains("prompt violates policy"));
    assert_eq!(rejected.hits_async().await, 1);
    assert_eq!(untouched.hits_async().await, 0);
    assert_eq!(orchestrator.pool().load().await.unwrap(), vec!["tokA", "tokB"]);
}

#[tokio::test]
async fn test_completed_task_without_url_fails_with_result_missing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH);
            then.status(200).json_body(accepted_body(42, 5));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(QUEUE_PATH);
            then.status(200)
                .json_body(queue_body(5, json!({"id": 42, "status": 2, "result_url": ""})));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(client(&server), pool_with(&dir, &["tokA"]).await, settings());

    let job_id = orchestrator.submit_job("user-1".to_string(), request()).unwrap();
    let (status, _) = wait_for_terminal(&orchestrator, job_id).await;

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_code.as_deref(), Some("result_missing"));
    assert!(status.result_url.is_none());
}

#[tokio::test]
async fn test_upstream_failure_message_is_surfaced() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH);
            then.status(200).json_body(accepted_body(42, 5));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(QUEUE_PATH);
            then.status(200)
                .json_body(queue_body(5, json!({"id": 42, "status": 3, "error": "content filtered"})));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(client(&server), pool_with(&dir, &["tokA"]).await, settings());

    let job_id = orchestrator.submit_job("user-1".to_string(), request()).unwrap();
    let (status, _) = wait_for_terminal(&orchestrator, job_id).await;

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_code.as_deref(), Some("generation_failed"));
    assert!(status.error.unwrap().contains("content filtered"));
}

#[tokio::test]
async fn test_timeout_releases_worker_slot() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH);
            then.status(200).json_body(accepted_body(42, 5));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(QUEUE_PATH);
            then.status(200).json_body(queue_body(5, json!({"id": 42, "status": 1})));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        client(&server),
        pool_with(&dir, &["tokA"]).await,
        RunnerSettings {
            max_concurrent_jobs: 1,
            poll_interval: Duration::from_millis(20),
            generation_timeout: Duration::from_millis(200),
            registry_capacity: 10,
        },
    );

    let first = orchestrator.submit_job("user-1".to_string(), request()).unwrap();
    let second = orchestrator.submit_job("user-2".to_string(), request()).unwrap();

    let (first_status, first_progress) = wait_for_terminal(&orchestrator, first).await;
    let (second_status, _) = wait_for_terminal(&orchestrator, second).await;

    for status in [&first_status, &second_status] {
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error_code.as_deref(), Some("generation_timeout"));
        assert_eq!(status.error.as_deref(), Some("generation timeout"));
    }
    assert!(first_progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(first_status.progress < 100);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orchestrator.available_slots(), 1);
}

#[tokio::test]
async fn test_poll_transport_errors_are_retried_until_deadline() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH);
            then.status(200).json_body(accepted_body(42, 5));
        })
        .await;
    let queue = server
        .mock_async(|when, then| {
            when.method(GET).path(QUEUE_PATH);
            then.status(502).body("bad gateway");
        })
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        client(&server),
        pool_with(&dir, &["tokA"]).await,
        RunnerSettings {
            generation_timeout: Duration::from_millis(200),
            ..settings()
        },
    );

    let job_id = orchestrator.submit_job("user-1".to_string(), request()).unwrap();
    let (status, _) = wait_for_terminal(&orchestrator, job_id).await;

    assert_eq!(status.error_code.as_deref(), Some("generation_timeout"));
    assert!(queue.hits_async().await >= 2);
    assert_eq!(orchestrator.pool().load().await.unwrap(), vec!["tokA"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_jobs_get_the_slot_in_submission_order() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(CREATE_PATH);
            then.status(200).json_body(accepted_body(42, 5));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(QUEUE_PATH);
            then.status(200).json_body(json!({"code": 0, "data": {"list": [], "total": 0}}));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        client(&server),
        pool_with(&dir, &["tokA"]).await,
        RunnerSettings {
            max_concurrent_jobs: 1,
            poll_interval: Duration::from_millis(20),
            generation_timeout: Duration::from_millis(60),
            registry_capacity: 10,
        },
    );

    let submitted: Vec<Uuid> = (0..5)
        .map(|i| orchestrator.submit_job(format!("user-{i}"), request()).unwrap())
        .collect();

    let mut finished = Vec::new();
    for _ in 0..1000 {
        for id in &submitted {
            let status = orchestrator.get_job_status(id).unwrap();
            if status.status.is_terminal() && !finished.contains(id) {
                finished.push(*id);
            }
        }
        if finished.len() == submitted.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(finished, submitted);
    for id in &submitted {
        let status = orchestrator.get_job_status(id).unwrap();
        assert_eq!(status.error_code.as_deref(), Some("generation_timeout"));
    }
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let server = MockServer::start_async().await;
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(client(&server), pool_with(&dir, &[]).await, settings());

    assert!(orchestrator.get_job_status(&Uuid::new_v4()).is_none());
}
