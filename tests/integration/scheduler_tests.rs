//! Integration tests for the scheduler
//!
//! These tests use wiremock to create mock HTTP servers and drive the full
//! submit → queue → worker → tracker cycle end-to-end.

use std::path::Path;
use std::time::{Duration, Instant};
use sumi_harvest::config::{parse_config, Config};
use sumi_harvest::scheduler::{Phase, Placement};
use sumi_harvest::{HarvestError, Scheduler, SubmitOutcome, UrlState};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration writing into `dir`, with one loopback resource
fn create_test_config(dir: &Path) -> Config {
    let toml = format!(
        r#"
[scheduler]
worker-ceiling = 8
initial-workers-per-resource = 1
scale-check-interval-ms = 50
retry-backoff-unit-ms = 10
idle-interval-ms = 2
stats-interval-ms = 1000

[fetch]
request-timeout-secs = 5
clients-per-resource = 2

[output]
download-dir = '{dir}/downloads'
completed-log = '{dir}/completed.txt'
failed-log = '{dir}/failed.txt'

[[resource]]
name = "lo"
capacity = "standard"
"#,
        dir = dir.display()
    );

    parse_config(&toml).expect("Failed to parse test config")
}

/// Polls until `expected` URLs reached a terminal state
async fn wait_for_terminal(scheduler: &Scheduler, expected: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let counts = scheduler.tracker().counts();
        if counts.completed + counts.failed >= expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} terminal URLs: {:?}",
            expected,
            counts
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_duplicate_submission_creates_one_task() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/a.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pdf"))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let scheduler = Scheduler::start(create_test_config(dir.path()))
        .await
        .unwrap();

    let url = format!("{}/files/a.pdf", mock_server.uri());
    assert!(scheduler.submit(&url, 0).is_accepted());
    assert_eq!(scheduler.submit(&url, 0), SubmitOutcome::Duplicate);
    // same resource, different spelling
    assert_eq!(
        scheduler.submit(&format!("{}#page=3", url), 1),
        SubmitOutcome::Duplicate
    );
    assert!(scheduler.tracker().is_known(&url));

    wait_for_terminal(&scheduler, 1).await;
    scheduler.shutdown().await;

    assert_eq!(scheduler.submit(&url, 0), SubmitOutcome::Rejected);
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(scheduler.stats().attempts, 1);
}

#[tokio::test]
async fn test_not_found_fails_after_one_attempt() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let scheduler = Scheduler::start(create_test_config(dir.path()))
        .await
        .unwrap();

    let url = format!("{}/missing.pdf", mock_server.uri());
    scheduler.submit(&url, 0);
    wait_for_terminal(&scheduler, 1).await;

    assert_eq!(scheduler.tracker().state(&url), UrlState::Failed);
    assert_eq!(scheduler.tracker().attempts_for(&url), Some(0));

    let stats = scheduler.stats();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.successes, 0);

    scheduler.shutdown().await;

    // nothing was retried while draining
    assert_eq!(scheduler.stats().attempts, 1);
}

#[tokio::test]
async fn test_retries_until_success() {
    let mock_server = MockServer::start().await;

    // Fail twice, then succeed
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 2048]))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let scheduler = Scheduler::start(create_test_config(dir.path()))
        .await
        .unwrap();

    let url = format!("{}/flaky.bin", mock_server.uri());
    scheduler.submit(&url, 0);
    wait_for_terminal(&scheduler, 1).await;

    assert_eq!(scheduler.tracker().state(&url), UrlState::Completed);
    assert_eq!(scheduler.tracker().attempts_for(&url), Some(2));

    let stats = scheduler.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.bytes, 2048);

    scheduler.shutdown().await;

    let written = std::fs::read(dir.path().join("downloads").join("flaky.bin")).unwrap();
    assert_eq!(written.len(), 2048);
}

#[tokio::test]
async fn test_retries_capped_at_max_retries() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.scheduler.max_retries = 2;
    let scheduler = Scheduler::start(config).await.unwrap();

    let url = format!("{}/down.bin", mock_server.uri());
    scheduler.submit(&url, 0);
    wait_for_terminal(&scheduler, 1).await;
    scheduler.shutdown().await;

    assert_eq!(scheduler.tracker().state(&url), UrlState::Failed);
    assert_eq!(scheduler.tracker().attempts_for(&url), Some(2));
    assert_eq!(scheduler.stats().attempts, 3);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn test_full_resource_queue_routes_to_priority() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.scheduler.worker_ceiling = 1;
    config.scheduler.queue_capacity_per_resource = 2;
    config.scheduler.priority_queue_capacity = 4;
    let scheduler = Scheduler::start(config).await.unwrap();

    // The single worker cannot run until this task yields
    let outcomes: Vec<_> = (0..3)
        .map(|i| scheduler.submit(&format!("{}/f{}.txt", mock_server.uri(), i), 0))
        .collect();

    assert_eq!(
        outcomes,
        vec![
            SubmitOutcome::Queued(Placement::Resource(0)),
            SubmitOutcome::Queued(Placement::Resource(0)),
            SubmitOutcome::Queued(Placement::Priority),
        ]
    );

    let stats = scheduler.stats();
    assert_eq!(stats.queue_depths[0].len, 2);
    assert_eq!(stats.queue_depths[0].capacity, 2);
    assert_eq!(stats.priority_queue.len, 1);
    assert_eq!(stats.pending, 3);

    scheduler.shutdown().await;

    let stats = scheduler.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.active_workers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_critical_utilization_scales_by_four_steps() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.scheduler.worker_ceiling = 64;
    config.scheduler.scale_step = 4;
    config.scheduler.scale_threshold = 0.4;
    config.scheduler.scale_check_interval_ms = 150;
    config.scheduler.queue_capacity_per_resource = 10;
    config.scheduler.priority_queue_capacity = 1;
    let scheduler = Scheduler::start(config).await.unwrap();
    assert_eq!(scheduler.stats().active_workers, 1);

    // One in flight plus ten queued keeps utilization above 0.8
    for i in 0..11 {
        assert!(scheduler
            .submit(&format!("{}/slow{}.bin", mock_server.uri(), i), 0)
            .is_accepted());
    }

    tokio::time::sleep(Duration::from_millis(400)).await;

    // 4 x step, once; the queues are empty by the next check
    let stats = scheduler.stats();
    assert_eq!(stats.active_workers, 1 + 16);
    assert!(stats.active_workers <= 64);

    scheduler.shutdown().await;
    assert_eq!(scheduler.stats().completed, 11);
    assert_eq!(scheduler.stats().active_workers, 17);
}

#[tokio::test(flavor = "current_thread")]
async fn test_overflow_triggers_emergency_scale_up() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("held")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.scheduler.worker_ceiling = 40;
    config.scheduler.scale_step = 2;
    // the periodic scaler never fires during the test
    config.scheduler.scale_check_interval_ms = 600_000;
    config.scheduler.queue_capacity_per_resource = 1;
    config.scheduler.priority_queue_capacity = 1;
    config.overflow.max_attempts = 50;
    config.overflow.delay_step_ms = 5;
    let scheduler = Scheduler::start(config).await.unwrap();
    assert_eq!(scheduler.stats().active_workers, 1);

    // Nothing runs until this task yields: one fits each queue, two overflow
    let outcomes: Vec<_> = (0..4)
        .map(|i| scheduler.submit(&format!("{}/e{}.bin", mock_server.uri(), i), 0))
        .collect();
    assert_eq!(
        outcomes.iter().filter(|o| **o == SubmitOutcome::Overflowed).count(),
        2
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    // 3 x step per overflowed task
    assert_eq!(scheduler.stats().active_workers, 1 + 2 * 6);

    for i in 4..34 {
        assert!(scheduler
            .submit(&format!("{}/e{}.bin", mock_server.uri(), i), 0)
            .is_accepted());
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scheduler.stats().active_workers, 40);

    scheduler.shutdown().await;

    let stats = scheduler.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.completed + stats.failed, 34);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.active_workers, 40);
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.scheduler.worker_ceiling = 0;

    let result = Scheduler::start(config).await;
    assert!(matches!(result, Err(HarvestError::Config(_))));
    assert!(!dir.path().join("downloads").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_never_blocks_when_queues_full() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("x")
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.scheduler.worker_ceiling = 1;
    config.scheduler.queue_capacity_per_resource = 1;
    config.scheduler.priority_queue_capacity = 1;
    config.overflow.max_attempts = 3;
    config.overflow.delay_step_ms = 5;
    let scheduler = Scheduler::start(config).await.unwrap();

    let mut overflowed = 0;
    let mut slowest = Duration::ZERO;
    let started = Instant::now();
    for i in 0..500 {
        let call = Instant::now();
        let outcome = scheduler.submit(&format!("{}/b{}.bin", mock_server.uri(), i), 0);
        slowest = slowest.max(call.elapsed());
        if outcome == SubmitOutcome::Overflowed {
            overflowed += 1;
        }
    }

    assert!(overflowed > 0);
    assert!(slowest < Duration::from_millis(50), "slowest submit took {:?}", slowest);
    assert!(started.elapsed() < Duration::from_secs(2));

    scheduler.shutdown().await;

    let stats = scheduler.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.completed + stats.failed, 500);
    // only overflow drops fail here
    assert_eq!(stats.dropped, stats.failed);
    assert!(stats.dropped > 0);
    assert_eq!(stats.active_workers, 1);
}

#[tokio::test]
async fn test_shutdown_drains_queued_work() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("data")
                .set_delay(Duration::from_millis(10)),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.scheduler.worker_ceiling = 2;
    config.scheduler.initial_workers_per_resource = 2;
    let scheduler = Scheduler::start(config).await.unwrap();

    for i in 0..20 {
        scheduler.submit(&format!("{}/d{}.dat", mock_server.uri(), i), 0);
    }

    // Shut down immediately; everything queued must still be downloaded
    scheduler.shutdown().await;

    let stats = scheduler.stats();
    assert_eq!(scheduler.phase(), Phase::Stopped);
    assert_eq!(stats.completed, 20);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.live_workers, 0);
    assert_eq!(stats.total_queued(), 0);

    // A second call returns at once
    scheduler.shutdown().await;

    let completed = std::fs::read_to_string(dir.path().join("completed.txt")).unwrap();
    assert_eq!(completed.lines().count(), 20);
}

#[tokio::test]
async fn test_journals_record_terminal_urls() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/good.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_string("good"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/forbidden.pdf"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let scheduler = Scheduler::start(create_test_config(dir.path()))
        .await
        .unwrap();

    let good = format!("{}/good.pdf", mock_server.uri());
    let forbidden = format!("{}/forbidden.pdf", mock_server.uri());
    scheduler.submit(&good, 0);
    scheduler.submit(&forbidden, 0);

    wait_for_terminal(&scheduler, 2).await;
    scheduler.shutdown().await;

    let completed = std::fs::read_to_string(dir.path().join("completed.txt")).unwrap();
    let failed = std::fs::read_to_string(dir.path().join("failed.txt")).unwrap();
    assert_eq!(completed, format!("{}\n", good));
    assert_eq!(failed, format!("{}\n", forbidden));

    // 403 is terminal
    assert_eq!(scheduler.stats().attempts, 2);
}

#[tokio::test]
async fn test_invalid_urls_are_not_tracked() {
    let dir = TempDir::new().unwrap();
    let scheduler = Scheduler::start(create_test_config(dir.path()))
        .await
        .unwrap();

    assert_eq!(scheduler.submit("ftp://example.com/a.pdf", 0), SubmitOutcome::Invalid);
    assert_eq!(scheduler.submit("not a url", 0), SubmitOutcome::Invalid);
    assert_eq!(scheduler.stats().pending, 0);

    scheduler.shutdown().await;
    assert_eq!(scheduler.stats().attempts, 0);
}
