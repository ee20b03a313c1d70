// ratepool-lib/tests/integration.rs

//! Integration tests for the engine: full runs through the public API.

use ratepool_lib::{
    action_fn, ActionOutput, Engine, EngineConfig, HttpAction, InFlightPolicy, Job, JobResult,
    JobSource, LimiterScope, PoolError, PoolState, Report, StopReason,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn quiet(config: EngineConfig) -> EngineConfig {
    config.with_signal_handling(false)
}

fn jobs(count: u64) -> Vec<Job> {
    (1..=count).map(|i| Job::new(i, format!("job-{}", i))).collect()
}

fn assert_accounted(report: &Report) {
    assert_eq!(
        report.success + report.failure + report.abandoned,
        report.total,
        "every enqueued job must be either completed or abandoned: {:?}",
        report
    );
}

fn ok_action() -> impl ratepool_lib::JobAction {
    action_fn(|_job: Job| async { Ok::<_, PoolError>(ActionOutput::status(200)) })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_jobs_two_workers_all_succeed() {
    let config = quiet(EngineConfig::default().with_workers(2).with_requests(10));
    let report = Engine::new(config, ok_action())
        .unwrap()
        .run(jobs(10))
        .await
        .unwrap();

    assert_eq!(
        (report.success, report.failure, report.abandoned),
        (10, 0, 0)
    );
    assert_eq!(report.total, 10);
    assert_eq!(report.state, PoolState::Completed);
    assert_eq!(report.status_codes.get(&200), Some(&10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_job_claimed_by_exactly_one_worker() {
    let seen: Arc<Mutex<HashMap<u64, usize>>> = Arc::default();
    let recorder = seen.clone();
    let action = action_fn(move |job: Job| {
        let recorder = recorder.clone();
        async move {
            *recorder.lock().unwrap().entry(job.id.0).or_default() += 1;
            tokio::task::yield_now().await;
            Ok::<_, PoolError>(ActionOutput::status(200))
        }
    });

    let config = quiet(EngineConfig::default().with_workers(8).with_requests(500));
    let report = Engine::new(config, action)
        .unwrap()
        .run(jobs(500))
        .await
        .unwrap();

    assert_eq!(report.success, 500);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 500);
    assert!(seen.values().all(|&count| count == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_results_spread_over_workers() {
    let (tx, mut rx) = mpsc::unbounded_channel::<JobResult>();
    let action = action_fn(|_job: Job| async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, PoolError>(ActionOutput::status(204))
    });

    let config = quiet(EngineConfig::default().with_workers(4).with_requests(40));
    let report = Engine::new(config, action)
        .unwrap()
        .with_sink(Arc::new(tx))
        .run(jobs(40))
        .await
        .unwrap();
    assert_eq!(report.success, 40);

    let mut workers = std::collections::HashSet::new();
    let mut streamed = 0;
    while let Ok(result) = rx.try_recv() {
        assert!((1..=4).contains(&result.worker_id));
        workers.insert(result.worker_id);
        streamed += 1;
    }
    assert_eq!(streamed, 40);
    assert!(workers.len() > 1, "expected several workers to take jobs");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_action_does_not_halt_processing() {
    let action = action_fn(|job: Job| async move {
        if job.id.0 % 3 == 0 {
            Err(PoolError::network_with_source("Connection failed", "refused"))
        } else {
            Ok(ActionOutput::status(200))
        }
    });

    let config = quiet(EngineConfig::default().with_workers(3).with_requests(30));
    let report = Engine::new(config, action)
        .unwrap()
        .run(jobs(30))
        .await
        .unwrap();

    assert_eq!(report.success, 20);
    assert_eq!(report.failure, 10);
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.state, PoolState::Completed);
    let (message, count) = report.errors.iter().next().unwrap();
    assert!(!message.is_empty());
    assert_eq!(*count, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_jobs_yields_empty_report() {
    let config = quiet(EngineConfig::default().with_workers(4));
    let report = Engine::new(config, ok_action())
        .unwrap()
        .run(Vec::<Job>::new())
        .await
        .unwrap();

    assert_eq!(report.total, 0);
    assert_eq!(report.completed(), 0);
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.state, PoolState::Completed);
    assert_eq!(report.average, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_limiter_caps_aggregate_rate() {
    // 6 jobs at 10 qps over 3 workers: first permit immediate, then 100ms apart.
    let config = quiet(
        EngineConfig::default()
            .with_workers(3)
            .with_requests(6)
            .with_qps(10.0)
            .with_limiter_scope(LimiterScope::Global),
    );

    let start = Instant::now();
    let report = Engine::new(config, ok_action())
        .unwrap()
        .run(jobs(6))
        .await
        .unwrap();

    assert_eq!(report.success, 6);
    assert!(
        start.elapsed() >= Duration::from_millis(500),
        "6 jobs at 10 qps took only {:?}",
        start.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_worker_limiter_scales_with_workers() {
    // Same job set as above, but each of the 3 workers gets its own 10 qps.
    let config = quiet(
        EngineConfig::default()
            .with_workers(3)
            .with_requests(6)
            .with_qps(10.0)
            .with_limiter_scope(LimiterScope::PerWorker),
    );

    let start = Instant::now();
    let report = Engine::new(config, ok_action())
        .unwrap()
        .run(jobs(6))
        .await
        .unwrap();

    assert_eq!(report.success, 6);
    assert!(
        start.elapsed() < Duration::from_millis(450),
        "per-worker limiting should beat the shared limit, took {:?}",
        start.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_mid_run_abandons_remaining_jobs() {
    // 10 jobs, 1 worker, 2 qps, stop at 1.2s: permits at 0s, 0.5s, 1.0s.
    let config = quiet(
        EngineConfig::default()
            .with_workers(1)
            .with_requests(10)
            .with_qps(2.0),
    );
    let engine = Engine::new(config, ok_action()).unwrap();
    let stop = engine.stop_handle();

    let run = tokio::spawn(engine.run(jobs(10)));
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let stopped_at = Instant::now();
    assert!(stop.request_stop(StopReason::Requested));

    let report = run.await.unwrap().unwrap();
    assert!(stopped_at.elapsed() < Duration::from_secs(1));

    assert!(report.completed() <= 3, "completed {}", report.completed());
    assert!(report.completed() >= 2, "completed {}", report.completed());
    assert_eq!(report.failure, 0);
    assert!(report.abandoned > 0);
    assert_eq!(report.total, 10);
    assert_accounted(&report);
    assert_eq!(report.state, PoolState::Stopped);
    assert_eq!(report.stop_reason, Some(StopReason::Requested));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_counts_jobs_never_enqueued() {
    // Far more jobs than the queue holds: most are still in the source when
    // the stop lands.
    let requests = 100;
    let workers = 2;
    let capacity = 10;
    let config = quiet(
        EngineConfig::default()
            .with_workers(workers)
            .with_requests(requests)
            .with_queue_capacity(capacity)
            .with_qps(20.0),
    );
    let engine = Engine::new(config, ok_action()).unwrap();
    let stop = engine.stop_handle();

    let run = tokio::spawn(engine.run_targets(vec!["http://localhost/".to_string()]));
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.request_stop(StopReason::Requested);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.total, requests);
    assert_eq!(
        report.success + report.failure + report.abandoned,
        requests
    );
    assert!(
        report.abandoned >= requests - capacity - workers - report.completed(),
        "abandoned {} of {}",
        report.abandoned,
        requests
    );
    assert_eq!(report.state, PoolState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_stop_is_same_as_single_stop() {
    let config = quiet(
        EngineConfig::default()
            .with_workers(2)
            .with_requests(100)
            .with_qps(20.0),
    );
    let engine = Engine::new(config, ok_action()).unwrap();
    let stop = engine.stop_handle();

    let run = tokio::spawn(engine.run(jobs(100)));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(stop.request_stop(StopReason::Requested));
    assert!(!stop.request_stop(StopReason::Interrupt));

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.stop_reason, Some(StopReason::Requested));
    assert_eq!(report.state, PoolState::Stopped);
    assert_eq!(report.total, 100);
    assert_accounted(&report);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_stops_endless_source() {
    let config = quiet(
        EngineConfig::default()
            .with_workers(2)
            .with_qps(50.0)
            .with_duration(Duration::from_millis(300)),
    );

    let start = Instant::now();
    let report = Engine::new(config, ok_action())
        .unwrap()
        .run(JobSource::cycle(vec!["a".to_string(), "b".to_string()]))
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(report.stop_reason, Some(StopReason::Deadline));
    assert!(report.completed() > 0);
    // At 50 qps for 0.3s no more than ~16 permits can be issued.
    assert!(report.completed() <= 17, "completed {}", report.completed());
    assert_accounted(&report);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_finish_policy_lets_in_flight_jobs_complete() {
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    let action = action_fn(move |_job: Job| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok::<_, PoolError>(ActionOutput::status(200))
        }
    });

    let config = quiet(EngineConfig::default().with_workers(2).with_requests(20));
    let engine = Engine::new(config, action).unwrap();
    let stop = engine.stop_handle();

    let run = tokio::spawn(engine.run(jobs(20)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.request_stop(StopReason::Requested);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.success, started.load(Ordering::SeqCst));
    assert_eq!(report.failure, 0);
    assert_accounted(&report);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_policy_records_in_flight_as_aborted() {
    let action = action_fn(|_job: Job| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<_, PoolError>(ActionOutput::status(200))
    });

    let config = quiet(
        EngineConfig::default()
            .with_workers(2)
            .with_requests(10)
            .with_in_flight(InFlightPolicy::Abort)
            .with_timeout(Duration::from_secs(60)),
    );
    let engine = Engine::new(config, action).unwrap();
    let stop = engine.stop_handle();

    let run = tokio::spawn(engine.run(jobs(10)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stopped_at = Instant::now();
    stop.request_stop(StopReason::Requested);

    let report = run.await.unwrap().unwrap();
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert_eq!(report.success, 0);
    assert_eq!(report.failure, 2);
    assert!(report.errors.keys().all(|message| message.contains("aborted")));
    assert_accounted(&report);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_http_action_against_mock_server() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ok"))
        .and(header("x-run", "integration"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .mount(&mock_server)
        .await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let action = HttpAction::new(Duration::from_secs(5))
        .unwrap()
        .with_method("post")
        .unwrap()
        .with_header("X-Run", "integration")
        .unwrap()
        .with_body("{}");

    let targets = vec![
        format!("{}/ok", mock_server.uri()),
        format!("{}/broken", mock_server.uri()),
    ];
    let config = quiet(EngineConfig::default().with_workers(2).with_requests(10));
    let report = Engine::new(config, action)
        .unwrap()
        .run(JobSource::repeat(targets, 10))
        .await
        .unwrap();

    assert_eq!(report.success, 5);
    assert_eq!(report.failure, 5);
    assert_eq!(report.status_codes.get(&201), Some(&5));
    assert_eq!(report.status_codes.get(&503), Some(&5));
    assert!(report.errors.keys().all(|message| message.contains("503")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_http_action_timeout_is_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let action = HttpAction::new(Duration::from_millis(200)).unwrap();
    let config = quiet(EngineConfig::default().with_workers(1).with_requests(1));
    let report = Engine::new(config, action)
        .unwrap()
        .run(vec![Job::new(1, format!("{}/slow", mock_server.uri()))])
        .await
        .unwrap();

    assert_eq!(report.failure, 1);
    assert!(report.errors.keys().next().unwrap().contains("Timeout"));
}

#[test]
fn test_library_info() {
    let info = ratepool_lib::info();
    assert_eq!(info.version, ratepool_lib::VERSION);
    assert!(info.default_workers >= 1);
}
