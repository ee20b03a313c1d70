// ratepool/tests/performance.rs

use assert_cmd::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ratepool(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ratepool").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .timeout(Duration::from_secs(30));
    cmd
}

async fn ok_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(delay))
        .mount(&server)
        .await;
    server
}

#[tokio::test(flavor = "multi_thread")]
async fn test_global_rate_limit_bounds_wall_time() {
    let server = ok_server(Duration::ZERO).await;
    let home = TempDir::new().unwrap();
    let start = Instant::now();

    // 11 requests at 10 qps need at least 1s no matter how many workers.
    ratepool(&home)
        .args([server.uri().as_str(), "-n", "11", "-c", "4", "-q", "10", "--quiet"])
        .assert()
        .success();

    let duration = start.elapsed();
    assert!(
        duration >= Duration::from_millis(950),
        "Rate limit not applied: {:?}",
        duration
    );
    assert!(
        duration.as_secs() < 10,
        "Rate-limited run took too long: {:?}",
        duration
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_per_worker_limit_scales_with_workers() {
    let server = ok_server(Duration::ZERO).await;
    let home = TempDir::new().unwrap();
    let start = Instant::now();

    // 4 workers at 10 qps each: 12 requests need about 200ms, not 1.1s.
    ratepool(&home)
        .args([
            server.uri().as_str(),
            "-n",
            "12",
            "-c",
            "4",
            "-q",
            "10",
            "--per-worker",
            "--quiet",
        ])
        .assert()
        .success();

    let duration = start.elapsed();
    assert!(
        duration < Duration::from_secs(1),
        "Per-worker limit behaved like a global one: {:?}",
        duration
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_processing_efficiency() {
    let server = ok_server(Duration::from_millis(200)).await;
    let home = TempDir::new().unwrap();
    let start = Instant::now();

    // 20 slow requests over 10 workers: two rounds, not twenty.
    ratepool(&home)
        .args([server.uri().as_str(), "-n", "20", "-c", "10", "--quiet"])
        .assert()
        .success();

    let duration = start.elapsed();
    assert!(
        duration < Duration::from_secs(3),
        "Workers did not run concurrently: {:?}",
        duration
    );
}
