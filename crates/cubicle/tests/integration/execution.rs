use std::time::Duration;

use cubicle::config::Config;
use cubicle::docker::Method;
use cubicle::error::ErrorKind;
use cubicle::runner::{ExecuteError, Runner};
use cubicle::types::Language;
use serde_json::Value;

use super::{ALPINE_TAG, alpine, fixture_source, test_config};

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_run_hello_world() {
    let runner = Runner::new(test_config());

    let result = runner
        .execute(&alpine(), ALPINE_TAG, &fixture_source("hello.sh"))
        .await
        .expect("Execution failed");

    assert!(result.is_success());
    assert_eq!(result.stdout, "Hello, World!\n");
    assert!(result.stderr.is_empty());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_run_separates_streams() {
    let runner = Runner::new(test_config());

    let result = runner
        .execute(&alpine(), ALPINE_TAG, &fixture_source("streams.sh"))
        .await
        .expect("Execution failed");

    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stdout, "to stdout\nmore stdout\n");
    assert_eq!(result.stderr, "to stderr\n");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_run_preserves_unicode() {
    let runner = Runner::new(test_config());
    let source = fixture_source("unicode.sh");

    let result = runner
        .execute(&alpine(), ALPINE_TAG, &source)
        .await
        .expect("Execution failed");

    assert!(result.stdout.contains("héllo wörld"));
    assert!(result.stdout.contains("日本語のテキスト"));
    assert!(result.stdout.contains("🦀"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_run_python() {
    let runner = Runner::new(test_config());
    let python = Language::new(
        "python",
        vec!["3.12-alpine".to_owned()],
        vec!["python3".to_owned(), "SOURCE_CODE".to_owned()],
    );

    let result = runner
        .execute(&python, "3.12-alpine", &fixture_source("hello.py"))
        .await
        .expect("Execution failed");

    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.contains("ok"));
}

#[tokio::test]
async fn test_unsupported_version_needs_no_daemon() {
    // Points at a socket that does not exist; the check happens first
    let config = Config {
        socket_path: "/nonexistent/docker.sock".into(),
        ..Config::empty()
    };
    let runner = Runner::new(config);

    let err = runner
        .execute(&alpine(), "1.0", "echo hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecuteError::Unsupported { .. }));
    assert_eq!(err.kind().status_code(), 422);
}

#[tokio::test]
async fn test_unreachable_daemon() {
    let config = Config {
        socket_path: "/nonexistent/docker.sock".into(),
        ..Config::empty()
    };
    let runner = Runner::new(config);

    let err = runner
        .execute(&alpine(), ALPINE_TAG, "echo hi")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeUnavailable);
}

/// Ids of every container created from `image`, running or not
async fn containers_from(runner: &Runner, image: &str) -> Vec<String> {
    let filters = serde_json::json!({ "ancestor": [image] }).to_string();
    let path = format!(
        "/containers/json?all=true&filters={}",
        urlencoding::encode(&filters)
    );
    let res = runner
        .transport()
        .request(Method::GET, &path, None)
        .await
        .expect("Failed to list containers");
    let listed: Vec<Value> = serde_json::from_slice(&res.body).expect("Invalid container list");
    listed
        .iter()
        .filter_map(|c| c["Id"].as_str().map(str::to_owned))
        .collect()
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_timeout_removes_container() {
    // busybox is only used here so other tests cannot add containers
    let busybox = Language::new(
        "busybox",
        vec!["1.36".to_owned()],
        vec!["sh".to_owned(), "SOURCE_CODE".to_owned()],
    );
    let runner = Runner::new(Config {
        execution_timeout: 2.0,
        ..Config::empty()
    });
    runner
        .images()
        .ensure(&busybox.image("1.36"))
        .await
        .expect("Failed to pull busybox");
    let before = containers_from(&runner, "busybox:1.36").await;

    let started = std::time::Instant::now();
    let err = runner
        .execute(&busybox, "1.36", &fixture_source("sleep.sh"))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecuteError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(containers_from(&runner, "busybox:1.36").await, before);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_concurrent_executions() {
    let runner = Runner::new(test_config());
    let lang = alpine();

    let runs = (0..4).map(|i| {
        let runner = runner.clone();
        let lang = lang.clone();
        tokio::spawn(async move {
            runner
                .execute(&lang, ALPINE_TAG, &format!("echo {i}"))
                .await
        })
    });

    for (i, handle) in runs.collect::<Vec<_>>().into_iter().enumerate() {
        let result = handle.await.unwrap().expect("Execution failed");
        assert_eq!(result.stdout, format!("{i}\n"));
    }
}
