use cubicle::docker::{Container, ContainerState, DockerError, Images, Method};
use cubicle::error::ErrorKind;
use cubicle::types::ImageRef;

use super::{ALPINE_TAG, fixture_source, test_config};

fn alpine_image() -> ImageRef {
    ImageRef::new("alpine", ALPINE_TAG)
}

async fn ensure_alpine(images: &Images) {
    images
        .ensure(&alpine_image())
        .await
        .expect("Failed to pull alpine");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_full_lifecycle() {
    let transport = test_config().transport();
    ensure_alpine(&Images::new(transport.clone())).await;

    let cmd = vec!["sh".to_owned(), "SOURCE_CODE".to_owned()];
    let mut container = Container::create(transport.clone(), &alpine_image(), &cmd, Some("/tmp"))
        .await
        .expect("Failed to create container");
    assert_eq!(container.state(), ContainerState::Created);
    assert!(container.exit_code().is_none());

    container
        .write_file("SOURCE_CODE", fixture_source("streams.sh").as_bytes(), "/tmp")
        .await
        .expect("Failed to write source");
    assert_eq!(container.state(), ContainerState::SourceWritten);

    container.start(true).await.expect("Failed to run container");
    assert_eq!(container.state(), ContainerState::Exited);
    assert_eq!(container.exit_code(), Some(3));

    let result = container.logs().await.expect("Failed to read logs");
    assert_eq!(result.stdout, "to stdout\nmore stdout\n");
    assert_eq!(result.stderr, "to stderr\n");
    assert_eq!(result.exit_code, 3);

    let id = container.id().to_owned();
    container.remove().await.expect("Failed to remove container");
    assert_eq!(container.state(), ContainerState::Removed);

    // Second removal is a no-op
    container.remove().await.expect("Second remove failed");

    let res = transport
        .request(Method::GET, &format!("/containers/{id}/json"), None)
        .await
        .unwrap();
    assert_eq!(res.status, 404);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_logs_before_wait_is_rejected() {
    let transport = test_config().transport();
    ensure_alpine(&Images::new(transport.clone())).await;

    let cmd = vec!["true".to_owned()];
    let mut container = Container::create(transport, &alpine_image(), &cmd, None)
        .await
        .expect("Failed to create container");

    let err = container.logs().await.unwrap_err();
    assert!(matches!(err, DockerError::IllegalTransition { .. }));

    container.remove().await.expect("Failed to remove container");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_create_from_missing_image() {
    let transport = test_config().transport();
    let image = ImageRef::new("alpine", "0.0.0-does-not-exist");
    let cmd = vec!["true".to_owned()];

    let err = Container::create(transport, &image, &cmd, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_pull_missing_tag() {
    let images = Images::new(test_config().transport());
    let err = images
        .pull(&ImageRef::new("alpine", "0.0.0-does-not-exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, DockerError::ImageNotFound { .. }));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_pull_present_image_is_noop() {
    let images = Images::new(test_config().transport());
    ensure_alpine(&images).await;
    images
        .pull(&alpine_image())
        .await
        .expect("Repeated pull failed");
    assert!(images.exists(&alpine_image()).await.unwrap());
}
