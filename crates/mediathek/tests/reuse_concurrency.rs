//! Cross-version reuse and concurrent loaders.

mod common;

use common::{DB_NAME, build_s1, env, write_wav};
use futures::StreamExt;
use mediathek::{LoadEvent, LoadRequest, PublishRequest, load, load_stream, publish};

#[tokio::test]
async fn test_cross_version_reuse_on_load() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();
    write_wav(&build.path().join("audio/004.wav"), 16000, 16, 1, 16000, 0x04);
    let mut request = PublishRequest::new(build.path(), "1.1.0");
    request.previous_version = Some("1.0.0".to_string());
    publish(&env.config, &env.repository, request).await.unwrap();

    // Prime the cache with 1.0.0.
    let mut request = LoadRequest::new(DB_NAME);
    request.version = Some("1.0.0".to_string());
    load(&env.config, request).await.unwrap();

    // Loading 1.1.0 fetches exactly one new media archive; everything
    // else is reused from the 1.0.0 directory.
    let mut request = LoadRequest::new(DB_NAME);
    request.version = Some("1.1.0".to_string());
    let stream = load_stream(&env.config, request);
    futures::pin_mut!(stream);
    let mut reused = Vec::new();
    let mut fetched = Vec::new();
    let mut outcome = None;
    while let Some(event) = stream.next().await {
        match event.unwrap() {
            LoadEvent::Reused { path } => reused.push(path),
            LoadEvent::Fetched { archive, .. } => fetched.push(archive),
            LoadEvent::Complete(finished) => outcome = Some(finished),
            _ => {},
        }
    }
    let outcome = outcome.unwrap();
    assert!(outcome.failed.is_empty());
    for file in ["audio/001.wav", "audio/002.wav", "audio/003.wav"] {
        assert!(reused.contains(&file.to_string()), "{file} was not reused: {reused:?}");
        assert!(outcome.root.join(file).exists());
    }
    assert_eq!(fetched.len(), 1, "expected exactly one fetch, got {fetched:?}");
    assert!(fetched[0].starts_with("media/"));
    assert!(outcome.root.join("audio/004.wav").exists());
}

#[tokio::test]
async fn test_reused_files_are_hard_linked_when_possible() {
    use std::os::unix::fs::MetadataExt;

    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();
    write_wav(&build.path().join("audio/004.wav"), 16000, 16, 1, 16000, 0x04);
    let mut request = PublishRequest::new(build.path(), "1.1.0");
    request.previous_version = Some("1.0.0".to_string());
    publish(&env.config, &env.repository, request).await.unwrap();

    let mut request = LoadRequest::new(DB_NAME);
    request.version = Some("1.0.0".to_string());
    let first = load(&env.config, request).await.unwrap();
    let mut request = LoadRequest::new(DB_NAME);
    request.version = Some("1.1.0".to_string());
    let second = load(&env.config, request).await.unwrap();

    // Same cache filesystem, so reuse links instead of copying.
    let a = std::fs::metadata(first.root.join("audio/001.wav")).unwrap();
    let b = std::fs::metadata(second.root.join("audio/001.wav")).unwrap();
    assert_eq!(a.ino(), b.ino());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loaders_share_one_cache() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();

    let one = {
        let config = env.config.clone();
        tokio::spawn(async move { load(&config, LoadRequest::new(DB_NAME)).await })
    };
    let two = {
        let config = env.config.clone();
        tokio::spawn(async move { load(&config, LoadRequest::new(DB_NAME)).await })
    };
    let one = one.await.unwrap().unwrap();
    let two = two.await.unwrap().unwrap();

    // Both see the same fully populated directory.
    assert_eq!(one.root, two.root);
    assert!(one.failed.is_empty() && two.failed.is_empty());
    for file in ["audio/001.wav", "audio/002.wav", "audio/003.wav"] {
        assert_eq!(
            std::fs::read(one.root.join(file)).unwrap(),
            std::fs::read(build.path().join(file)).unwrap()
        );
    }
    assert!(one.root.join(".complete").exists());
}

#[tokio::test]
async fn test_cached_listing() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();
    load(&env.config, LoadRequest::new(DB_NAME)).await.unwrap();

    let entries = mediathek::api::cached(&env.config).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, DB_NAME);
    assert_eq!(entries[0].version, "1.0.0");
    assert_eq!(entries[0].flavor_id, "default");
    assert!(entries[0].complete);

    assert!(mediathek::api::exists(&env.config, DB_NAME, Some("1.0.0"), Default::default()).await.unwrap());
    assert!(!mediathek::api::exists(&env.config, DB_NAME, Some("1.0.0"), mediathek::FlavorSpec {
        format: Some("flac".to_string()),
        ..Default::default()
    })
    .await
    .unwrap());
}
