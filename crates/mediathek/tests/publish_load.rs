//! End-to-end publish and load against a filesystem repository.

mod common;

use common::{DB_NAME, build_s1, env, write_wav};
use mediathek::error::ErrorKind;
use mediathek::{BackendKind, Filter, LoadRequest, PublishRequest, Repository, load, publish};

#[tokio::test]
async fn test_minimal_publish_and_load_roundtrip() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());

    let deps = publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();
    assert_eq!(deps.media().count(), 3);
    assert_eq!(deps.tables().collect::<Vec<_>>(), vec!["db.age.parquet"]);

    // Expected repository layout.
    let repo = env.repo_root();
    assert!(repo.join("songs/1.0.0/db.yaml").exists());
    assert!(repo.join("songs/1.0.0/db.parquet").exists());
    assert!(repo.join("songs/meta/1.0.0/age.zip").exists());
    let media_archives: Vec<_> = std::fs::read_dir(repo.join("songs/media/1.0.0")).unwrap().collect();
    assert_eq!(media_archives.len(), 3);

    // Audio metadata was probed at publish time.
    assert_eq!(deps.sampling_rate("audio/001.wav").unwrap(), 16000);
    assert_eq!(deps.bit_depth("audio/001.wav").unwrap(), 16);
    assert_eq!(deps.channels("audio/001.wav").unwrap(), 1);
    assert!((deps.duration("audio/001.wav").unwrap() - 1.0).abs() < 0.05);

    // Loading into the empty cache reproduces the build byte for byte.
    let outcome = load(&env.config, LoadRequest::new(DB_NAME)).await.unwrap();
    assert_eq!(outcome.version, "1.0.0");
    for file in ["audio/001.wav", "audio/002.wav", "audio/003.wav", "db.age.parquet"] {
        assert_eq!(
            std::fs::read(outcome.root.join(file)).unwrap(),
            std::fs::read(build.path().join(file)).unwrap(),
            "{file} differs from the build"
        );
    }
    assert!(outcome.root.join(".complete").exists());
    assert!(outcome.failed.is_empty());
    assert!(
        mediathek::api::verify_complete(&env.config, DB_NAME, Some("1.0.0"), Default::default()).await.unwrap()
    );

    // A bit-rotted file behind a stale sentinel is not complete.
    std::fs::write(outcome.root.join("audio/002.wav"), b"rot").unwrap();
    assert!(
        !mediathek::api::verify_complete(&env.config, DB_NAME, Some("1.0.0"), Default::default()).await.unwrap()
    );
}

#[tokio::test]
async fn test_incremental_publish_reuses_unchanged_rows() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    let first = publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();

    write_wav(&build.path().join("audio/004.wav"), 16000, 16, 1, 16000, 0x04);
    let mut request = PublishRequest::new(build.path(), "1.1.0");
    request.previous_version = Some("1.0.0".to_string());
    let second = publish(&env.config, &env.repository, request).await.unwrap();

    // Exactly one new media archive.
    let media_archives: Vec<_> = std::fs::read_dir(env.repo_root().join("songs/media/1.1.0")).unwrap().collect();
    assert_eq!(media_archives.len(), 1);

    // Four media rows; unchanged rows keep their original version and
    // archive.
    assert_eq!(second.media().count(), 4);
    for file in ["audio/001.wav", "audio/002.wav", "audio/003.wav"] {
        assert_eq!(second.version(file).unwrap(), "1.0.0");
        assert_eq!(second.archive(file).unwrap(), first.archive(file).unwrap());
        assert_eq!(second.checksum(file).unwrap(), first.checksum(file).unwrap());
    }
    assert_eq!(second.version("audio/004.wav").unwrap(), "1.1.0");

    // The unchanged table row keeps its version too.
    assert_eq!(second.version("db.age.parquet").unwrap(), "1.0.0");
}

#[tokio::test]
async fn test_remove_then_reload() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();
    write_wav(&build.path().join("audio/004.wav"), 16000, 16, 1, 16000, 0x04);
    let mut request = PublishRequest::new(build.path(), "1.1.0");
    request.previous_version = Some("1.0.0".to_string());
    publish(&env.config, &env.repository, request).await.unwrap();

    // Withdraw 002 by removing it from the build.
    std::fs::remove_file(build.path().join("audio/002.wav")).unwrap();
    let mut request = PublishRequest::new(build.path(), "1.2.0");
    request.previous_version = Some("1.1.0".to_string());
    let deps = publish(&env.config, &env.repository, request).await.unwrap();
    assert!(deps.is_removed("audio/002.wav").unwrap());
    // The tombstone stays in the table.
    assert_eq!(deps.media().count(), 4);
    assert_eq!(deps.removed_media().collect::<Vec<_>>(), vec!["audio/002.wav"]);

    // A fresh load of 1.2.0 skips the tombstoned file entirely.
    let (_cache, config) = env.fresh_cache();
    let mut request = LoadRequest::new(DB_NAME);
    request.version = Some("1.2.0".to_string());
    let outcome = load(&config, request).await.unwrap();
    assert!(!outcome.root.join("audio/002.wav").exists());
    assert!(outcome.root.join("audio/001.wav").exists());
    assert!(outcome.root.join("audio/004.wav").exists());

    // Loading 1.1.0 afterwards still materializes it.
    let mut request = LoadRequest::new(DB_NAME);
    request.version = Some("1.1.0".to_string());
    let outcome = load(&config, request).await.unwrap();
    assert!(outcome.root.join("audio/002.wav").exists());
}

#[tokio::test]
async fn test_interrupted_publish_is_restartable() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();

    // Simulate an interruption after the archives went up but before
    // the commit: the version must become invisible again.
    std::fs::remove_file(env.repo_root().join("songs/1.0.0/db.yaml")).unwrap();
    std::fs::remove_file(env.repo_root().join("songs/1.0.0/db.parquet")).unwrap();
    assert!(mediathek::versions(&env.config, DB_NAME).await.unwrap().is_empty());

    // Re-running the same publish succeeds and produces a visible
    // version; existing archives are simply detected.
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();
    assert_eq!(mediathek::versions(&env.config, DB_NAME).await.unwrap(), vec!["1.0.0".to_string()]);
    assert!(env.repo_root().join("songs/1.0.0/db.yaml").exists());
}

#[tokio::test]
async fn test_partial_load_is_resumable() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();

    // First load only one media file.
    let mut request = LoadRequest::new(DB_NAME);
    request.media = Filter::names(["audio/001.wav"]);
    let outcome = load(&env.config, request).await.unwrap();
    assert!(outcome.root.join("audio/001.wav").exists());
    assert!(!outcome.root.join("audio/002.wav").exists());
    // The narrow scope still completed.
    assert!(outcome.root.join(".complete").exists());

    // A broader load extends the same directory.
    let outcome = load(&env.config, LoadRequest::new(DB_NAME)).await.unwrap();
    assert!(outcome.root.join("audio/002.wav").exists());
    assert!(outcome.root.join("audio/003.wav").exists());
}

#[tokio::test]
async fn test_load_unknown_database_fails_not_found() {
    let env = env();
    let err = load(&env.config, LoadRequest::new("ghost")).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound { .. }));
}

#[tokio::test]
async fn test_load_unknown_version_fails_not_found() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();

    let mut request = LoadRequest::new(DB_NAME);
    request.version = Some("9.9.9".to_string());
    let err = load(&env.config, request).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound { .. }));
}

#[tokio::test]
async fn test_publish_rejects_stale_previous_version() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    let mut request = PublishRequest::new(build.path(), "1.0.0");
    request.previous_version = Some("1.0.0".to_string());
    let err = publish(&env.config, &env.repository, request).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));

    let mut request = PublishRequest::new(build.path(), "1.0.0");
    request.previous_version = Some("2.0.0".to_string());
    let err = publish(&env.config, &env.repository, request).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
}

#[tokio::test]
async fn test_publish_rejects_bad_version_string() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    let err = publish(&env.config, &env.repository, PublishRequest::new(build.path(), "not-a-version"))
        .await
        .unwrap_err();
    assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
}

#[tokio::test]
async fn test_publish_rejects_uppercase_media_extension() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    write_wav(&build.path().join("audio/BAD.WAV"), 16000, 16, 1, 160, 0x09);
    let err = publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
}

#[tokio::test]
async fn test_publish_rejects_existing_version() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();
    let err = publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
}

#[tokio::test]
async fn test_publish_rejects_unregistered_backend() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    let artifactory = Repository::new("repo", "https://example.com", BackendKind::Artifactory);
    let err = publish(&env.config, &artifactory, PublishRequest::new(build.path(), "1.0.0")).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::UnsupportedBackend(_)));
}

#[tokio::test]
async fn test_available_and_versions() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();
    write_wav(&build.path().join("audio/004.wav"), 16000, 16, 1, 16000, 0x04);
    let mut request = PublishRequest::new(build.path(), "1.1.0");
    request.previous_version = Some("1.0.0".to_string());
    publish(&env.config, &env.repository, request).await.unwrap();

    assert_eq!(
        mediathek::versions(&env.config, DB_NAME).await.unwrap(),
        vec!["1.0.0".to_string(), "1.1.0".to_string()]
    );
    assert_eq!(mediathek::latest_version(&env.config, DB_NAME).await.unwrap(), "1.1.0");
    assert_eq!(mediathek::repository(&env.config, DB_NAME, "1.0.0").await.unwrap(), env.repository);

    let entries = mediathek::available(&env.config, None).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, DB_NAME);
    assert_eq!(entries[0].version, "1.0.0");
    assert_eq!(entries[1].version, "1.1.0");

    // A half-published version (no dependency table) is invisible.
    std::fs::create_dir_all(env.repo_root().join("songs/2.0.0")).unwrap();
    std::fs::write(env.repo_root().join("songs/2.0.0/db.yaml"), "name: songs\n").unwrap();
    let entries = mediathek::available(&env.config, None).await.unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn test_info_queries_answer_from_the_header() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    std::fs::write(
        build.path().join("db.yaml"),
        "name: songs\ndescription: three beeps\nlanguages: [deu, eng]\nlicense: CC0-1.0\n\
         schemes:\n  age: {dtype: int}\ntables:\n  age:\n    type: filewise\n",
    )
    .unwrap();
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();

    let (_cache, config) = env.fresh_cache();
    assert_eq!(
        mediathek::info::description(&config, DB_NAME, None).await.unwrap(),
        Some("three beeps".to_string())
    );
    assert_eq!(mediathek::info::languages(&config, DB_NAME, None).await.unwrap(), vec!["deu", "eng"]);
    assert_eq!(mediathek::info::schemes(&config, DB_NAME, None).await.unwrap(), vec!["age"]);
    assert_eq!(mediathek::info::tables(&config, DB_NAME, None).await.unwrap(), vec!["age"]);
    assert_eq!(mediathek::info::files(&config, DB_NAME, None).await.unwrap(), 3);
    let total = mediathek::info::duration(&config, DB_NAME, None).await.unwrap();
    assert!((total - 3.0).abs() < 0.2, "expected ~3s of audio, got {total}");
    assert_eq!(mediathek::info::sampling_rates(&config, DB_NAME, None).await.unwrap(), vec![16000]);
    assert_eq!(mediathek::info::formats(&config, DB_NAME, None).await.unwrap(), vec!["wav"]);

    // Nothing but the header and the dependency table were fetched.
    let flavor_dir = config.layout().flavor_dir(DB_NAME, "1.0.0", "default");
    assert!(!flavor_dir.join("audio/001.wav").exists());
    assert!(!flavor_dir.join("db.age.parquet").exists());
}
