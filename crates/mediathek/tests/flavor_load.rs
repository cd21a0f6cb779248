//! Flavor materialization.

mod common;

use common::{DB_NAME, build_s1, env};
use mediathek::error::ErrorKind;
use mediathek::{FlavorSpec, LoadRequest, MediaProps, MediaTransform, PublishRequest, load, publish};
use std::path::Path;
use std::sync::Arc;

/// Stand-in for the audio transcoder: prefixes the source bytes so the
/// tests can tell converted files apart.
struct FakeTranscoder;

impl MediaTransform for FakeTranscoder {
    fn transform(
        &self,
        src: &Path,
        dest: &Path,
        _props: &MediaProps,
        _flavor: &mediathek::Flavor,
    ) -> mediathek_flavor::error::Result<()> {
        let mut bytes = b"TRANSCODED:".to_vec();
        bytes.extend(std::fs::read(src).map_err(mediathek_flavor::error::ErrorKind::Io)?);
        std::fs::write(dest, bytes).map_err(mediathek_flavor::error::ErrorKind::Io)?;
        Ok(())
    }
}

fn flac_44k() -> FlavorSpec {
    FlavorSpec {
        format: Some("flac".to_string()),
        sampling_rate: Some(44100),
        ..FlavorSpec::default()
    }
}

#[tokio::test]
async fn test_flavor_materialization() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    let published = publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();

    let mut request = LoadRequest::new(DB_NAME);
    request.flavor = flac_44k();
    request.transform = Some(Arc::new(FakeTranscoder));
    let outcome = load(&env.config, request).await.unwrap();

    // A sibling flavor directory, not the default one.
    let flavor_id = outcome.root.file_name().unwrap().to_string_lossy().into_owned();
    assert_ne!(flavor_id, "default");
    assert_eq!(flavor_id.len(), 8);

    // Every WAV was transcoded to FLAC; the originals are gone.
    for stem in ["audio/001", "audio/002", "audio/003"] {
        let flac = outcome.root.join(format!("{stem}.flac"));
        assert!(flac.exists(), "{stem}.flac missing");
        assert!(std::fs::read(&flac).unwrap().starts_with(b"TRANSCODED:"));
        assert!(!outcome.root.join(format!("{stem}.wav")).exists());
    }
    assert!(outcome.root.join(".complete").exists());

    // The dependency table copy is identical: checksums keep describing
    // the published originals, not the transcoded files.
    let cached = mediathek::DependencyTable::load(outcome.root.join("db.parquet")).unwrap();
    assert!(cached.equal(&published));

    // Tables are never flavored.
    assert_eq!(
        std::fs::read(outcome.root.join("db.age.parquet")).unwrap(),
        std::fs::read(build.path().join("db.age.parquet")).unwrap()
    );
}

#[tokio::test]
async fn test_flavor_without_collaborator_aggregates_failures() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();

    let mut request = LoadRequest::new(DB_NAME);
    request.flavor = flac_44k();
    let err = load(&env.config, request).await.unwrap_err();
    match &*err {
        ErrorKind::Flavor { failed } => {
            assert_eq!(failed.len(), 3);
        },
        other => panic!("expected a flavor error, got {other}"),
    }

    // The failed load must not mark the directory complete.
    let flavor = mediathek::Flavor::try_from(flac_44k()).unwrap();
    let root = env.config.layout().flavor_dir(DB_NAME, "1.0.0", &flavor.id());
    assert!(!root.join(".complete").exists());
}

#[tokio::test]
async fn test_flavor_id_is_deterministic_across_loads() {
    let env = env();
    let build = tempfile::tempdir().unwrap();
    build_s1(build.path());
    publish(&env.config, &env.repository, PublishRequest::new(build.path(), "1.0.0")).await.unwrap();

    let mut request = LoadRequest::new(DB_NAME);
    request.flavor = flac_44k();
    request.transform = Some(Arc::new(FakeTranscoder));
    let first = load(&env.config, request.clone()).await.unwrap();
    // The second load finds everything in place and does no work.
    let second = load(&env.config, request).await.unwrap();
    assert_eq!(first.root, second.root);
}

#[tokio::test]
async fn test_invalid_flavor_is_rejected() {
    let env = env();
    let mut request = LoadRequest::new(DB_NAME);
    request.flavor = FlavorSpec {
        sampling_rate: Some(12345),
        ..FlavorSpec::default()
    };
    let err = load(&env.config, request).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
}
