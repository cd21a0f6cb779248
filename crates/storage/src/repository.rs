//! Repository configuration values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport kind of a repository.
///
/// The set is open-ended: kinds are matched by their string form against
/// the [`BackendRegistry`](crate::BackendRegistry), so deployments can
/// register additional kinds without touching this crate. `Artifactory` is
/// recognized for configuration compatibility but ships without a
/// registered factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    FileSystem,
    S3,
    Minio,
    Artifactory,
    /// A kind this build does not know about; kept verbatim so read paths
    /// can skip it and write paths can name it in errors.
    #[serde(untagged)]
    Other(String),
}

impl BackendKind {
    /// Canonical string form, as used in configuration files.
    pub fn as_str(&self) -> &str {
        match self {
            Self::FileSystem => "file-system",
            Self::S3 => "s3",
            Self::Minio => "minio",
            Self::Artifactory => "artifactory",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for BackendKind {
    fn from(value: &str) -> Self {
        match value {
            "file-system" => Self::FileSystem,
            "s3" => Self::S3,
            "minio" => Self::Minio,
            "artifactory" => Self::Artifactory,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A repository address: name, host, and transport kind.
///
/// For `file-system` repositories the host is a directory; for S3-style
/// repositories it is the service endpoint and the repository name is the
/// bucket.
///
/// # Examples
///
/// ```
/// use mediathek_storage::{BackendKind, Repository};
///
/// let repo = Repository::new("data-local", "/data", BackendKind::FileSystem);
/// assert_eq!(repo.to_string(), "Repository('data-local', '/data', 'file-system')");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    /// Repository name.
    pub name: String,
    /// Repository host.
    pub host: String,
    /// Repository backend kind.
    pub backend: BackendKind,
}

impl Repository {
    pub fn new(name: impl Into<String>, host: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            backend,
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Repository('{}', '{}', '{}')", self.name, self.host, self.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_string_roundtrip() {
        for kind in [BackendKind::FileSystem, BackendKind::S3, BackendKind::Minio, BackendKind::Artifactory] {
            assert_eq!(BackendKind::from(kind.as_str()), kind);
        }
        assert_eq!(BackendKind::from("gcs"), BackendKind::Other("gcs".to_string()));
    }

    #[test]
    fn test_equality_is_structural() {
        let a = Repository::new("r", "/data", BackendKind::FileSystem);
        let b = Repository::new("r", "/data", BackendKind::FileSystem);
        let c = Repository::new("r", "/elsewhere", BackendKind::FileSystem);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
