//! Canonical repository key naming.
//!
//! Keys are version-free logical addresses; a backend resolves a
//! `(key, version)` pair to its physical location by inserting the version
//! directly before the final path segment ([`versioned`]). The resulting
//! layout inside a repository, shown for version 1.0.0 of a database named
//! `emodb`:
//!
//! ```text
//! emodb/1.0.0/db.yaml                   <-- header (visibility commit)
//! emodb/1.0.0/db.parquet                <-- dependency table
//! emodb/meta/1.0.0/<table_id>.zip       <-- table archives
//! emodb/media/1.0.0/<fingerprint>.zip   <-- media archives
//! emodb/attachment/1.0.0/<id>.zip       <-- attachment archives
//! ```
//!
//! A version is *published* once both `db.yaml` and `db.parquet` exist
//! under `<name>/<version>/`; publishers upload those two last.

/// File name of the database header.
pub const HEADER_FILE: &str = "db.yaml";
/// File name of the dependency table.
pub const DEPENDENCIES_FILE: &str = "db.parquet";
/// Legacy dependency table archive (contains `db.csv`).
pub const LEGACY_DEPENDENCIES_FILE: &str = "db.zip";

/// Key of the database header.
pub fn header(name: &str) -> String {
    format!("{name}/{HEADER_FILE}")
}

/// Key of the dependency table.
pub fn dependencies(name: &str) -> String {
    format!("{name}/{DEPENDENCIES_FILE}")
}

/// Key of the legacy (CSV-in-ZIP) dependency table.
pub fn legacy_dependencies(name: &str) -> String {
    format!("{name}/{LEGACY_DEPENDENCIES_FILE}")
}

/// Key of a table archive.
pub fn table(name: &str, table_id: &str) -> String {
    format!("{name}/meta/{table_id}.zip")
}

/// Key of a media archive.
pub fn media(name: &str, fingerprint: &str) -> String {
    format!("{name}/media/{fingerprint}.zip")
}

/// Key of an attachment archive.
pub fn attachment(name: &str, attachment_id: &str) -> String {
    format!("{name}/attachment/{attachment_id}.zip")
}

/// Resolve a logical key and a version to the physical repository path.
///
/// The version is inserted before the last path segment so that all
/// artifacts of one version group together while archives of different
/// versions of the same category share a parent directory.
pub fn versioned(key: &str, version: &str) -> String {
    match key.rsplit_once('/') {
        Some((parent, file)) => format!("{parent}/{version}/{file}"),
        None => format!("{version}/{key}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_dependencies() {
        assert_eq!(versioned(&header("emodb"), "1.0.0"), "emodb/1.0.0/db.yaml");
        assert_eq!(versioned(&dependencies("emodb"), "1.0.0"), "emodb/1.0.0/db.parquet");
    }

    #[test]
    fn test_archive_keys() {
        assert_eq!(versioned(&table("emodb", "age"), "1.0.0"), "emodb/meta/1.0.0/age.zip");
        assert_eq!(
            versioned(&media("emodb", "c1f5cc6f-6d00-348a-ba3b-4adaa2436aad"), "1.1.0"),
            "emodb/media/1.1.0/c1f5cc6f-6d00-348a-ba3b-4adaa2436aad.zip"
        );
        assert_eq!(versioned(&attachment("emodb", "bibtex"), "2.0.0"), "emodb/attachment/2.0.0/bibtex.zip");
    }

    #[test]
    fn test_versioned_bare_key() {
        assert_eq!(versioned("db.yaml", "1.0.0"), "1.0.0/db.yaml");
    }
}
