use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::SourceError;
use crate::provider::types::RawSnapshot;

/// Seam to the provider API: one call returns the full snapshot of one
/// region (reservations, listings, modification events).
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, region: &str) -> Result<RawSnapshot, SourceError>;
}

/// Reads `<dir>/<region>.json` files dropped by an external exporter.
#[derive(Clone, Debug)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SnapshotSource for JsonDirSource {
    #[instrument(skip(self), fields(dir = %self.dir.display()), level = "debug")]
    async fn fetch(&self, region: &str) -> Result<RawSnapshot, SourceError> {
        let path = self.dir.join(format!("{region}.json"));

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound {
                    region: region.to_string(),
                    path,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut snapshot: RawSnapshot = serde_json::from_slice(&bytes)?;
        if snapshot.region.is_empty() {
            snapshot.region = region.to_string();
        }

        debug!(
            reservations = snapshot.reserved_instances.len(),
            listings = snapshot.reserved_instances_listings.len(),
            modifications = snapshot.reserved_instances_modifications.len(),
            "snapshot loaded"
        );

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("auditor-src-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let src = JsonDirSource::new(scratch_dir());
        let err = src.fetch("eu-west-1").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn region_defaults_to_requested_one() {
        let dir = scratch_dir();
        std::fs::write(dir.join("eu-west-1.json"), r#"{"Region": ""}"#).unwrap();

        let snap = JsonDirSource::new(&dir).fetch("eu-west-1").await.unwrap();
        assert_eq!(snap.region, "eu-west-1");
        assert!(snap.reserved_instances.is_empty());
    }

    #[tokio::test]
    async fn garbage_is_a_decode_error() {
        let dir = scratch_dir();
        std::fs::write(dir.join("us-east-1.json"), b"not json").unwrap();

        let err = JsonDirSource::new(&dir).fetch("us-east-1").await.unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }
}
