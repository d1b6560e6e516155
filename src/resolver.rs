//! Hash-to-topic lookup.
//!
//! There is no global index. A document is found by checking every topic
//! partition for a manifest named after the hash, so the cost of a lookup is
//! linear in the number of topics.

use std::path::PathBuf;

use tracing::error;

use crate::error::{Error, Result};
use crate::store::{validate_hash, ArtifactKind, ArtifactStore};

/// Where a document currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub topic: String,
    pub manifest_path: PathBuf,
}

/// Maps a bare hash to the topic that owns it.
#[derive(Debug, Clone)]
pub struct DocumentResolver {
    store: ArtifactStore,
}

impl DocumentResolver {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// Locate a document, failing with `DocumentNotFound` if no topic holds it.
    pub async fn locate(&self, hash: &str) -> Result<Location> {
        self.find(hash)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(hash.to_string()))
    }

    /// Like [`locate`](Self::locate) but returns `None` when absent.
    ///
    /// Topics are scanned in name order and the first match wins. Finding the
    /// same hash in more than one topic breaks the dedup invariant; it is
    /// logged at error level and the first match is still returned.
    pub async fn find(&self, hash: &str) -> Result<Option<Location>> {
        validate_hash(hash)?;

        let mut found: Option<Location> = None;
        for topic in self.store.topic_names().await? {
            if !self.store.has_manifest(&topic, hash).await? {
                continue;
            }
            match found {
                None => {
                    let manifest_path =
                        self.store
                            .artifact_path(&topic, hash, ArtifactKind::Manifest)?;
                    found = Some(Location {
                        topic,
                        manifest_path,
                    });
                }
                Some(ref first) => {
                    error!(
                        hash = %hash,
                        first = %first.topic,
                        also = %topic,
                        "Document manifest found in more than one topic"
                    );
                }
            }
        }
        Ok(found)
    }
}
