//! Content-addressed attachment storage
//!
//! Proof-of-delivery documents are uploaded once and referenced from the
//! ledger only by their SHA-256 digest.
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{AttachmentError, Result};
use crate::types::AttachmentDigest;

pub trait AttachmentStore: Send + Sync {
    /// Store `bytes` and return their digest. Uploading the same bytes twice
    /// yields the same digest and stores them once.
    fn upload(&self, bytes: &[u8]) -> Result<AttachmentDigest>;

    fn contains(&self, digest: &AttachmentDigest) -> Result<bool>;

    /// Fetch the bytes stored under `digest`, checking they still hash to it.
    fn fetch(&self, digest: &AttachmentDigest) -> Result<Vec<u8>>;
}

pub struct SledAttachmentStore {
    tree: sled::Tree,
}

impl SledAttachmentStore {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            tree: instance.open_tree("attachments")?,
        })
    }
}

impl AttachmentStore for SledAttachmentStore {
    fn upload(&self, bytes: &[u8]) -> Result<AttachmentDigest> {
        let digest = AttachmentDigest::of(bytes);
        let previous = self
            .tree
            .compare_and_swap(digest.as_bytes(), None as Option<&[u8]>, Some(bytes))?;

        match previous {
            Ok(()) => info!(digest = %digest, size = bytes.len(), "Stored attachment"),
            Err(_) => debug!(digest = %digest, "Attachment already exists"),
        }
        Ok(digest)
    }

    fn contains(&self, digest: &AttachmentDigest) -> Result<bool> {
        Ok(self.tree.contains_key(digest.as_bytes())?)
    }

    fn fetch(&self, digest: &AttachmentDigest) -> Result<Vec<u8>> {
        let bytes = self
            .tree
            .get(digest.as_bytes())?
            .ok_or(AttachmentError::Missing(*digest))?;

        let actual = AttachmentDigest::of(&bytes);
        if actual != *digest {
            return Err(AttachmentError::DigestMismatch {
                expected: *digest,
                actual,
            }
            .into());
        }
        Ok(bytes.to_vec())
    }
}
