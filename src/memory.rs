//! In-memory reference store implementing [`crate::copy::Target`].
//!
//! A test-only tool (spec.md §1): stands in for a real registry in the copy
//! engine's own unit tests, the way `ocipkg`'s ignored integration tests
//! stand in a real `localhost:5000` registry for manual verification. This
//! module carries no HTTP at all, so it's a plain `Mutex<HashMap>`.

use crate::copy::Target;
use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryTarget {
    blobs: Mutex<HashMap<String, (Descriptor, Bytes)>>,
    tags: Mutex<HashMap<String, String>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        MemoryTarget::default()
    }

    /// Preloads content as if it had already been pushed, for use as a copy
    /// source in tests.
    pub fn seed(&self, descriptor: Descriptor, body: Bytes) {
        self.blobs
            .lock()
            .unwrap()
            .insert(descriptor.digest.clone(), (descriptor, body));
    }
}

#[async_trait]
impl Target for MemoryTarget {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        self.blobs
            .lock()
            .unwrap()
            .get(&descriptor.digest)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| Error::NotFound(descriptor.digest.clone()))
    }

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        Ok(self.blobs.lock().unwrap().contains_key(&descriptor.digest))
    }

    async fn push(&self, descriptor: &Descriptor, body: Bytes) -> Result<()> {
        self.blobs
            .lock()
            .unwrap()
            .insert(descriptor.digest.clone(), (descriptor.clone(), body));
        Ok(())
    }

    async fn tag(&self, descriptor: &Descriptor, body: Bytes, tag: &str) -> Result<()> {
        self.push(descriptor, body).await?;
        self.tags
            .lock()
            .unwrap()
            .insert(tag.to_string(), descriptor.digest.clone());
        Ok(())
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let digest = {
            let tags = self.tags.lock().unwrap();
            tags.get(reference).cloned()
        }
        .unwrap_or_else(|| reference.to_string());
        let blobs = self.blobs.lock().unwrap();
        let (descriptor, _) = blobs
            .get(&digest)
            .ok_or_else(|| Error::NotFound(reference.to_string()))?;
        Ok(descriptor.clone())
    }
}
