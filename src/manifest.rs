//! Manifest store: fetch/push/tag/delete over the `/v2/.../manifests`
//! endpoints (spec.md §4.5).
//!
//! Grounded on `ocipkg::distribution::client::Client::{get_manifest,push_manifest}`
//! and `distribution::mod::{get_image,push_image}`, which already drive the
//! Accept-header and Docker-Content-Digest-confirmation dance this module
//! generalizes to also cover tagging, deletion and the subject-aware callers
//! in `repository.rs` (C9) need for referrers-index maintenance.

use crate::descriptor::{media_type, Descriptor, ImageIndex, ImageManifest};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::transport::{error_for_status, Request, Transport};
use crate::uri::Endpoints;
use crate::verify::{content_digest, has_oci_subject, read_bounded, verify_content_type, verify_digest};
use bytes::Bytes;
use reqwest::{Method, StatusCode};
use std::sync::Arc;

/// A manifest body as raw bytes plus its parsed, returned-content-type.
pub struct FetchedManifest {
    pub descriptor: Descriptor,
    pub media_type: String,
    pub body: Bytes,
}

pub struct ManifestStore {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    tenant_id: Option<String>,
    accept_media_types: Vec<String>,
    max_metadata_bytes: u64,
}

impl ManifestStore {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        tenant_id: Option<String>,
        accept_media_types: Vec<String>,
        max_metadata_bytes: u64,
    ) -> Self {
        ManifestStore {
            transport,
            endpoints,
            tenant_id,
            accept_media_types,
            max_metadata_bytes,
        }
    }

    fn request(&self, method: Method, reference: &str) -> Request {
        let url = self.endpoints.manifest(reference);
        let mut req = Request::new(method, url);
        if let Some(tenant) = &self.tenant_id {
            req = req.tenant(tenant.clone());
        }
        req
    }

    fn accept_header(&self) -> String {
        self.accept_media_types.join(", ")
    }

    /// `HEAD /v2/<name>/manifests/<reference>`.
    pub async fn exists(&self, reference: &str) -> Result<bool> {
        let response = self
            .transport
            .send(
                self.request(Method::HEAD, reference)
                    .header("Accept", self.accept_header()),
            )
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::registry_error_body(status, &[])),
        }
    }

    /// `GET /v2/<name>/manifests/<reference>`, verifying the
    /// `Docker-Content-Digest` and returned `Content-Type`.
    pub async fn fetch(&self, reference: &str) -> Result<FetchedManifest> {
        let response = self
            .transport
            .send(
                self.request(Method::GET, reference)
                    .header("Accept", self.accept_header()),
            )
            .await?;
        let response = error_for_status(response).await?;
        let digest = content_digest(&response)?;
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = read_bounded(response, self.max_metadata_bytes).await?;
        verify_digest(&digest, &body)?;
        Ok(FetchedManifest {
            descriptor: Descriptor::new(media_type.clone(), digest.to_string(), body.len() as u64),
            media_type,
            body,
        })
    }

    /// Like [`fetch`](Self::fetch) but additionally asserts the returned
    /// `Content-Type` matches `expected_media_type` exactly, for callers
    /// that already know which manifest type they asked for by digest.
    pub async fn fetch_by_reference(&self, reference: &str, expected_media_type: &str) -> Result<FetchedManifest> {
        let response = self
            .transport
            .send(
                self.request(Method::GET, reference)
                    .header("Accept", expected_media_type.to_string()),
            )
            .await?;
        let response = error_for_status(response).await?;
        verify_content_type(&response, expected_media_type)?;
        let digest = content_digest(&response)?;
        let body = read_bounded(response, self.max_metadata_bytes).await?;
        verify_digest(&digest, &body)?;
        Ok(FetchedManifest {
            descriptor: Descriptor::new(expected_media_type, digest.to_string(), body.len() as u64),
            media_type: expected_media_type.to_string(),
            body,
        })
    }

    /// Resolves a reference to its descriptor without downloading the body.
    pub async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let response = self
            .transport
            .send(
                self.request(Method::HEAD, reference)
                    .header("Accept", self.accept_header()),
            )
            .await?;
        let response = error_for_status(response).await?;
        let digest = content_digest(&response)?;
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(media_type::IMAGE_MANIFEST)
            .to_string();
        let size = response.content_length().unwrap_or_default();
        Ok(Descriptor::new(media_type, digest.to_string(), size))
    }

    /// `PUT /v2/<name>/manifests/<reference>`, confirming the digest the
    /// server echoes back matches the one computed from `body`. The second
    /// element of the result is whether the response carried an
    /// `OCI-Subject` header — evidence the registry natively supports the
    /// Referrers API (spec.md §4.5 step 1).
    pub async fn push(&self, reference: &str, media_type: &str, body: Bytes) -> Result<(Descriptor, bool)> {
        let expected = Digest::sha256_of(&body);
        let response = self
            .transport
            .send(
                self.request(Method::PUT, reference)
                    .header("Content-Type", media_type.to_string())
                    .body(body.clone()),
            )
            .await?;
        let response = error_for_status(response).await?;
        if response.status() != StatusCode::CREATED {
            return Err(Error::InvalidResponse(format!(
                "expected 201 Created from manifest push, got {}",
                response.status()
            )));
        }
        let oci_subject = has_oci_subject(&response);
        let confirmed = content_digest(&response)?;
        if confirmed != expected {
            return Err(Error::InvalidResponse(format!(
                "server confirmed digest {confirmed} does not match pushed digest {expected}"
            )));
        }
        Ok((Descriptor::new(media_type, expected.to_string(), body.len() as u64), oci_subject))
    }

    /// Convenience: push a tag pointing at `descriptor`'s parsed manifest,
    /// used by the referrers-index maintainer (C8) to write back the index.
    pub async fn tag(&self, tag: &str, media_type: &str, body: Bytes) -> Result<Descriptor> {
        let (descriptor, _oci_subject) = self.push(tag, media_type, body).await?;
        Ok(descriptor)
    }

    /// `DELETE /v2/<name>/manifests/<reference>`.
    pub async fn delete(&self, reference: &str) -> Result<()> {
        let response = self
            .transport
            .send(self.request(Method::DELETE, reference))
            .await?;
        let response = error_for_status(response).await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(Error::InvalidResponse(format!(
                "expected 202 Accepted from manifest delete, got {}",
                response.status()
            )));
        }
        Ok(())
    }
}

pub fn parse_image_manifest(body: &[u8]) -> Result<ImageManifest> {
    serde_json::from_slice(body).map_err(Error::Json)
}

pub fn parse_image_index(body: &[u8]) -> Result<ImageIndex> {
    serde_json::from_slice(body).map_err(Error::Json)
}
