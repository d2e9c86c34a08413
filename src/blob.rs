//! Blob store: content-addressable fetch/push/mount over the `/v2/.../blobs`
//! endpoints (spec.md §4.4).
//!
//! Grounded on `ocipkg::distribution::client::Client::{get_blob,push_blob}`,
//! which already does the two-step "POST to init an upload session, PUT the
//! body to the returned Location" dance this module generalizes with mount
//! and redirect-capture support.

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::transport::{error_for_status, Request, Transport};
use crate::uri::Endpoints;
use crate::verify::{content_digest, location, verify_digest, verify_size};
use bytes::Bytes;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use url::Url;

pub struct BlobStore {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    tenant_id: Option<String>,
    plain_http: bool,
}

impl BlobStore {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        tenant_id: Option<String>,
        plain_http: bool,
    ) -> Self {
        BlobStore {
            transport,
            endpoints,
            tenant_id,
            plain_http,
        }
    }

    fn request(&self, method: Method, url: Url) -> Request {
        let mut req = Request::new(method, url);
        if let Some(tenant) = &self.tenant_id {
            req = req.tenant(tenant.clone());
        }
        req
    }

    /// `HEAD /v2/<name>/blobs/<digest>` — whether the blob exists.
    pub async fn exists(&self, digest: &Digest) -> Result<bool> {
        let url = self.endpoints.blob(&digest.to_string());
        let response = self
            .transport
            .send(self.request(Method::HEAD, url))
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::registry_error_body(status, &[])),
        }
    }

    /// `GET /v2/<name>/blobs/<digest>`, verifying digest and (if known) size.
    pub async fn fetch(&self, digest: &Digest) -> Result<Bytes> {
        let url = self.endpoints.blob(&digest.to_string());
        let response = self
            .transport
            .send(self.request(Method::GET, url))
            .await?;
        let response = error_for_status(response).await?;
        let body = response.bytes().await.map_err(Error::Transport)?;
        verify_digest(digest, &body)?;
        Ok(body)
    }

    /// Resolves the blob's upstream `Location` without downloading the body,
    /// for callers that want to hand the URL to an external fetcher. Sent
    /// through a non-redirect-following transport so the 3xx response itself
    /// is observable, matching spec.md §4.4's `locate()`.
    ///
    /// Returns `Ok(None)` on a plain `200` (no redirect occurred). Fails with
    /// `NotFound` on 404, `InvalidConfiguration` if the transport followed
    /// the redirect despite being asked not to, and `InvalidResponse` if the
    /// captured `Location` is relative or uses a disallowed scheme.
    pub async fn locate(&self, digest: &Digest) -> Result<Option<Url>> {
        let url = self.endpoints.blob(&digest.to_string());
        let response = self
            .transport
            .send(self.request(Method::GET, url.clone()).no_redirects())
            .await?;
        if response.url() != &url {
            return Err(Error::InvalidConfiguration(
                "transport followed a redirect while locate() requested auto-redirect disabled"
                    .to_string(),
            ));
        }
        match response.status() {
            StatusCode::OK => Ok(None),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("blob {digest} not found"))),
            status if status.is_redirection() => {
                let target = location(&response)?;
                let resolved = Url::parse(target).map_err(|_| {
                    Error::InvalidResponse(format!(
                        "redirect Location must be absolute, got {target}"
                    ))
                })?;
                if resolved.scheme() != "https" && !self.plain_http {
                    return Err(Error::InvalidResponse(format!(
                        "redirect Location must use https unless plainHttp is set, got {resolved}"
                    )));
                }
                log::debug!("captured redirect for {digest}: {resolved}");
                Ok(Some(resolved))
            }
            status => Err(Error::registry_error_body(status, &[])),
        }
    }

    /// Monolithic blob upload: `POST` to init, then `PUT` the body with
    /// `?digest=` to the returned session URL. `expected_size`, when given,
    /// is checked against the body up front (I2) before any request is sent.
    pub async fn push(&self, digest: &Digest, body: Bytes, expected_size: Option<u64>) -> Result<()> {
        if let Some(size) = expected_size {
            verify_size(size, &body)?;
        }
        let init_url = self.endpoints.blob_upload_init();
        let init_response = self
            .transport
            .send(self.request(Method::POST, init_url))
            .await?;
        let init_response = error_for_status(init_response).await?;
        if init_response.status() != StatusCode::ACCEPTED {
            return Err(Error::InvalidResponse(format!(
                "expected 202 Accepted from blob upload init, got {}",
                init_response.status()
            )));
        }
        let session_url = location(&init_response)?;
        let mut upload_url = self.endpoints.resolve(session_url)?;
        upload_url
            .query_pairs_mut()
            .append_pair("digest", &digest.to_string());

        let put_response = self
            .transport
            .send(
                self.request(Method::PUT, upload_url)
                    .header("Content-Type", "application/octet-stream")
                    .body(body),
            )
            .await?;
        let put_response = error_for_status(put_response).await?;
        if put_response.status() != StatusCode::CREATED {
            return Err(Error::InvalidResponse(format!(
                "expected 201 Created from blob upload, got {}",
                put_response.status()
            )));
        }
        let confirmed = content_digest(&put_response)?;
        if &confirmed != digest {
            return Err(Error::InvalidResponse(format!(
                "server confirmed digest {confirmed} does not match pushed digest {digest}"
            )));
        }
        Ok(())
    }

    /// Cross-repository mount: `POST .../blobs/uploads/?mount=<digest>&from=<repo>`.
    /// A `201 Created` means the mount succeeded; a `202 Accepted` means the
    /// registry declined to mount and started a fresh upload session instead,
    /// which the caller must fall back to pushing the body into (spec.md's
    /// Open Question on uniform-202 handling, resolved conservatively: treat
    /// any 202 as "mount not performed").
    pub async fn mount(&self, digest: &Digest, from_repository: &str) -> Result<MountOutcome> {
        let url = self.endpoints.blob_mount(&digest.to_string(), from_repository);
        let response = self
            .transport
            .send(self.request(Method::POST, url))
            .await?;
        let response = error_for_status(response).await?;
        match response.status() {
            StatusCode::CREATED => {
                log::debug!("mounted {digest} from {from_repository} into {}", self.endpoints.repository());
                Ok(MountOutcome::Mounted)
            }
            StatusCode::ACCEPTED => {
                log::debug!(
                    "registry declined to mount {digest} from {from_repository}, falling back to upload"
                );
                let session_url = location(&response)?;
                let upload_url = self.endpoints.resolve(session_url)?;
                Ok(MountOutcome::FellBackToUpload(upload_url))
            }
            status => Err(Error::InvalidResponse(format!(
                "unexpected status from blob mount: {status}"
            ))),
        }
    }

    /// `DELETE /v2/<name>/blobs/<digest>`.
    pub async fn delete(&self, digest: &Digest) -> Result<()> {
        let url = self.endpoints.blob(&digest.to_string());
        let response = self
            .transport
            .send(self.request(Method::DELETE, url))
            .await?;
        let response = error_for_status(response).await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(Error::InvalidResponse(format!(
                "expected 202 Accepted from blob delete, got {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum MountOutcome {
    Mounted,
    /// The registry started a regular upload session at this URL instead of
    /// mounting; the caller must `PUT` the blob body there to finish.
    FellBackToUpload(Url),
}
