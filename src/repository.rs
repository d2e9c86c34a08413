//! Repository facade: one `RepositoryOptions`-configured handle combining
//! the blob store, manifest store and referrers coordinator, dispatching by
//! media-type classification (spec.md §4.8/I6).
//!
//! Grounded on `ocipkg::distribution::client::Client`, which is itself one
//! struct wrapping `{reqwest::Client, ureq::Agent, url, name}` and exposing
//! both blob and manifest operations; `RepositoryOptions` follows the
//! `config.rs` convention of a plain builder-style record rather than a
//! generic configuration framework.

use crate::blob::{BlobStore, MountOutcome};
use crate::copy::Target;
use crate::descriptor::{media_type, Descriptor};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::manifest::ManifestStore;
use crate::referrers::{ReferrersCoordinator, ReferrersState, Support};
use crate::referrers_index::{self, Change};
use crate::transport::{error_for_status, Request, Transport};
use crate::uri::Endpoints;
use crate::verify::link_target;
use bytes::Bytes;
use reqwest::Method;
use std::sync::Arc;

pub const DEFAULT_MAX_METADATA_BYTES: u64 = 4 * 1024 * 1024;
pub const DEFAULT_TAG_LIST_PAGE_SIZE: u32 = 100;

/// Configuration for one [`Repository`] handle, in the spirit of
/// `ocipkg::config`'s plain single-purpose config helpers: a `Default` plus
/// builder-style setters, no generic config framework.
#[derive(Clone)]
pub struct RepositoryOptions {
    pub registry: String,
    pub repository: String,
    pub transport: Arc<dyn Transport>,
    pub plain_http: bool,
    pub manifest_media_types: Vec<String>,
    pub tag_list_page_size: u32,
    pub skip_referrers_gc: bool,
    pub max_metadata_bytes: u64,
    pub tenant_id: Option<String>,
}

impl RepositoryOptions {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        RepositoryOptions {
            registry: registry.into(),
            repository: repository.into(),
            transport,
            plain_http: false,
            manifest_media_types: media_type::default_manifest_media_types(),
            tag_list_page_size: DEFAULT_TAG_LIST_PAGE_SIZE,
            skip_referrers_gc: false,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
            tenant_id: None,
        }
    }

    pub fn plain_http(mut self, value: bool) -> Self {
        self.plain_http = value;
        self
    }

    pub fn manifest_media_types(mut self, types: Vec<String>) -> Self {
        self.manifest_media_types = types;
        self
    }

    pub fn tag_list_page_size(mut self, size: u32) -> Self {
        self.tag_list_page_size = size;
        self
    }

    pub fn skip_referrers_gc(mut self, value: bool) -> Self {
        self.skip_referrers_gc = value;
        self
    }

    pub fn max_metadata_bytes(mut self, value: u64) -> Self {
        self.max_metadata_bytes = value;
        self
    }

    pub fn tenant_id(mut self, value: impl Into<String>) -> Self {
        self.tenant_id = Some(value.into());
        self
    }
}

pub struct Repository {
    options: RepositoryOptions,
    endpoints: Endpoints,
    blobs: BlobStore,
    manifests: ManifestStore,
    referrers: ReferrersCoordinator,
}

impl Repository {
    pub fn new(options: RepositoryOptions) -> Result<Self> {
        let endpoints = Endpoints::new(&options.registry, &options.repository, options.plain_http)?;
        let blobs = BlobStore::new(
            options.transport.clone(),
            endpoints.clone(),
            options.tenant_id.clone(),
            options.plain_http,
        );
        let manifests = ManifestStore::new(
            options.transport.clone(),
            endpoints.clone(),
            options.tenant_id.clone(),
            options.manifest_media_types.clone(),
            options.max_metadata_bytes,
        );
        let referrers = ReferrersCoordinator::new(
            options.transport.clone(),
            endpoints.clone(),
            options.tenant_id.clone(),
            Arc::new(ReferrersState::default()),
            options.max_metadata_bytes,
        );
        Ok(Repository {
            options,
            endpoints,
            blobs,
            manifests,
            referrers,
        })
    }

    fn is_manifest_media_type(&self, candidate: &str) -> bool {
        self.options
            .manifest_media_types
            .iter()
            .any(|m| m == candidate)
            || candidate == media_type::IMAGE_INDEX
            || candidate == media_type::IMAGE_MANIFEST
    }

    /// Fetches by digest, dispatching to the manifest or blob store
    /// depending on the descriptor's declared media type (I6).
    pub async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        if self.is_manifest_media_type(&descriptor.media_type) {
            let fetched = self
                .manifests
                .fetch_by_reference(&descriptor.digest, &descriptor.media_type)
                .await?;
            Ok(fetched.body)
        } else {
            let digest = Digest::parse(&descriptor.digest)?;
            self.blobs.fetch(&digest).await
        }
    }

    pub async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        if self.is_manifest_media_type(&descriptor.media_type) {
            self.manifests.exists(&descriptor.digest).await
        } else {
            let digest = Digest::parse(&descriptor.digest)?;
            self.blobs.exists(&digest).await
        }
    }

    /// Pushes content addressed by its own digest. For manifests carrying a
    /// `subject`, this also applies the resulting referrer to the
    /// subject's client-side referrers index (spec.md §4.7).
    pub async fn push(&self, descriptor: &Descriptor, body: Bytes) -> Result<()> {
        if self.is_manifest_media_type(&descriptor.media_type) {
            let (pushed, oci_subject) = self
                .manifests
                .push(&descriptor.digest, &descriptor.media_type, body.clone())
                .await?;
            if oci_subject {
                self.referrers.note_oci_subject_header()?;
            }

            if let Some(subject) = parse_subject(&descriptor.media_type, &body)? {
                if self.referrers.support() != Support::Supported {
                    let subject_digest = Digest::parse(&subject.digest)?;
                    self.apply_referrers_change(&subject_digest, Change::Add(pushed)).await?;
                }
            }
            Ok(())
        } else {
            let digest = Digest::parse(&descriptor.digest)?;
            self.blobs.push(&digest, body, Some(descriptor.size)).await
        }
    }

    pub async fn delete(&self, descriptor: &Descriptor) -> Result<()> {
        if self.is_manifest_media_type(&descriptor.media_type) {
            if self.referrers.support() != Support::Supported {
                if let Ok(body) = self.fetch(descriptor).await {
                    if let Some(subject) = parse_subject(&descriptor.media_type, &body)? {
                        if self.referrers.support() != Support::Supported {
                            let subject_digest = Digest::parse(&subject.digest)?;
                            let digest = Digest::parse(&descriptor.digest)?;
                            self.apply_referrers_change(&subject_digest, Change::Delete(digest)).await?;
                        }
                    }
                }
            }
            self.manifests.delete(&descriptor.digest).await
        } else {
            let digest = Digest::parse(&descriptor.digest)?;
            self.blobs.delete(&digest).await
        }
    }

    async fn apply_referrers_change(&self, subject: &Digest, change: Change) -> Result<()> {
        if self.referrers.support() == Support::Unknown {
            // make sure we know whether the native API exists before deciding
            // whether a client-side index is even meaningful
            let _ = self.referrers.list(&self.manifests, subject, None).await;
        }
        if self.referrers.support() == Support::NotSupported {
            referrers_index::write_back(
                &self.manifests,
                &self.referrers,
                subject,
                std::slice::from_ref(&change),
                self.options.skip_referrers_gc,
            )
            .await?;
        }
        Ok(())
    }

    /// Always resolves against the manifests endpoint (tags only ever name
    /// manifests, spec.md §4.8).
    pub async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        self.manifests.resolve(reference).await
    }

    pub async fn tag(&self, descriptor: &Descriptor, body: Bytes, tag: &str) -> Result<()> {
        self.manifests.tag(tag, &descriptor.media_type, body).await?;
        Ok(())
    }

    pub async fn fetch_by_reference(&self, reference: &str, expected_media_type: &str) -> Result<Bytes> {
        Ok(self
            .manifests
            .fetch_by_reference(reference, expected_media_type)
            .await?
            .body)
    }

    pub async fn referrers(&self, subject: &Digest, artifact_type: Option<&str>) -> Result<Vec<Descriptor>> {
        self.referrers.list(&self.manifests, subject, artifact_type).await
    }

    /// Captures the blob's upstream redirect location without downloading
    /// the body (spec.md §4.4's `locate()`); `None` if the registry served
    /// the blob directly rather than redirecting.
    pub async fn locate(&self, descriptor: &Descriptor) -> Result<Option<url::Url>> {
        let digest = Digest::parse(&descriptor.digest)?;
        self.blobs.locate(&digest).await
    }

    fn request(&self, method: Method, url: url::Url) -> Request {
        let mut req = Request::new(method, url);
        if let Some(tenant) = &self.options.tenant_id {
            req = req.tenant(tenant.clone());
        }
        req
    }

    /// Fetches one page of the tag list, returning the tags plus the next
    /// page's URL if the registry reports one via `Link: rel="next"`
    /// (spec.md §4.9's lazy Link-paginated sequence).
    pub async fn list_tags_page(&self, continuation: Option<&url::Url>) -> Result<(Vec<String>, Option<url::Url>)> {
        let url = match continuation {
            Some(u) => u.clone(),
            None => {
                let mut u = self.endpoints.tags_list();
                u.query_pairs_mut()
                    .append_pair("n", &self.options.tag_list_page_size.to_string());
                u
            }
        };
        let response = self
            .options
            .transport
            .send(self.request(Method::GET, url))
            .await?;
        let response = error_for_status(response).await?;
        let next = link_target(&response, "next")
            .map(|t| self.endpoints.resolve(&t))
            .transpose()?;
        let body = crate::verify::read_bounded(response, self.options.max_metadata_bytes).await?;
        let list: crate::descriptor::TagList = serde_json::from_slice(&body)?;
        Ok((list.tags, next))
    }

    /// Drains [`list_tags_page`](Self::list_tags_page) across every page.
    pub async fn list_all_tags(&self) -> Result<Vec<String>> {
        let mut all = Vec::new();
        let mut continuation = None;
        loop {
            let (mut page, next) = self.list_tags_page(continuation.as_ref()).await?;
            all.append(&mut page);
            match next {
                Some(url) => continuation = Some(url),
                None => break,
            }
        }
        Ok(all)
    }

    /// Fetches one page of the registry's catalog, returning the repository
    /// names plus the next page's URL if the registry reports one via
    /// `Link: rel="next"` (spec.md §4.9's lazy Link-paginated sequence). The
    /// catalog is registry-wide, not scoped to this repository's name.
    pub async fn list_catalog_page(&self, continuation: Option<&url::Url>) -> Result<(Vec<String>, Option<url::Url>)> {
        let url = match continuation {
            Some(u) => u.clone(),
            None => {
                let mut u = self.endpoints.catalog();
                if self.options.tag_list_page_size > 0 {
                    u.query_pairs_mut()
                        .append_pair("n", &self.options.tag_list_page_size.to_string());
                }
                u
            }
        };
        let response = self
            .options
            .transport
            .send(self.request(Method::GET, url))
            .await?;
        let response = error_for_status(response).await?;
        let next = link_target(&response, "next")
            .map(|t| self.endpoints.resolve(&t))
            .transpose()?;
        let body = crate::verify::read_bounded(response, self.options.max_metadata_bytes).await?;
        let list: crate::descriptor::RepositoryList = serde_json::from_slice(&body)?;
        Ok((list.repositories, next))
    }

    /// Drains [`list_catalog_page`](Self::list_catalog_page) across every page.
    pub async fn list_all_repositories(&self) -> Result<Vec<String>> {
        let mut all = Vec::new();
        let mut continuation = None;
        loop {
            let (mut page, next) = self.list_catalog_page(continuation.as_ref()).await?;
            all.append(&mut page);
            match next {
                Some(url) => continuation = Some(url),
                None => break,
            }
        }
        Ok(all)
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }
}

#[async_trait::async_trait]
impl Target for Repository {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        Repository::fetch(self, descriptor).await
    }

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        Repository::exists(self, descriptor).await
    }

    async fn push(&self, descriptor: &Descriptor, body: Bytes) -> Result<()> {
        Repository::push(self, descriptor, body).await
    }

    async fn tag(&self, descriptor: &Descriptor, body: Bytes, tag: &str) -> Result<()> {
        Repository::tag(self, descriptor, body, tag).await
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        Repository::resolve(self, reference).await
    }

    async fn fetch_by_reference(&self, reference: &str, expected_media_type: &str) -> Result<Bytes> {
        Repository::fetch_by_reference(self, reference, expected_media_type).await
    }

    async fn mount(&self, descriptor: &Descriptor, from_repository: &str) -> Result<bool> {
        let digest = Digest::parse(&descriptor.digest)?;
        match self.blobs.mount(&digest, from_repository).await? {
            MountOutcome::Mounted => Ok(true),
            MountOutcome::FellBackToUpload(_) => Ok(false),
        }
    }

    fn repository_name(&self) -> Option<&str> {
        Some(&self.options.repository)
    }

    fn registry_name(&self) -> Option<&str> {
        Some(&self.options.registry)
    }
}

/// Extracts the `subject` descriptor from a manifest/index body, if present,
/// without fully parsing the rest of the document (only index/manifest
/// media types carry a `subject`).
fn parse_subject(media_type: &str, body: &[u8]) -> Result<Option<Descriptor>> {
    #[derive(serde::Deserialize)]
    struct SubjectOnly {
        subject: Option<Descriptor>,
    }
    if media_type != crate::descriptor::media_type::IMAGE_MANIFEST
        && media_type != crate::descriptor::media_type::IMAGE_INDEX
    {
        return Ok(None);
    }
    let parsed: SubjectOnly = serde_json::from_slice(body).map_err(Error::Json)?;
    Ok(parsed.subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpTransport;

    fn repository(server: &mockito::ServerGuard) -> Repository {
        let options = RepositoryOptions::new(
            server.url().trim_start_matches("http://"),
            "foo/bar",
            Arc::new(HttpTransport::new().unwrap()),
        )
        .plain_http(true);
        Repository::new(options).unwrap()
    }

    #[tokio::test]
    async fn resolve_reads_digest_and_media_type_from_head() {
        let digest = Digest::sha256_of(b"{}");
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("HEAD", "/v2/foo/bar/manifests/v1")
            .with_status(200)
            .with_header("Content-Type", media_type::IMAGE_MANIFEST)
            .with_header("Docker-Content-Digest", &digest.to_string())
            .with_header("Content-Length", "2")
            .create_async()
            .await;
        let repo = repository(&server);
        let d = repo.resolve("v1").await.unwrap();
        assert_eq!(d.media_type, media_type::IMAGE_MANIFEST);
    }

    #[tokio::test]
    async fn list_all_tags_follows_link_pagination() {
        let mut server = mockito::Server::new_async().await;
        let _first = server
            .mock("GET", mockito::Matcher::Regex(r"^/v2/foo/bar/tags/list\?n=100$".to_string()))
            .with_status(200)
            .with_header(
                "Link",
                r#"</v2/foo/bar/tags/list?n=100&last=b>; rel="next""#,
            )
            .with_body(r#"{"name":"foo/bar","tags":["a","b"]}"#)
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/v2/foo/bar/tags/list?n=100&last=b")
            .with_status(200)
            .with_body(r#"{"name":"foo/bar","tags":["c"]}"#)
            .create_async()
            .await;
        let repo = repository(&server);
        let tags = repo.list_all_tags().await.unwrap();
        assert_eq!(tags, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn list_all_repositories_follows_link_pagination() {
        let mut server = mockito::Server::new_async().await;
        let _first = server
            .mock("GET", mockito::Matcher::Regex(r"^/v2/_catalog\?n=100$".to_string()))
            .with_status(200)
            .with_header(
                "Link",
                r#"</v2/_catalog?n=100&last=foo>; rel="next""#,
            )
            .with_body(r#"{"repositories":["bar","foo"]}"#)
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/v2/_catalog?n=100&last=foo")
            .with_status(200)
            .with_body(r#"{"repositories":["quux"]}"#)
            .create_async()
            .await;
        let repo = repository(&server);
        let repos = repo.list_all_repositories().await.unwrap();
        assert_eq!(repos, vec!["bar", "foo", "quux"]);
    }

    /// spec.md §8 scenario 2: pushing a manifest with a `subject` against a
    /// registry that lacks the Referrers API must create the tag-schema
    /// index on the *first* referrer, even though the tag doesn't exist yet
    /// and the server reports that with a plain `404` (not `NAME_UNKNOWN`).
    #[tokio::test]
    async fn push_creates_referrers_index_on_first_referrer_against_tag_404() {
        use crate::descriptor::{ImageIndex, ImageManifest};

        let subject_digest = format!("sha256:{}", "a".repeat(64));
        let subject = Descriptor::new(media_type::IMAGE_MANIFEST, subject_digest.clone(), 123);
        let tag = crate::referrers::ReferrersCoordinator::tag_schema_name(
            &Digest::parse(&subject_digest).unwrap(),
        );

        let manifest = ImageManifest {
            schema_version: 2,
            media_type: media_type::IMAGE_MANIFEST.to_string(),
            artifact_type: None,
            config: crate::descriptor::empty_descriptor(),
            layers: vec![],
            subject: Some(subject),
            annotations: None,
        };
        let manifest_body = Bytes::from(serde_json::to_vec(&manifest).unwrap());
        let manifest_digest = Digest::sha256_of(&manifest_body);
        let manifest_descriptor = Descriptor::new(
            media_type::IMAGE_MANIFEST,
            manifest_digest.to_string(),
            manifest_body.len() as u64,
        );

        let pushed_referrer = Descriptor::new(
            media_type::IMAGE_MANIFEST,
            manifest_digest.to_string(),
            manifest_body.len() as u64,
        );
        let new_index = ImageIndex::new(vec![pushed_referrer]);
        let new_index_body = serde_json::to_vec(&new_index).unwrap();
        let new_index_digest = Digest::sha256_of(&new_index_body);

        let mut server = mockito::Server::new_async().await;

        let _put_manifest = server
            .mock(
                "PUT",
                format!("/v2/foo/bar/manifests/{manifest_digest}").as_str(),
            )
            .with_status(201)
            .with_header("Docker-Content-Digest", &manifest_digest.to_string())
            .create_async()
            .await;

        // Zero-digest ping probe: a generic 404 (no NAME_UNKNOWN) sets NotSupported.
        let _probe = server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/v2/foo/bar/referrers/sha256:0+$".to_string()),
            )
            .with_status(404)
            .with_body(r#"{"errors":[{"code":"UNSUPPORTED","message":"nope"}]}"#)
            .create_async()
            .await;

        // The tag-schema index doesn't exist yet: a plain 404, not NAME_UNKNOWN.
        let _get_tag = server
            .mock("GET", format!("/v2/foo/bar/manifests/{tag}").as_str())
            .with_status(404)
            .with_body(r#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"not found"}]}"#)
            .create_async()
            .await;

        let _put_tag = server
            .mock("PUT", format!("/v2/foo/bar/manifests/{tag}").as_str())
            .with_status(201)
            .with_header("Docker-Content-Digest", &new_index_digest.to_string())
            .create_async()
            .await;

        let repo = repository(&server);
        repo.push(&manifest_descriptor, manifest_body).await.unwrap();

        _put_tag.assert_async().await;
    }
}
