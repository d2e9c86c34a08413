//! Referrers API discovery: the three-state probe (Unknown → Supported |
//! NotSupported), paginated fetch, and tag-schema fallback (spec.md §4.6).
//!
//! The teacher has no referrers support at all (`ocipkg` predates OCI 1.1
//! referrers); this module is grounded instead on the pack's digest/size
//! verification idiom (`other_examples/.../peoci-src-ocidist.rs.rs`) for the
//! fetch path, with the state machine itself built directly from spec.md's
//! invariants I3/I4/I5 since no example repo in the pack implements
//! referrers either.

use crate::descriptor::{media_type, Descriptor, ImageIndex};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::manifest::{parse_image_index, ManifestStore};
use crate::transport::{error_for_status, Request, Transport};
use crate::uri::Endpoints;
use crate::verify::{filter_applied, link_target, read_bounded};
use reqwest::{Method, StatusCode};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

const UNKNOWN: u8 = 0;
const SUPPORTED: u8 = 1;
const NOT_SUPPORTED: u8 = 2;

/// Per-repository cell recording whether the registry supports the
/// Referrers API. Single-assignment: once set to `Supported` or
/// `NotSupported` it cannot change (I3), and a transition to the *other*
/// terminal value is a [`Error::StateAlreadySet`] bug in the caller.
pub struct ReferrersState {
    value: AtomicU8,
    probe_lock: Mutex<()>,
}

impl Default for ReferrersState {
    fn default() -> Self {
        ReferrersState {
            value: AtomicU8::new(UNKNOWN),
            probe_lock: Mutex::new(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    Unknown,
    Supported,
    NotSupported,
}

impl ReferrersState {
    pub fn get(&self) -> Support {
        match self.value.load(Ordering::Acquire) {
            SUPPORTED => Support::Supported,
            NOT_SUPPORTED => Support::NotSupported,
            _ => Support::Unknown,
        }
    }

    /// Transitions Unknown -> `to`. Setting the same terminal value twice is
    /// a no-op; setting the *other* terminal value is an error (I3).
    pub fn set(&self, to: Support) -> Result<()> {
        let new = match to {
            Support::Supported => SUPPORTED,
            Support::NotSupported => NOT_SUPPORTED,
            Support::Unknown => return Ok(()),
        };
        loop {
            let current = self.value.load(Ordering::Acquire);
            if current == new {
                return Ok(());
            }
            if current != UNKNOWN {
                return Err(Error::StateAlreadySet);
            }
            if self
                .value
                .compare_exchange(UNKNOWN, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }
}

/// Coordinates referrers discovery for one repository: probes support
/// lazily and serializes concurrent probes behind `probe_lock` so only one
/// request is in flight while the state is Unknown (spec.md's "a repeated
/// probe race collapses to a single request" property, P-ish but not
/// separately named — see P5 for the index write-back race this parallels).
pub struct ReferrersCoordinator {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    tenant_id: Option<String>,
    state: Arc<ReferrersState>,
    max_metadata_bytes: u64,
}

impl ReferrersCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        tenant_id: Option<String>,
        state: Arc<ReferrersState>,
        max_metadata_bytes: u64,
    ) -> Self {
        ReferrersCoordinator {
            transport,
            endpoints,
            tenant_id,
            state,
            max_metadata_bytes,
        }
    }

    fn request(&self, method: Method, url: url::Url) -> Request {
        let mut req = Request::new(method, url);
        if let Some(tenant) = &self.tenant_id {
            req = req.tenant(tenant.clone());
        }
        req
    }

    /// Ensures the support state is no longer Unknown, probing with a
    /// zero-digest GET if necessary (spec.md §4.6's ping probe). `200` with
    /// an image-index `Content-Type` means Supported; a `404` whose error
    /// body carries `NAME_UNKNOWN` means the repository itself doesn't
    /// exist and is propagated without touching the state; any other `404`
    /// (or a `200` with an unexpected content type) means NotSupported.
    async fn ensure_probed(&self) -> Result<()> {
        if self.state.get() != Support::Unknown {
            return Ok(());
        }
        let _guard = self.state.probe_lock.lock().unwrap();
        if self.state.get() != Support::Unknown {
            return Ok(());
        }
        let zero = Digest::zero_sha256();
        let url = self.endpoints.referrers(&zero.to_string(), None);
        let response = self.transport.send(self.request(Method::GET, url)).await?;
        match response.status() {
            StatusCode::OK => {
                let is_index = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    == Some(media_type::IMAGE_INDEX);
                if is_index {
                    log::debug!("registry at {} supports the referrers API", self.endpoints.repository());
                    self.state.set(Support::Supported)
                } else {
                    log::debug!(
                        "registry at {} answered the referrers probe with a non-index body, falling back to the tag schema",
                        self.endpoints.repository()
                    );
                    self.state.set(Support::NotSupported)
                }
            }
            StatusCode::NOT_FOUND => {
                let body = response.bytes().await.unwrap_or_default();
                if crate::error::body_has_name_unknown(&body) {
                    return Err(Error::NotFound(format!(
                        "repository {} not found",
                        self.endpoints.repository()
                    )));
                }
                log::debug!(
                    "registry at {} lacks the referrers API, falling back to the tag schema",
                    self.endpoints.repository()
                );
                self.state.set(Support::NotSupported)
            }
            status => Err(Error::registry_error_body(status, &[])),
        }
    }

    pub fn support(&self) -> Support {
        self.state.get()
    }

    /// Records evidence seen on a manifest push (spec.md §4.5 step 1): a
    /// response carrying `OCI-Subject` means the registry natively supports
    /// the Referrers API. Transitions Unknown -> Supported; a no-op if the
    /// state was already Supported, and a bug (surfaced via
    /// [`Error::StateAlreadySet`]) if it was already NotSupported, since that
    /// would mean the registry changed behaviour mid-session.
    pub fn note_oci_subject_header(&self) -> Result<()> {
        log::debug!(
            "registry at {} confirmed referrers support via OCI-Subject",
            self.endpoints.repository()
        );
        self.state.set(Support::Supported)
    }

    /// Fetches the full (possibly paginated) referrers list for `subject`,
    /// using the native Referrers API if supported, or falling back to the
    /// tag-schema index otherwise (spec.md §4.6/I4). `artifact_type` filters
    /// client-side when the server doesn't report it already applied the
    /// filter via `OCI-Filters-Applied`.
    pub async fn list(
        &self,
        manifests: &ManifestStore,
        subject: &Digest,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>> {
        self.ensure_probed().await?;
        let (mut referrers, server_applied_filter) = match self.support() {
            Support::Supported => self.list_via_api(subject, artifact_type).await?,
            Support::NotSupported => (self.list_via_tag_schema(manifests, subject).await?, false),
            Support::Unknown => unreachable!("ensure_probed leaves state resolved"),
        };
        if let Some(wanted) = artifact_type {
            if !server_applied_filter {
                referrers.retain(|d| d.artifact_type.as_deref() == Some(wanted));
            }
        }
        Ok(referrers)
    }

    /// Fetches every page from the native Referrers API, and whether the
    /// first page's `OCI-Filters-Applied` header reported the `artifactType`
    /// filter as already applied server-side (spec.md §4.6).
    async fn list_via_api(
        &self,
        subject: &Digest,
        artifact_type: Option<&str>,
    ) -> Result<(Vec<Descriptor>, bool)> {
        let mut url = self.endpoints.referrers(&subject.to_string(), artifact_type);
        let mut all = Vec::new();
        let mut server_applied_filter = false;
        let mut first_page = true;
        loop {
            let response = self.transport.send(self.request(Method::GET, url.clone())).await?;
            let response = error_for_status(response).await?;
            if first_page {
                server_applied_filter = filter_applied(&response, "artifactType");
                first_page = false;
            }
            let next = link_target(&response, "next");
            let body = read_bounded(response, self.max_metadata_bytes).await?;
            let index = parse_image_index(&body)?;
            let mut page = index.manifests;
            all.append(&mut page);
            match next {
                Some(target) => url = self.endpoints.resolve(&target)?,
                None => break,
            }
        }
        Ok((all, server_applied_filter))
    }

    /// Falls back to the `<algo>-<hex>` tag convention (I4): fetches the
    /// tag's manifest (an image index of referrer descriptors) if it exists,
    /// treating a 404 as "no referrers yet" rather than an error.
    async fn list_via_tag_schema(&self, manifests: &ManifestStore, subject: &Digest) -> Result<Vec<Descriptor>> {
        let tag = subject.as_referrers_tag();
        match manifests.fetch_by_reference(&tag, media_type::IMAGE_INDEX).await {
            Ok(fetched) => Ok(parse_image_index(&fetched.body)?.manifests),
            Err(Error::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// The tag-schema fallback name for `subject`, exposed for the index
    /// maintainer (C8) to read/write the same tag this module falls back to.
    pub fn tag_schema_name(subject: &Digest) -> String {
        subject.as_referrers_tag()
    }
}

pub fn empty_referrers_index() -> ImageIndex {
    ImageIndex::new(Vec::new())
}
