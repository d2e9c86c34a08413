//! Registry endpoint URL construction.
//!
//! Grounded on `ocipkg::distribution::client::Client`, which builds each
//! endpoint inline from `self.url` and `self.name` ad hoc per method. Here
//! that's pulled into one place since the copy engine, blob store and
//! manifest store all need the same base-URL-plus-repository pairing.

use crate::error::{Error, Result};
use url::Url;

/// Holds the scheme+host root (`http(s)://registry[:port]`) and repository
/// path used to build every `/v2/...` endpoint for one repository.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
    repository: String,
}

impl Endpoints {
    pub fn new(registry: &str, repository: &str, plain_http: bool) -> Result<Self> {
        let scheme = if plain_http || registry.starts_with("localhost") {
            "http"
        } else {
            "https"
        };
        let base = Url::parse(&format!("{scheme}://{registry}"))?;
        Ok(Endpoints {
            base,
            repository: repository.to_string(),
        })
    }

    pub fn base_check(&self) -> Url {
        self.join("/v2/")
    }

    pub fn catalog(&self) -> Url {
        self.join("/v2/_catalog")
    }

    pub fn tags_list(&self) -> Url {
        self.join(&format!("/v2/{}/tags/list", self.repository))
    }

    pub fn manifest(&self, reference: &str) -> Url {
        self.join(&format!("/v2/{}/manifests/{reference}", self.repository))
    }

    pub fn blob(&self, digest: &str) -> Url {
        self.join(&format!("/v2/{}/blobs/{digest}", self.repository))
    }

    pub fn blob_upload_init(&self) -> Url {
        self.join(&format!("/v2/{}/blobs/uploads/", self.repository))
    }

    pub fn blob_mount(&self, digest: &str, from_repository: &str) -> Url {
        let mut u = self.blob_upload_init();
        u.query_pairs_mut()
            .append_pair("mount", digest)
            .append_pair("from", from_repository);
        u
    }

    pub fn referrers(&self, digest: &str, artifact_type: Option<&str>) -> Url {
        let mut u = self.join(&format!("/v2/{}/referrers/{digest}", self.repository));
        if let Some(t) = artifact_type {
            u.query_pairs_mut().append_pair("artifactType", t);
        }
        u
    }

    /// Resolves a `Link` header's URL-reference against the request URI it
    /// came from, for tag/catalog pagination (spec.md §4.9).
    pub fn resolve(&self, relative_or_absolute: &str) -> Result<Url> {
        self.base
            .join(relative_or_absolute)
            .map_err(|e| Error::InvalidResponse(format!("malformed Link target: {e}")))
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    fn join(&self, path: &str) -> Url {
        self.base.join(path).expect("path templates are well-formed")
    }
}
