//! Descriptor, manifest/index wire types, and the small set of OCI media
//! type strings the client needs to recognise.
//!
//! These are modeled directly with `serde` rather than through an external
//! image-spec crate's builders: the OCI 1.1 fields (`subject`, `artifactType`,
//! `data`) must be pinned exactly, and round-tripping unknown fields
//! forward-compatibly is easier to guarantee on a type this crate owns.
//! Media types are plain `&'static str` constants below rather than an enum.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod media_type {
    pub const IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST_V2: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const EMPTY: &str = "application/vnd.oci.empty.v1+json";
    pub const OCTET_STREAM: &str = "application/octet-stream";

    /// Default set from RepositoryOptions::manifest_media_types.
    pub fn default_manifest_media_types() -> Vec<String> {
        vec![
            IMAGE_MANIFEST.to_string(),
            IMAGE_INDEX.to_string(),
            DOCKER_MANIFEST_V2.to_string(),
            DOCKER_MANIFEST_LIST_V2.to_string(),
        ]
    }
}

/// The well-known empty-config descriptor (OCI image-spec empty object).
pub fn empty_descriptor() -> Descriptor {
    Descriptor {
        media_type: media_type::EMPTY.to_string(),
        digest: "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
            .to_string(),
        size: 2,
        artifact_type: None,
        annotations: None,
        data: Some("e30=".to_string()), // base64("{}")
        subject: None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
    /// Base64-encoded embedded content (used for the empty-config optimisation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Box<Descriptor>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Descriptor {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            artifact_type: None,
            annotations: None,
            data: None,
            subject: None,
        }
    }

    /// Two descriptors are basic-equal iff `mediaType`, `digest` and `size` match.
    pub fn basic_eq(&self, other: &Descriptor) -> bool {
        self.media_type == other.media_type
            && self.digest == other.digest
            && self.size == other.size
    }

    /// A descriptor is null-or-invalid if its digest is empty or not a
    /// syntactically valid `<algo>:<hex>` pair.
    pub fn is_null_or_invalid(&self) -> bool {
        self.digest.is_empty() || crate::digest::Digest::parse(&self.digest).is_err()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl ImageIndex {
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        ImageIndex {
            schema_version: 2,
            media_type: media_type::IMAGE_INDEX.to_string(),
            artifact_type: None,
            manifests,
            subject: None,
            annotations: None,
        }
    }
}

/// `{ "errors": [ { "code", "message", "detail" } ] }` — OCI distribution
/// spec error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", e.code, e.message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TagList {
    pub name: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepositoryList {
    pub repositories: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_eq_ignores_annotations_and_artifact_type() {
        let mut a = Descriptor::new("test", "sha256:aa", 1);
        let mut b = a.clone();
        a.artifact_type = Some("foo".into());
        b.annotations = Some(HashMap::from([("k".to_string(), "v".to_string())]));
        assert!(a.basic_eq(&b));
    }

    #[test]
    fn basic_eq_requires_digest_size_media_type() {
        let a = Descriptor::new("test", "sha256:aa", 1);
        let b = Descriptor::new("test", "sha256:aa", 2);
        assert!(!a.basic_eq(&b));
    }

    #[test]
    fn null_or_invalid_rejects_empty_digest() {
        let d = Descriptor::new("test", "", 0);
        assert!(d.is_null_or_invalid());
    }

    #[test]
    fn empty_descriptor_matches_oci_spec_constant() {
        let d = empty_descriptor();
        assert_eq!(
            d.digest,
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
        assert_eq!(d.size, 2);
    }
}
