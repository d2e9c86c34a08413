//! Response verification: digest/size/content-type checks, size-limited
//! metadata reads, and `Link` header pagination parsing.
//!
//! Grounded on `other_examples/.../peoci-src-ocidist.rs.rs`'s `digest_eq` and
//! `www_authenticate`-style header-parsing helpers, generalized to the
//! `Docker-Content-Digest`/`Content-Length`/`Link` headers this crate's
//! fetch paths need to check (spec.md §4.3/I1).

use crate::digest::Digest;
use crate::error::{Error, Result};
use bytes::Bytes;
use reqwest::Response;

pub const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";
pub const LINK: &str = "link";
pub const LOCATION: &str = "location";
pub const OCI_FILTERS_APPLIED: &str = "oci-filters-applied";
pub const OCI_SUBJECT: &str = "oci-subject";

/// Reads the full body, enforcing `max_bytes` (spec.md §4.6's
/// `maxMetadataBytes`) via `Content-Length` up front and the actual byte
/// count as a fallback if the header was absent or understated.
pub async fn read_bounded(response: Response, max_bytes: u64) -> Result<Bytes> {
    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(Error::InvalidResponse(format!(
                "metadata body of {len} bytes exceeds limit of {max_bytes}"
            )));
        }
    }
    let body = response.bytes().await.map_err(Error::Transport)?;
    if body.len() as u64 > max_bytes {
        return Err(Error::InvalidResponse(format!(
            "metadata body of {} bytes exceeds limit of {max_bytes}",
            body.len()
        )));
    }
    Ok(body)
}

/// Verifies a fetched byte stream's digest matches `expected` (I1).
pub fn verify_digest(expected: &Digest, body: &[u8]) -> Result<()> {
    let actual = Digest::sha256_of(body);
    if &actual != expected {
        return Err(Error::InvalidResponse(format!(
            "digest mismatch: expected {expected}, computed {actual}"
        )));
    }
    Ok(())
}

/// Verifies the advertised size matches the actual body length.
pub fn verify_size(expected: u64, body: &[u8]) -> Result<()> {
    if body.len() as u64 != expected {
        return Err(Error::InvalidResponse(format!(
            "size mismatch: expected {expected}, got {}",
            body.len()
        )));
    }
    Ok(())
}

/// Verifies a manifest fetch's `Content-Type` matches the requested media
/// type exactly (registries MUST NOT substitute a compatible type silently).
pub fn verify_content_type(response: &Response, expected: &str) -> Result<()> {
    let actual = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if actual != expected {
        return Err(Error::InvalidResponse(format!(
            "unexpected content-type: expected {expected}, got {actual}"
        )));
    }
    Ok(())
}

/// Extracts and parses the `Docker-Content-Digest` response header.
pub fn content_digest(response: &Response) -> Result<Digest> {
    let raw = response
        .headers()
        .get(DOCKER_CONTENT_DIGEST)
        .ok_or_else(|| Error::InvalidResponse("missing Docker-Content-Digest header".to_string()))?
        .to_str()
        .map_err(|e| Error::InvalidResponse(format!("non-ASCII Docker-Content-Digest: {e}")))?;
    Digest::parse(raw)
}

/// Whether the response carries an `OCI-Subject` header: a server-side
/// signal that the registry natively supports the Referrers API (spec.md
/// §4.5 step 1 / §6).
pub fn has_oci_subject(response: &Response) -> bool {
    response.headers().contains_key(OCI_SUBJECT)
}

/// Extracts the `Location` header from a redirect/upload response.
pub fn location(response: &Response) -> Result<&str> {
    response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| Error::InvalidResponse("missing Location header".to_string()))?
        .to_str()
        .map_err(|e| Error::InvalidResponse(format!("non-ASCII Location header: {e}")))
}

/// One relation's target extracted from a `Link` header, e.g. `rel="next"`.
pub fn link_target(response: &Response, rel: &str) -> Option<String> {
    let raw = response.headers().get(LINK)?.to_str().ok()?;
    parse_link_header(raw, rel)
}

/// Parses a `Link: <url>; rel="next"` header value, returning the URL for
/// the given `rel` if present. Registries may send multiple comma-separated
/// link-values; each is `<target>` followed by `;`-separated parameters.
fn parse_link_header(raw: &str, rel: &str) -> Option<String> {
    for link_value in raw.split(',') {
        let link_value = link_value.trim();
        let (target, params) = link_value.split_once(';')?;
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        for param in params.split(';') {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("rel=") {
                let value = value.trim_matches('"');
                if value == rel {
                    return Some(target.to_string());
                }
            }
        }
    }
    None
}

/// Whether the registry reports it already applied the named filter
/// server-side (spec.md §4.6): `OCI-Filters-Applied` carries a
/// comma-separated list of filter names (e.g. `artifactType`); if `filter`
/// is not a member, the client must apply it itself.
pub fn filter_applied(response: &Response, filter: &str) -> bool {
    response
        .headers()
        .get(OCI_FILTERS_APPLIED)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|f| f.trim() == filter))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_digest_detects_mismatch() {
        let expected = Digest::sha256_of(b"hello");
        assert!(verify_digest(&expected, b"goodbye").is_err());
        assert!(verify_digest(&expected, b"hello").is_ok());
    }

    #[test]
    fn verify_size_detects_mismatch() {
        assert!(verify_size(5, b"hello").is_ok());
        assert!(verify_size(4, b"hello").is_err());
    }

    #[test]
    fn parses_link_header_next_rel() {
        let raw = r#"<https://registry.example.com/v2/foo/tags/list?last=bar>; rel="next""#;
        assert_eq!(
            parse_link_header(raw, "next"),
            Some("https://registry.example.com/v2/foo/tags/list?last=bar".to_string())
        );
        assert_eq!(parse_link_header(raw, "prev"), None);
    }

    #[test]
    fn parses_link_header_with_multiple_values() {
        let raw = r#"<https://example.com/a>; rel="prev", <https://example.com/b>; rel="next""#;
        assert_eq!(
            parse_link_header(raw, "next"),
            Some("https://example.com/b".to_string())
        );
    }
}
