//! Parsed registry references.
//!
//! Grounded on `ocipkg::name::Name` and `ocipkg::reference::Reference`: two
//! regex-validated newtypes wrapping `&str`. This crate needs a single
//! parsed reference carrying registry host, repository path and tag-or-digest
//! together (spec.md §4.8), so the two newtypes are folded into one type with
//! a manual `Deref`-free API rather than reused as-is; the validation regexes
//! themselves are unchanged from the teacher.

use crate::digest::Digest;
use crate::error::{Error, Result};

lazy_static::lazy_static! {
    static ref NAME_RE: regex::Regex =
        regex::Regex::new(r"^[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*(/[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*)*$")
            .unwrap();
    static ref TAG_RE: regex::Regex =
        regex::Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap();
}

/// Either a tag or a content digest, as the trailing component of a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentReference {
    Tag(String),
    Digest(Digest),
}

impl std::fmt::Display for ContentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentReference::Tag(t) => write!(f, "{t}"),
            ContentReference::Digest(d) => write!(f, "{d}"),
        }
    }
}

/// A fully parsed `[host[:port]/]repository[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    registry: String,
    repository: String,
    content: ContentReference,
}

impl Reference {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>, content: ContentReference) -> Result<Self> {
        let repository = repository.into();
        if !NAME_RE.is_match(&repository) {
            return Err(Error::InvalidReference(format!(
                "invalid repository name: {repository}"
            )));
        }
        Ok(Reference {
            registry: registry.into(),
            repository,
            content,
        })
    }

    /// Parses `[registry/]repository[:tag][@digest]`.
    ///
    /// A `@digest` suffix always wins over a preceding `:tag` (matching the
    /// common `name:tag@sha256:...` form used to pin a tag's resolved
    /// digest): the tag component is discarded and the digest used as the
    /// content reference.
    pub fn parse(input: &str) -> Result<Self> {
        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest_part)) => (rest, Some(Digest::parse(digest_part)?)),
            None => (input, None),
        };

        let (host_and_path, tag) = split_tag(rest)?;

        let (registry, repository) = split_host(host_and_path)?;

        let content = match digest {
            Some(d) => ContentReference::Digest(d),
            None => match tag {
                Some(t) => {
                    if !TAG_RE.is_match(&t) {
                        return Err(Error::InvalidReference(format!("invalid tag: {t}")));
                    }
                    ContentReference::Tag(t)
                }
                None => ContentReference::Tag("latest".to_string()),
            },
        };

        Reference::new(registry, repository, content)
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn content(&self) -> &ContentReference {
        &self.content
    }

    pub fn digest(&self) -> Option<&Digest> {
        match &self.content {
            ContentReference::Digest(d) => Some(d),
            ContentReference::Tag(_) => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.content {
            ContentReference::Tag(t) => Some(t),
            ContentReference::Digest(_) => None,
        }
    }

    pub fn with_content(&self, content: ContentReference) -> Self {
        Reference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            content,
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.registry.is_empty() {
            write!(f, "{}:{}", self.repository, self.content)
        } else {
            write!(f, "{}/{}:{}", self.registry, self.repository, self.content)
        }
    }
}

/// Splits a trailing `:tag` off a `repository[:tag]` string, taking care not
/// to confuse a registry port (`host:5000/name`) with a tag separator: only
/// the colon *after* the last `/` is considered.
fn split_tag(input: &str) -> Result<(&str, Option<String>)> {
    match input.rfind('/') {
        Some(slash) => {
            let (head, tail) = input.split_at(slash);
            match tail.rfind(':') {
                Some(colon) => Ok((&input[..slash + colon], Some(tail[colon + 1..].to_string()))),
                None => {
                    let _ = head;
                    Ok((input, None))
                }
            }
        }
        None => match input.rfind(':') {
            Some(colon) => Ok((&input[..colon], Some(input[colon + 1..].to_string()))),
            None => Ok((input, None)),
        },
    }
}

/// Splits a registry host (containing a `.` or `:` or being `localhost`)
/// from the repository path, per the `docker.io`-style heuristic used by
/// `ocipkg::image_name::ImageName::new`.
fn split_host(input: &str) -> Result<(String, String)> {
    if input.is_empty() {
        return Err(Error::InvalidReference("empty reference".to_string()));
    }
    match input.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            Ok((first.to_string(), rest.to_string()))
        }
        _ => Ok((String::new(), input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_repository_defaults_to_latest() {
        let r = Reference::parse("library/alpine").unwrap();
        assert_eq!(r.registry(), "");
        assert_eq!(r.repository(), "library/alpine");
        assert_eq!(r.tag(), Some("latest"));
    }

    #[test]
    fn parses_registry_repository_and_tag() {
        let r = Reference::parse("registry.example.com/foo/bar:v1").unwrap();
        assert_eq!(r.registry(), "registry.example.com");
        assert_eq!(r.repository(), "foo/bar");
        assert_eq!(r.tag(), Some("v1"));
    }

    #[test]
    fn parses_localhost_with_port_as_registry() {
        let r = Reference::parse("localhost:5000/foo:v1").unwrap();
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "foo");
        assert_eq!(r.tag(), Some("v1"));
    }

    #[test]
    fn digest_suffix_wins_over_tag() {
        let r = Reference::parse(
            "registry.example.com/foo/bar:v1@sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
        )
        .unwrap();
        assert!(r.digest().is_some());
        assert_eq!(r.tag(), None);
    }

    #[test]
    fn rejects_invalid_repository_name() {
        assert!(Reference::parse("Foo/Bar").is_err());
    }

    #[test]
    fn rejects_invalid_tag() {
        assert!(Reference::parse("foo:-bad").is_err());
    }
}
