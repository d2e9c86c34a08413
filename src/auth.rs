//! Auth contract (external collaborator).
//!
//! Full token exchange is out of scope for the core (spec.md §1's
//! Non-goals); this module re-exports the seam a real implementation would
//! plug into, grounded on the shape of `ocipkg::distribution::auth`
//! (`StoredAuth::get_token` parses `WWW-Authenticate`, then exchanges it for
//! a bearer token against the realm URL). That flow isn't reimplemented
//! here — only the decorator that would carry its result.

pub use crate::transport::BearerTransport;

/// The `WWW-Authenticate: Bearer realm="...",service="...",scope="..."`
/// parameters a real token-exchange client would extract before requesting
/// a token, mirroring the fields `ocipkg::distribution::auth::get_token`
/// pulls out of the header by regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parses a `WWW-Authenticate` header value of the `Bearer k="v",...`
    /// form. Returns `None` for any other scheme (e.g. `Basic`).
    pub fn parse(header_value: &str) -> Option<Self> {
        let rest = header_value.strip_prefix("Bearer ")?;
        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for part in split_params(rest) {
            let (key, value) = part.split_once('=')?;
            let value = value.trim_matches('"').to_string();
            match key.trim() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }
        Some(BearerChallenge {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// Splits `k="v,with,commas",k2="v2"` on top-level commas, i.e. commas that
/// are not inside a quoted value.
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = input[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}
