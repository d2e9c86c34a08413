//! Client-side referrers index maintenance: the pull-apply-push-GC
//! algorithm that keeps the tag-schema fallback index in sync when a
//! registry lacks the native Referrers API (spec.md §4.7).
//!
//! No example repo in the retrieval pack implements this; it follows
//! directly from spec.md's algorithm description and invariant I5, built in
//! the same flat free-function-plus-thin-struct style as [`crate::blob`]
//! and [`crate::manifest`].

use crate::descriptor::{media_type, Descriptor, ImageIndex};
use crate::digest::Digest;
use crate::error::Result;
use crate::manifest::ManifestStore;
use crate::referrers::ReferrersCoordinator;
use serde_json::to_vec;

#[derive(Debug, Clone)]
pub enum Change {
    Add(Descriptor),
    Delete(Digest),
}

/// Applies `changes` to `current`, skipping null/invalid descriptors and
/// duplicate adds (I5: the same descriptor is never listed twice), and
/// removing every entry whose digest matches a `Delete`. Returns the new
/// list and whether it actually differs from `current` (an empty changeset,
/// or a changeset that only restates what's already there, requires no
/// write-back).
pub fn apply_changes(current: &[Descriptor], changes: &[Change]) -> (Vec<Descriptor>, bool) {
    let mut next: Vec<Descriptor> = Vec::with_capacity(current.len());
    let mut changed = false;
    for d in current {
        if d.is_null_or_invalid() {
            changed = true;
            continue;
        }
        if next.iter().any(|kept: &Descriptor| kept.basic_eq(d)) {
            changed = true;
            continue;
        }
        next.push(d.clone());
    }

    for change in changes {
        match change {
            Change::Add(descriptor) => {
                if descriptor.is_null_or_invalid() {
                    continue;
                }
                if next.iter().any(|d| d.basic_eq(descriptor)) {
                    continue;
                }
                next.push(descriptor.clone());
                changed = true;
            }
            Change::Delete(digest) => {
                let before = next.len();
                next.retain(|d| d.digest != digest.to_string());
                if next.len() != before {
                    changed = true;
                }
            }
        }
    }

    (next, changed)
}

/// Pulls the current tag-schema index for `subject` (or an empty one if
/// none exists yet), applies `changes`, and — if the result differs — pushes
/// the new index and garbage-collects the manifest the tag previously
/// pointed at, unless `skip_gc` is set (spec.md's `skipReferrersGc` option).
pub async fn write_back(
    manifests: &ManifestStore,
    referrers: &ReferrersCoordinator,
    subject: &Digest,
    changes: &[Change],
    skip_gc: bool,
) -> Result<Descriptor> {
    let tag = ReferrersCoordinator::tag_schema_name(subject);

    let (current, previous_descriptor) = match manifests
        .fetch_by_reference(&tag, media_type::IMAGE_INDEX)
        .await
    {
        Ok(fetched) => {
            let index: ImageIndex = serde_json::from_slice(&fetched.body)?;
            (index.manifests, Some(fetched.descriptor))
        }
        Err(crate::error::Error::NotFound(_)) => (Vec::new(), None),
        Err(e) => return Err(e),
    };

    let (new_list, update_required) = apply_changes(&current, changes);

    if !update_required {
        log::debug!("referrers index for {subject} already reflects {} change(s), skipping write-back", changes.len());
        return Ok(previous_descriptor.unwrap_or_else(|| {
            Descriptor::new(media_type::IMAGE_INDEX, subject.to_string(), 0)
        }));
    }

    // Per spec.md §4.7 step 3: a fresh index is only pushed when there's
    // something to push, or when GC is being skipped (in which case an empty
    // index is pushed rather than leaving the old one dangling). When the new
    // list is empty and GC is not skipped, step 4's delete below is what
    // clears the tag — pushing an empty index first would be redundant.
    let pushed = if !new_list.is_empty() || skip_gc {
        let new_index = ImageIndex::new(new_list);
        let body = to_vec(&new_index)?;
        let pushed = manifests.tag(&tag, media_type::IMAGE_INDEX, body.into()).await?;
        log::debug!("wrote back referrers index {tag} for subject {subject}");
        Some(pushed)
    } else {
        None
    };

    if !skip_gc {
        if let Some(previous) = previous_descriptor {
            if pushed.as_ref().map(|p| !previous.basic_eq(p)).unwrap_or(true) {
                let digest = Digest::parse(&previous.digest)?;
                // Best-effort: registries that don't support tag-schema
                // deletion (or that already GC'd the old index) reply with
                // NotFound, which is not a failure of the write-back.
                if let Err(e) = manifests.delete(&digest.to_string()).await {
                    if !matches!(e, crate::error::Error::NotFound(_)) {
                        return Err(e);
                    }
                    log::debug!("previous referrers index manifest {digest} already gone, skipping GC");
                } else {
                    log::debug!("garbage-collected previous referrers index manifest {digest}");
                }
            }
        }
    }

    Ok(pushed.or(previous_descriptor).unwrap_or_else(|| {
        Descriptor::new(media_type::IMAGE_INDEX, subject.to_string(), 0)
    }))
}
