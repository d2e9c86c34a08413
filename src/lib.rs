//! Client library for the OCI distribution registry API: content-addressable
//! blob/manifest storage, referrers discovery and client-side index
//! maintenance, and a concurrent graph copy engine.
//!
//! The crate is organized the way `ocipkg::distribution` organizes its own
//! registry client, split one concern per module rather than one large
//! `Client` type: [`digest`]/[`reference`]/[`descriptor`] model content
//! addresses and wire types, [`uri`] builds endpoints, [`transport`] sends
//! requests, [`verify`] checks responses, [`blob`]/[`manifest`] are the two
//! content stores, [`referrers`]/[`referrers_index`] implement the OCI 1.1
//! referrers API and its client-side fallback, [`repository`] is the
//! facade tying a registry+repository pair together, and [`copy`] is the
//! concurrent graph copy engine that runs against any [`copy::Target`].

pub mod auth;
pub mod blob;
pub mod copy;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod memory;
pub mod reference;
pub mod referrers;
pub mod referrers_index;
pub mod repository;
pub mod transport;
pub mod uri;
pub mod verify;

pub use copy::{copy, copy_graph, copy_to_reference, Target};
pub use descriptor::Descriptor;
pub use digest::Digest;
pub use error::{Error, Result};
pub use reference::{ContentReference, Reference};
pub use referrers::{ReferrersState, Support};
pub use repository::{Repository, RepositoryOptions};
