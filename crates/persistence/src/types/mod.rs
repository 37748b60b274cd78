//! Core types for the persistence layer.
//!
//! - [`Document`] and identifier helpers
//! - [`Filter`], [`Projection`], [`Patch`] - Backend-neutral query shapes
//! - [`CollectionRef`], [`IndexSpec`] - Physical targets and their indexes
//! - [`ChangeEvent`], [`ChangeKind`] - Change feed payloads

mod change;
mod collection;
mod document;
mod query;

pub use change::{ChangeEvent, ChangeKind};
pub use collection::{CollectionRef, IndexKey, IndexKind, IndexSpec};
pub use document::{Document, document_id, ensure_id, generate_id, into_document};
pub use query::{Filter, Patch, Projection};
