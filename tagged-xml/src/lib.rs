// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Descriptor-driven conversion between XML documents and typed object graphs.
//!
//! The engine is split along the same line as the metadata that drives it:
//!
//! *   [`schema`] holds the immutable binding tables: which attributes and
//!     child elements a type binds, through which wrapper elements they are
//!     reached, and which tag names map to which concrete types where several
//!     sibling types share one logical field.
//! *   [`de`] reads a document into values, routing each observed tag through
//!     the tables.
//! *   [`ser`] is the structural mirror, replaying the tables to produce a
//!     document that reads back to an equal graph.
//!
//! The per-type glue that constructs and walks concrete values (the
//! [`de::Deserialize`] and [`ser::Serialize`] impls) is supplied by the
//! caller; this crate never inspects concrete types except through those
//! seams and the tables.

pub mod de;
pub mod schema;
pub mod ser;

pub use de::{from_str, read};
pub use de::{ReadOptions, SlotConflictPolicy, UnknownElementPolicy};
pub use ser::{serialize, serialize_with_name};

pub use xml::common::TextPosition;

/// Shorthand for `Box<dyn std::error::Error + 'static>`.
pub type BoxedStdError = Box<dyn std::error::Error + 'static>;
