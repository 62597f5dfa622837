// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed scratch stores for scope builders.
//!
//! A `Deserialize` impl accumulates field values into a builder of these
//! while the element's children stream by, then finalizes the builder into
//! the immutable value once the closing tag is reached. Nothing
//! half-constructed escapes on error; the builder is simply dropped.

use super::VisitorError;

/// Scratch store for a single-valued binding.
///
/// `set` stores unconditionally; whether a second candidate element is
/// allowed to reach `set` at all is decided by the dispatcher's
/// [`super::SlotConflictPolicy`], so under the default policy a slot is set
/// at most once per scope.
#[derive(Debug)]
pub struct Slot<T>(Option<T>);

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot(None)
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Slot(None)
    }

    pub fn set(&mut self, value: T) {
        self.0 = Some(value);
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Finalizes an optional binding.
    pub fn take(self) -> Option<T> {
        self.0
    }

    /// Finalizes a mandatory binding, failing if no element arrived.
    pub fn take_required(self, expected: &'static str) -> Result<T, VisitorError> {
        self.0.ok_or_else(|| VisitorError::missing_element(expected))
    }

    /// Finalizes a binding whose absence means the default value.
    ///
    /// Defaulting is the adapter's explicit choice; the engine never
    /// synthesizes values for slots nothing arrived at.
    pub fn take_or_default(self) -> T
    where
        T: Default,
    {
        self.0.unwrap_or_default()
    }
}

/// Order-preserving store for a collection binding.
///
/// Appends only; no deduplication, no reordering, no type filtering beyond
/// what tag resolution already did. An empty source yields an empty
/// sequence, never an absent one.
#[derive(Debug)]
pub struct Accumulator<T> {
    items: Vec<T>,
}

impl<T> Default for Accumulator<T> {
    fn default() -> Self {
        Accumulator { items: Vec::new() }
    }
}

impl<T> Accumulator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, value: T) {
        self.items.push(value);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Finalizes the sequence in document encounter order.
    pub fn finish(self) -> Vec<T> {
        self.items
    }
}
