//! Value object trait: equality by value, not identity.

/// Marker trait for immutable values compared by their attributes
/// (batches, cost components). To "change" one, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
