//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; two
/// instances with the same values are the same value. To "modify" one,
/// construct a new one. Consignment terms snapshots are the canonical example
/// here: once captured on a card they never change, even if the consignor's
/// defaults later do.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
