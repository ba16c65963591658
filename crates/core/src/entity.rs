//! Entity trait: identity that survives state changes.

/// Entity marker + minimal interface.
///
/// Payment records and ledger transactions are entities: two records with the
/// same id are the same record even when their status or metadata differ.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
