//! Shared test support: a builder for synthetic heaps and the fixtures built with it.

pub(crate) mod builders;
