//! Domain layer types.

pub mod posts;
