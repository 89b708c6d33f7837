//! Application services layer: storage seam, content providers and errors.

pub mod error;
pub mod providers;
pub mod repos;
