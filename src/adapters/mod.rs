//! Store adapters for the arbor kernel.

pub mod sqlite;
