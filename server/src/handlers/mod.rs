//! Request handlers for table operations.

mod rows;

pub use rows::*;
