//! The capabilities this server ships with
//!
//! Arithmetic, weather lookup and server status tools plus greeting and status resources.

pub mod expression;
pub mod resources;
pub mod tools;
pub mod utils;
