//! Manual trading-position planner.
//!
//! Sizes the entry steps of a position from a risk budget, a stop-loss price
//! and a weighted setup, keeping filled entries frozen while the rest of the
//! plan is re-optimized.

pub mod db;
pub mod fixed;
pub mod models;
pub mod store;
pub mod trading;
