//! Database Backend Abstractions
//!
//! The executor and version store only talk to [`DatabasePool`] and
//! [`DatabaseTransaction`]; each engine lives in its own module behind them.

pub mod core;
pub mod postgres;

pub use core::*;
pub use postgres::PostgresPool;
