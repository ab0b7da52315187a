//! Utility functions and helpers

pub mod concurrency;

pub use concurrency::ConcurrencyLimiter;
