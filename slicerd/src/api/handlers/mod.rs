//! HTTP request handlers.

pub mod estimates;
pub mod health;
pub mod jobs;
pub mod slice;
