//! API request and response models.

pub mod estimates;
pub mod jobs;
pub mod slice;
