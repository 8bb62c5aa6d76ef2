//! HTTP plumbing shared by the catalog client and downloads.

mod client;
mod retry;

pub use client::{HttpClient, HttpError};
pub use retry::{RetryPolicy, is_retryable, with_retry};
