//! Resilient outbound HTTP for every remote lookup.
//!
//! This crate provides:
//! - [`RetryPolicy`]: attempts, exponential backoff, retryable statuses and methods
//! - [`QueryClient`]: a pooled `reqwest` client that applies the policy to each request
//!
//! One [`QueryClient`] is built per pipeline run and passed by reference to
//! every component that talks to a remote service.

pub mod client;
pub mod policy;

pub use client::QueryClient;
pub use policy::RetryPolicy;
