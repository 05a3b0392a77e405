//! Buildkite REST API adapter.
//!
//! Implements the build-listing port against
//! `GET /v2/organizations/{org}/pipelines/{pipeline}/builds`.

pub mod client;
pub mod types;

pub use client::{ApiError, BuildkiteClient, BuildkiteConfig, next_page_from_link};
pub use types::{BuildkiteAgent, BuildkiteAuthor, BuildkiteBuild, BuildkiteJob};
