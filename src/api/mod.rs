//! Bezz REST API client.

pub mod account;
pub mod auth;
pub mod briefs;
pub mod client;

pub use account::{CheckoutSession, ProfileUpdate};
pub use auth::{AuthOps, AuthResponse};
pub use briefs::{BriefOps, DEFAULT_LIST_LIMIT};
pub use client::{sanitize_url_for_logs, ApiClient, Auth, Envelope, LoggingMode, SharedToken};
