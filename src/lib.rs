//! Client-side job lifecycle for the Bezz brand strategy service.
//!
//! Session management, the brief submission wizard, centralized status
//! polling with local progress estimation, and retry of failed briefs.

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod session;
pub mod state;
pub mod storage;
pub mod wizard;

pub use config::ClientConfig;
pub use error::{AppError, ErrorCategory, ErrorPresentation};
pub use state::AppContext;
