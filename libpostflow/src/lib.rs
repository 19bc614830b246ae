//! Postflow - review-and-publish pipeline for generated social media content
//!
//! This library provides the post lifecycle state machine, the durable post
//! store, the review gate, the scheduler and the multi-platform dispatcher.
//! Binaries (`postflow-api`, `postflow-send`, `postflow-queue`) are thin
//! shells around [`service::PostflowService`].

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod lifecycle;
pub mod logging;
pub mod platforms;
pub mod review;
pub mod scheduler;
pub mod scheduling;
pub mod service;
pub mod settings;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Applied, Database};
pub use error::{PostflowError, Result};
pub use lifecycle::{DispatchOutcome, Transition};
pub use settings::{Credentials, Settings, SettingsStore};
pub use types::{PlatformResult, PlatformStatus, Post, PostState};
