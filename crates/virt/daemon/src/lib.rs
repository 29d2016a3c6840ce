//! Virt Admission Daemon library
//!
//! HTTP transport around the admission core:
//! - REST handler answering `AdmissionReview` requests
//! - In-memory store backing the admitters' lookups
//! - Configuration loading and server lifecycle

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::{ClusterSection, DaemonConfig, LoggingConfig, ServerConfig};
pub use error::{ApiError, ApiResult, DaemonError, DaemonResult};
pub use server::{build_state, Server};
