// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Blog API
//!
//! A CRUD API over users, blogs and blog entries. Every request runs
//! through one pipeline:
//!
//! - Caller identification (access key credentials or client address)
//! - Fixed-window throttling (50 requests per 60 seconds by default)
//! - Dispatch against an abstract resource store
//! - Page-number pagination for collections
//! - JSON or XML rendering, chosen by `?format=` or `Accept`

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod input;
pub mod limiter;
pub mod links;
pub mod media;
pub mod metrics;
pub mod models;
pub mod paginator;
pub mod pipeline;
pub mod render;
pub mod store;

pub use config::Config;
pub use error::{ApiError, StoreError};
pub use handlers::{router, AppState};
pub use limiter::{Decision, RateLimiter};
pub use pipeline::{Operation, Pipeline, RequestContext};
pub use store::{Repository, ResourceStore};
