//! Herbarium - iNaturalist record cache and project-membership reconciler.
//!
//! Fetches every observation carrying a named observation field, streams it
//! to a local JSON cache, and keeps a project's membership in line with a
//! substring rule on that field.
//!
//! # Example
//!
//! ```ignore
//! use herbarium::{ClientOptions, InatClient, ReconcileOptions, Reconciler, load_or_fetch};
//!
//! let client = InatClient::new(ClientOptions::default())?;
//! let records = load_or_fetch(&client, "Herbarium Catalog Number", 200, path, None).await?;
//!
//! let mut reconciler = Reconciler::new(&client, &records, ReconcileOptions::default());
//! let report = reconciler.run(|plan| println!("{} to add", plan.to_add.len())).await?;
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod fetch;
pub mod http;
pub mod pagination;
pub mod progress;
pub mod rate_limit;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod search;

pub use cache::{CacheWriter, DEFAULT_CACHE_FILE, RecordSink, load_cache};
pub use client::{ClientOptions, InatClient, TOKEN_ENV_VAR};
pub use error::{ApiError, CacheError, FetchError, ReconcileError, short_error_message};
pub use fetch::{fetch_to_cache, load_or_fetch};
pub use http::{HttpTransport, ReqwestTransport};
pub use pagination::{DEFAULT_PAGE_SIZE, ListQuery, Paginator};
pub use progress::{ProgressCallback, SyncProgress};
pub use rate_limit::{ApiRateLimiter, rate_limits};
pub use reconcile::{
    MembershipPlan, MembershipRule, ProjectApi, ProjectMembership, ReconcileOptions,
    ReconcileReport, Reconciler, RecordOutcome,
};
pub use record::{FieldValue, Observation};
pub use retry::RetryConfig;
pub use search::{SearchHit, find_matching};
