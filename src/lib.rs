//! Real-time personalization API gateway: recommend/related/rerank dispatch
//! over pluggable inference backends (spec.md §1, §2).

pub mod background;
pub mod cache_header;
pub mod config;
pub mod context;
pub mod decorator;
pub mod error;
pub mod events;
pub mod gateway_env;
pub mod metrics;
pub mod postprocess;
pub mod resolver;
pub mod router;
pub mod variation;

pub use error::{Error, Result};
pub use gateway_env::GatewayEnv;
pub use router::{build_router, AppState};
