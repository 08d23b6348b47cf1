pub mod actors;
pub mod analysis;
pub mod config;
pub mod model;
pub mod probe;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod util;

pub use actors::{ActorSettings, ActorSystem};
pub use analysis::TrendEngine;
pub use service::HealthTrendService;
