//! HTTP gateway that enforces rate limits in front of the service routes.

mod classifier;
mod routes;
mod server;
mod service;

pub use classifier::{Caller, Classifier};
pub use routes::{route, ResponseBody};
pub use server::HttpServer;
pub use service::{DecisionError, RateLimitService, RATE_LIMITED_MESSAGE};
