//! HTTP engine module for the skopos audit framework

pub mod engine;
pub mod trainer;
pub use engine::{HttpEngine, HttpResponse, QueuedRequest, TRACKING_PARAM};
pub use trainer::Trainer;
