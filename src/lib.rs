//! Multi-stage HTTP security pipeline: protocol parsing, validation,
//! signature matching, rate/DoS shaping, behavioral classification,
//! cross-request correlation, and tamper-evident audit logging.

pub mod arbiter;
pub mod audit;
pub mod behavior;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod headers;
pub mod lifecycle;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod shaper;
pub mod signature;
pub mod validator;

pub use config::Config;
pub use context::Context;
pub use error::CoreError;
pub use pipeline::Pipeline;
pub use request::{Request, Verdict};
