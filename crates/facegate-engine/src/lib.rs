//! facegate-engine — Register/authenticate controller.
//!
//! Owns the face pipeline and the credential store. Per-user state is kept
//! in an explicit [`Session`] rather than in the engine itself.

pub mod config;
pub mod engine;
pub mod session;

pub use config::{Config, ConfigError};
pub use engine::{Engine, EngineError, Outcome};
pub use session::{Enrollment, Session, SessionState};
