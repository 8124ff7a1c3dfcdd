//! AutoDJ Core - Automatic two-deck mixing engine

pub mod analysis;
pub mod autodj;
pub mod automation;
pub mod clock;
pub mod config;
pub mod deck;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod music;
pub mod queue;
pub mod selector;
pub mod sim;
pub mod types;

pub use autodj::{AutoDj, AutoDjEvent, SessionPhase, TickOutcome};
pub use error::{AutoDjError, Result};
pub use types::*;
