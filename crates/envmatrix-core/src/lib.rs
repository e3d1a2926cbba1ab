pub mod config;
pub mod error;
pub mod expand;
pub mod fingerprint;
pub mod interpreter;
pub mod materialize;
pub mod nspkg;
pub mod observability;
pub mod process;
pub mod runner;
pub mod spec;

pub use error::{Error, Result};
pub use runner::Session;
