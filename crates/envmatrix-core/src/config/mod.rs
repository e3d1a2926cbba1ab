//! Spec file loading and cache settings.

mod loader;
mod schema;
mod settings;

pub use loader::load_spec_file;
pub use schema::{Scalar, SpecFile, VenvSchema};
pub use settings::Settings;
