//! Configuration — schema, file loading, env var overrides.
//!
//! ```no_run
//! let cfg = rustle_core::config::load_config(None);
//! println!("model = {}", cfg.agents.defaults.model);
//! ```

pub mod loader;
pub mod schema;

pub use loader::{config_path, load_config, save_config};
pub use schema::Config;
