//! rigbridge configuration layer.
//!
//! Every environment variable read goes through this module; the rest of the
//! workspace consumes typed config structs instead of calling `std::env::var`.
//!
//! - `loader`: env_or, env_optional, env_bool, env_u64 helpers and `.env` loading
//! - `schema`: PathsConfig, TimeoutConfig, PipelineConfig, ServeConfig, ObservabilityConfig
//! - `env_keys`: key constants (with aliases)

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_u64, load_dotenv, load_dotenv_from_dir};
pub use schema::{ObservabilityConfig, PathsConfig, PipelineConfig, ServeConfig, TimeoutConfig};
