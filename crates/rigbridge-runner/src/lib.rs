//! Host interpreter plumbing: locate and smoke-test the host, synthesize
//! bootstrap scripts, merge child environments and run stages under a time
//! budget with cancellation.

pub mod bootstrap;
pub mod common;
pub mod device;
pub mod diagnosis;
pub mod env;
pub mod log;
pub mod runner;
pub mod runtime_resolver;

pub use bootstrap::{BootstrapError, BootstrapScript};
pub use common::{CancelToken, StageResult, Termination};
pub use device::Device;
pub use diagnosis::{diagnose, Diagnosis, DiagnosisKind};
pub use runner::{StageError, SubprocessRunner};
pub use runtime_resolver::{resolve, EnvironmentError, InterpreterEnvironment, ResolverConfig};
