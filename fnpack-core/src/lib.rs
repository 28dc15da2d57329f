pub mod closure;
pub mod compile;
pub mod config;
pub mod console;
pub mod dependency;
pub mod error;
pub mod externals;
pub mod extract;
pub mod manifest;
pub mod pack;
pub mod packager;
pub mod process;

pub use config::{PackConfig, PackagerKind, Platform};
pub use console::{ConsoleReporter, RecordingReporter, Reporter};
pub use dependency::{DependenciesResult, DependencyMap, DependencyNode};
pub use error::PackError;
pub use fnpack_archive::FileEntry;
pub use pack::{FunctionUnit, PackagedArtifact, Service, package_service};
pub use packager::{Packager, packager_for};
pub use process::{Executor, SystemExecutor};

pub type Result<T> = std::result::Result<T, PackError>;
