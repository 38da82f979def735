//! 解析与连线
//!
//! 连线环境、约束求解、本地库选择、已解析产物跟踪，以及把它们串起来的解析器。

pub mod artifacts;
pub mod context;
pub mod environment;
pub mod native;
#[allow(clippy::module_inception)]
pub mod resolver;
pub mod solver;

pub use artifacts::{ArtifactState, ResolvedArtifacts};
pub use context::ResolveContext;
pub use environment::Environment;
pub use native::{NativeClause, NativeCode, NativeCodeResolver, NativeLibrary, NativeLibraryMetaData};
pub use resolver::{Resolver, ResolverComponents};
pub use solver::{ConstraintSolver, DefaultSolver};
