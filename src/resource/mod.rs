//! 资源模型
//!
//! 资源（bundle 修订版）、能力、需求、过滤器与连线。

pub mod attributes;
pub mod capability;
pub mod content;
pub mod filter;
pub mod namespace;
#[allow(clippy::module_inception)]
pub mod resource;
pub mod wiring;

pub use attributes::{parse_version, AttrValue, Attributes, Directives};
pub use capability::{Capability, Requirement, Resolution};
pub use content::{ActivatorFactory, BundleContent, MemoryContent};
pub use filter::{Filter, FilterNode, FilterOp};
pub use resource::{Resource, ResourceBuilder, ResourceId};
pub use wiring::{Wire, WireMap, Wiring};
