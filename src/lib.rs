//! Kubernetes image resolver library
//!
//! Rewrites image tags in Kubernetes YAML to immutable digest references and
//! publishes locally built images as part of the same pass.
//!
//! Data flows from [`publish::Publisher`] (local images to digests) into a
//! [`cache::DigestCache`], which [`resolver::TagResolver`] consults before
//! asking the registry; [`walker`] applies the resolver to every string in
//! the template.

pub mod cache;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod image;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod stamp;
pub mod walker;

pub use cache::DigestCache;
pub use config::{AuthConfig, OverrideKey, ResolverConfig};
pub use error::{ResolverError, Result};
pub use logging::Logger;
pub use publish::{PublishResult, Publisher};
pub use reference::{Digest, Repository, Tag};
pub use registry::{HttpRegistry, InMemoryRegistry, Registry};
pub use resolver::{Resolved, TagResolver};
