//! Approver resolution: per-policy routing tables and the supervisor walk.

pub mod policy;
pub mod resolver;

pub use policy::{
    FixedRoles, InvoiceRoute, OnboardingRoute, PolicyError, PolicyRegistry, ResolverStrategy,
    WalkPolicy,
};
pub use resolver::{ChainResolver, ResolvedApprover, StartingIdentity};
