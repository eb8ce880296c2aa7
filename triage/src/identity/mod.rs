//! Identity resolution.
//!
//! Maps the noisy (name, address) aliases observed in source data onto
//! stable identities, deduplicating under concurrent writers, and keeps
//! per-alias engagement stats that drive ranking and statistical splitting.

mod resolver;

pub use resolver::{IdentityResolver, Observation, RankedIdentity};
