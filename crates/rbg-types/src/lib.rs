//! RBG Types - Core object model for role-based group orchestration
//!
//! This crate defines the fundamental types used throughout the RBG controller:
//! - Role groups and their roles (the user-declared desired state)
//! - Workload objects materialized per role (ordinal, stateless, leader/worker)
//! - Scaling adapters bridging external autoscalers to one role
//! - Role group sets fanning out N identical groups
//! - Conditions, identity labels and recorded events

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod adapter;
pub mod condition;
pub mod events;
pub mod group;
pub mod intstr;
pub mod labels;
pub mod meta;
pub mod pod;
pub mod profile;
pub mod resource;
pub mod service;
pub mod set;
pub mod workload;

// Re-exports for convenience
pub use adapter::*;
pub use condition::*;
pub use events::*;
pub use group::*;
pub use intstr::*;
pub use meta::*;
pub use pod::*;
pub use profile::*;
pub use resource::*;
pub use service::*;
pub use set::*;
pub use workload::*;
