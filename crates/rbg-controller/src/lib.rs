//! RBG Controller - Convergence loops for role-based groups
//!
//! The controller drives every declared [`RoleGroup`](rbg_types::RoleGroup)
//! toward a running state:
//! - [`dependency`] orders roles and detects cycles
//! - [`workload`] materializes each role into its workload kind, suppresses
//!   no-op writes through [`equality`], and stages rollouts via [`rollout`]
//! - [`group::GroupReconciler`] gates roles on dependency readiness and
//!   aggregates status
//! - [`adapter::ScalingAdapterReconciler`] binds external scalers to one role
//! - [`restart::RestartCoordinator`] recreates a group in order after a pod failure
//! - [`set::GroupSetReplicator`] fans out groups from a template
//! - [`manager::ControllerManager`] runs all of the above with bounded concurrency
//!
//! # Example
//!
//! ```rust,no_run
//! use rbg_controller::{ControllerConfig, ControllerManager};
//! use rbg_store::{BroadcastRecorder, Client};
//! use std::sync::Arc;
//!
//! # async fn example() -> rbg_controller::Result<()> {
//! let manager = ControllerManager::new(
//!     Client::in_memory(),
//!     Arc::new(BroadcastRecorder::default()),
//!     ControllerConfig::default(),
//! );
//! manager.run().await
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod adapter;
pub mod config;
pub mod context;
pub mod dependency;
pub mod discovery;
pub mod equality;
pub mod error;
pub mod gc;
pub mod group;
pub mod manager;
pub mod restart;
pub mod retry;
pub mod rollout;
pub mod runtime;
pub mod set;
pub mod sidecar;
pub mod template;
pub mod workload;

pub use config::{ControllerConfig, RetryConfig};
pub use context::ControllerContext;
pub use error::{ErrorClass, ReconcileError, Result, ValidationError};
pub use manager::ControllerManager;
pub use runtime::{Action, Controller, Reconciler};
