//! RBG Store - Collaborators the controller talks to
//!
//! - [`ObjectStore`]: get/list/create/update/patch/delete with per-object
//!   optimistic concurrency and watch notifications
//! - [`EventRecorder`]: best-effort, non-blocking event sink
//! - [`SchemaProbe`]: startup-time check that required object schemas exist
//!
//! Each comes with an in-memory implementation used by the daemon and tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use rbg_store::Client;
//! use rbg_types::{ObjectKey, RoleGroup, RoleSpec};
//!
//! # async fn example() -> rbg_store::StoreResult<()> {
//! let client = Client::in_memory();
//! let group = RoleGroup::new("default", "demo", vec![RoleSpec::new("web", 2)]);
//! let created = client.groups.create(group).await?;
//! assert_eq!(created.metadata.generation, 1);
//! let fetched = client.groups.get(&ObjectKey::new("default", "demo")).await?;
//! assert!(fetched.is_some());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod client;
pub mod error;
pub mod memory;
pub mod probe;
pub mod recorder;
pub mod traits;

pub use client::Client;
pub use error::{ProbeError, StoreError, StoreResult};
pub use memory::InMemoryObjectStore;
pub use probe::{verify_schemas, SchemaProbe, StaticSchemaProbe, OPTIONAL_SCHEMAS, REQUIRED_SCHEMAS};
pub use recorder::{BroadcastRecorder, EventRecorder};
pub use traits::{ObjectStore, WatchEvent};
