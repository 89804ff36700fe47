//! IP Address Management core
//!
//! In-memory source of truth for the address-space hierarchy
//! (aggregate → prefix → range → address) with VRF scoping, a concurrency-safe
//! allocation engine and utilization queries.
//!
//! # Example
//!
//! ```no_run
//! use ipam_core::{AllocateRequest, Allocator, BlockRef, IpamConfig, IpamStore, NewPrefix};
//!
//! # async fn example() -> Result<(), ipam_core::IpamError> {
//! let store = IpamStore::new(IpamConfig::from_env()?);
//!
//! // Register a prefix
//! let prefix = store
//!     .create_prefix(NewPrefix {
//!         prefix: "10.0.0.0/24".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! // Allocate the next free address from it
//! let allocator = Allocator::new(store.clone());
//! let ip = allocator
//!     .allocate_next(BlockRef::Prefix(prefix.id), AllocateRequest::default())
//!     .await?;
//!
//! // Check utilization
//! let usage = store.usage(BlockRef::Prefix(prefix.id)).await?;
//! println!("{} allocated, {}% used", ip.address, usage.percentage);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Hierarchy store**: aggregates, prefixes, ranges, addresses, VLANs and VRFs
//!   with uniqueness and overlap checks at write time
//! - **Allocation**: first-free address and sub-prefix allocation that never
//!   hands out the same address twice
//! - **Queries**: utilization, longest-prefix match, parents and children
//! - **Audit**: one event per mutation, delivered to a pluggable sink

pub mod allocator;
pub mod audit;
pub mod cidr;
pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod store;
pub mod usage;

pub use allocator::Allocator;
pub use audit::{AuditAction, AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use cidr::{AddressSpan, Cidr, IpVersion};
pub use config::IpamConfig;
pub use error::IpamError;
pub use models::*;
pub use registry::ObjectRegistry;
pub use store::{AddressFilter, IpamStore, PrefixFilter, RangeFilter, VlanFilter, VrfScope};
pub use usage::Usage;
