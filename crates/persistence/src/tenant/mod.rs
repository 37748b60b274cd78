//! Tenant scopes and physical collection naming.
//!
//! - [`TenantId`] - Opaque owner of a logical collection (a user, an application, or the system)
//! - [`NamingRules`] / [`physical_name`] - Backend-safe, injective collection naming
//!
//! # Examples
//!
//! ```
//! use neutrino_persistence::tenant::{NamingRules, TenantId};
//!
//! let users = NamingRules::RETHINKDB.physical_name(&TenantId::system(), "users");
//! assert_eq!(users, "users");
//! ```

mod id;
mod naming;

pub use id::{SYSTEM_TENANT, TenantId};
pub use naming::{NamingRules, physical_name};
