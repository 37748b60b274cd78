//! Tenant scope identifier.
//!
//! A [`TenantId`] names the namespace that owns a logical collection: a
//! user (for their application list), an application (for its data types
//! and end users), or the system itself. It is only ever used to derive
//! physical collection names and is never stored as a document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The system tenant identifier, used for deployment-wide collections.
///
/// Collections owned by the system tenant (the user registry, the
/// application map, system settings) carry no tenant prefix in their
/// physical name.
pub const SYSTEM_TENANT: &str = "__system__";

/// An opaque tenant scope.
///
/// # Examples
///
/// ```
/// use neutrino_persistence::tenant::TenantId;
///
/// let user = TenantId::new("jane@example.com");
/// assert_eq!(user.as_str(), "jane@example.com");
/// assert!(!user.is_system());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant scope from the given string.
    ///
    /// An empty scope is a caller contract violation; it is accepted here and
    /// produces a distinct (if odd) physical name rather than a runtime error.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the system tenant scope.
    ///
    /// # Examples
    ///
    /// ```
    /// use neutrino_persistence::tenant::TenantId;
    ///
    /// let system = TenantId::system();
    /// assert!(system.is_system());
    /// ```
    pub fn system() -> Self {
        Self(SYSTEM_TENANT.to_string())
    }

    /// Returns the tenant scope as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is the system tenant.
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_TENANT
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl FromStr for TenantId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TenantId::new(s))
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId::new(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
