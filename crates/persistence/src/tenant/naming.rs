//! Physical collection naming.
//!
//! Maps a logical collection, the pair of [`TenantId`] and type name, to a
//! name the backend accepts. Each backend publishes its own [`NamingRules`].
//!
//! Both segments are escaped independently. Literal characters pass through,
//! the escape character is doubled, and everything else is written as
//! `<escape><hex code point><escape>`. The separator is never a literal, so it
//! appears exactly once in a tenant-scoped name and the mapping is injective.
//!
//! ```
//! use neutrino_persistence::tenant::{NamingRules, TenantId, physical_name};
//!
//! let acme = TenantId::new("acme");
//! assert_eq!(physical_name(&NamingRules::MONGODB, &acme, "orders"), "acme.orders");
//! assert_eq!(physical_name(&NamingRules::RETHINKDB, &acme, "orders"), "acme_orders");
//! assert_eq!(physical_name(&NamingRules::MONGODB, &acme, "a.b"), "acme.a_2e_b");
//! ```

use std::fmt::Write;

use super::TenantId;

/// Character rules for building physical collection names.
#[derive(Debug, Clone, Copy)]
pub struct NamingRules {
    /// Placed between the tenant segment and the type segment.
    pub separator: char,
    /// Introduces an escaped code point; doubled when it occurs literally.
    pub escape: char,
    /// Tenant segments the backend reserves as a name prefix. Their first
    /// character is escaped.
    pub reserved_prefixes: &'static [&'static str],
    is_literal: fn(char) -> bool,
}

fn mongodb_literal(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-'
}

fn rethinkdb_literal(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
}

impl NamingRules {
    /// MongoDB collections: `tenant.type`, `_` escapes. `system.` is reserved.
    pub const MONGODB: NamingRules = NamingRules {
        separator: '.',
        escape: '_',
        reserved_prefixes: &["system"],
        is_literal: mongodb_literal,
    };

    /// RethinkDB tables (`[A-Za-z0-9_-]` only): `tenant_type`, `-` escapes.
    pub const RETHINKDB: NamingRules = NamingRules {
        separator: '_',
        escape: '-',
        reserved_prefixes: &[],
        is_literal: rethinkdb_literal,
    };

    /// Returns `true` if `ch` is kept verbatim by these rules.
    pub fn is_literal(&self, ch: char) -> bool {
        ch != self.escape && ch != self.separator && (self.is_literal)(ch)
    }

    /// Escapes a single name segment.
    pub fn encode_segment(&self, segment: &str) -> String {
        let mut out = String::with_capacity(segment.len());
        for ch in segment.chars() {
            self.encode_char(&mut out, ch);
        }
        out
    }

    fn encode_char(&self, out: &mut String, ch: char) {
        if ch == self.escape {
            out.push(ch);
            out.push(ch);
        } else if self.is_literal(ch) {
            out.push(ch);
        } else {
            self.escape_char(out, ch);
        }
    }

    fn escape_char(&self, out: &mut String, ch: char) {
        // Writing to a String cannot fail.
        let _ = write!(out, "{esc}{code:x}{esc}", esc = self.escape, code = ch as u32);
    }

    /// Escapes a tenant segment, also escaping the first character of a
    /// reserved prefix. The result stays injective because a literal
    /// character is never written in escaped form otherwise.
    fn encode_tenant(&self, tenant: &str) -> String {
        if !self.reserved_prefixes.contains(&tenant) {
            return self.encode_segment(tenant);
        }
        let mut chars = tenant.chars();
        let mut out = String::with_capacity(tenant.len() + 4);
        if let Some(first) = chars.next() {
            self.escape_char(&mut out, first);
        }
        for ch in chars {
            self.encode_char(&mut out, ch);
        }
        out
    }

    /// Builds the physical name for `type_name` owned by `tenant`.
    pub fn physical_name(&self, tenant: &TenantId, type_name: &str) -> String {
        let type_segment = self.encode_segment(type_name);
        if tenant.is_system() {
            return type_segment;
        }

        let mut name = self.encode_tenant(tenant.as_str());
        name.push(self.separator);
        name.push_str(&type_segment);
        name
    }
}

/// Builds the physical collection name for a logical collection.
///
/// The function is total and deterministic.
pub fn physical_name(rules: &NamingRules, tenant: &TenantId, type_name: &str) -> String {
    rules.physical_name(tenant, type_name)
}
