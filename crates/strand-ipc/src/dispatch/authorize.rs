//! Caller authorization.
//!
//! Access control lists use the classic `"users groups"` form: a comma
//! separated user list, a space, then a comma separated group list. A lone
//! `*` admits everyone.

use crate::error::{IpcError, IpcResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use strand_core::CallerIdentity;

/// Decides whether a caller may use a protocol.
pub trait AccessPolicy: Send + Sync + 'static {
    fn authorize(&self, caller: &CallerIdentity, protocol: &str) -> IpcResult<()>;
}

/// Admits every caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(&self, _caller: &CallerIdentity, _protocol: &str) -> IpcResult<()> {
        Ok(())
    }
}

/// A parsed access control list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessControlList {
    all_allowed: bool,
    users: HashSet<String>,
    groups: HashSet<String>,
}

impl AccessControlList {
    /// Wildcard for "everyone".
    pub const WILDCARD: &'static str = "*";

    /// Parse `"alice,bob admins,ops"`. Blank entries are ignored.
    pub fn parse(acl: &str) -> Self {
        if acl.trim() == Self::WILDCARD {
            return Self::allow_all();
        }

        let (users, groups) = acl.split_once(' ').unwrap_or((acl, ""));
        let split = |list: &str| -> HashSet<String> {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };
        Self {
            all_allowed: false,
            users: split(users),
            groups: split(groups),
        }
    }

    /// A list admitting every caller; the parsed form of `*`.
    pub fn allow_all() -> Self {
        Self {
            all_allowed: true,
            ..Self::default()
        }
    }

    /// Whether the list is the `*` wildcard.
    pub fn is_all_allowed(&self) -> bool {
        self.all_allowed
    }

    /// Whether the caller's user or one of its groups is listed.
    pub fn is_user_allowed(&self, caller: &CallerIdentity) -> bool {
        self.all_allowed
            || self.users.contains(&caller.user)
            || caller.groups.iter().any(|g| self.groups.contains(g))
    }
}

impl fmt::Display for AccessControlList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_allowed {
            return write!(f, "{}", Self::WILDCARD);
        }
        let mut users: Vec<_> = self.users.iter().map(String::as_str).collect();
        let mut groups: Vec<_> = self.groups.iter().map(String::as_str).collect();
        users.sort_unstable();
        groups.sort_unstable();
        write!(f, "{} {}", users.join(","), groups.join(","))
    }
}

/// One access control list per protocol, with a fallback for the rest.
#[derive(Debug, Clone)]
pub struct ProtocolAclPolicy {
    acls: HashMap<String, AccessControlList>,
    fallback: AccessControlList,
}

impl Default for ProtocolAclPolicy {
    fn default() -> Self {
        Self {
            acls: HashMap::new(),
            fallback: AccessControlList::allow_all(),
        }
    }
}

impl ProtocolAclPolicy {
    /// A policy admitting everyone until access lists are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `protocol -> acl string` pairs.
    pub fn from_map<'a>(acls: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut policy = Self::new();
        for (protocol, acl) in acls {
            policy = policy.with_acl(protocol.clone(), AccessControlList::parse(acl));
        }
        policy
    }

    /// Access list for `protocol`, replacing any previous one.
    pub fn with_acl(mut self, protocol: impl Into<String>, acl: AccessControlList) -> Self {
        self.acls.insert(protocol.into(), acl);
        self
    }

    /// Access list applied to protocols without their own entry.
    pub fn with_fallback(mut self, acl: AccessControlList) -> Self {
        self.fallback = acl;
        self
    }
}

impl AccessPolicy for ProtocolAclPolicy {
    fn authorize(&self, caller: &CallerIdentity, protocol: &str) -> IpcResult<()> {
        let acl = self.acls.get(protocol).unwrap_or(&self.fallback);
        if acl.is_user_allowed(caller) {
            Ok(())
        } else {
            Err(IpcError::Authorization(format!(
                "user {} is not authorized for protocol {}",
                caller, protocol
            )))
        }
    }
}
