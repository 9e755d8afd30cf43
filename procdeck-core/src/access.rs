//! Access control: which processes a session may see and act on.
//!
//! The ACL is passed in explicitly; nothing here reads ambient session
//! state. Every check fails closed when no ACL is available.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{ProcessId, ServerId};

/// Permission bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u32);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const READ: Permissions = Permissions(1);
    pub const LOGS: Permissions = Permissions(1 << 1);
    pub const RESTART: Permissions = Permissions(1 << 2);
    pub const STOP: Permissions = Permissions(1 << 3);
    pub const DELETE: Permissions = Permissions(1 << 4);
    pub const ALL: Permissions = Permissions(0b1_1111);

    pub const fn from_bits(bits: u32) -> Self {
        Permissions(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Permissions) -> Self {
        Permissions(self.0 | other.0)
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Permissions, &str); 5] = [
            (Permissions::READ, "READ"),
            (Permissions::LOGS, "LOGS"),
            (Permissions::RESTART, "RESTART"),
            (Permissions::STOP, "STOP"),
            (Permissions::DELETE, "DELETE"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(p, _)| self.contains(*p))
            .map(|(_, n)| *n)
            .collect();
        write!(f, "Permissions({})", set.join("|"))
    }
}

/// Override of the server default for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessGrant {
    pub process: ProcessId,
    pub perms: Permissions,
}

/// Grant on one server: default permissions plus per-process overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerGrant {
    pub server: ServerId,
    #[serde(default)]
    pub perms: Permissions,
    #[serde(default)]
    pub processes: Vec<ProcessGrant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessControlList {
    pub owner: bool,
    pub admin: bool,
    pub servers: Vec<ServerGrant>,
}

impl AccessControlList {
    pub fn owner() -> Self {
        Self { owner: true, ..Default::default() }
    }

    pub fn is_superuser(&self) -> bool {
        self.owner || self.admin
    }

    /// Resolved permission set for a process on a server: the process
    /// override when present, else the server default, else nothing.
    pub fn perms(&self, server_id: &str, process_id: &str) -> Permissions {
        let Some(grant) = self.servers.iter().find(|g| g.server == server_id) else {
            return Permissions::NONE;
        };
        grant
            .processes
            .iter()
            .find(|p| p.process == process_id)
            .map(|p| p.perms)
            .unwrap_or(grant.perms)
    }
}

/// Permission checks against one ACL snapshot.
#[derive(Debug, Clone, Copy)]
pub struct AccessFilter<'a> {
    acl: Option<&'a AccessControlList>,
}

impl<'a> AccessFilter<'a> {
    pub fn new(acl: Option<&'a AccessControlList>) -> Self {
        Self { acl }
    }

    /// Filter that denies everything.
    pub fn deny_all() -> Self {
        Self { acl: None }
    }

    /// Superusers pass unconditionally. Otherwise the resolved set must
    /// contain `permission`, or be non-empty when no permission is asked.
    pub fn has_permission(
        &self,
        process_id: &str,
        server_id: &str,
        permission: Option<Permissions>,
    ) -> bool {
        let Some(acl) = self.acl else {
            return false;
        };
        if acl.is_superuser() {
            return true;
        }
        let perms = acl.perms(server_id, process_id);
        match permission {
            Some(p) => perms.contains(p),
            None => !perms.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl() -> AccessControlList {
        AccessControlList {
            owner: false,
            admin: false,
            servers: vec![ServerGrant {
                server: "s1".into(),
                perms: Permissions::READ | Permissions::LOGS,
                processes: vec![
                    ProcessGrant { process: "p2".into(), perms: Permissions::ALL },
                    ProcessGrant { process: "p3".into(), perms: Permissions::NONE },
                ],
            }],
        }
    }

    #[test]
    fn test_absent_acl_fails_closed() {
        let filter = AccessFilter::deny_all();
        assert!(!filter.has_permission("p1", "s1", None));
        assert!(!filter.has_permission("p1", "s1", Some(Permissions::READ)));
    }

    #[test]
    fn test_superuser_bypass() {
        let owner = AccessControlList::owner();
        let admin = AccessControlList { admin: true, ..Default::default() };
        for acl in [&owner, &admin] {
            let filter = AccessFilter::new(Some(acl));
            assert!(filter.has_permission("any", "where", Some(Permissions::DELETE)));
        }
    }

    #[test]
    fn test_server_default_and_override() {
        let acl = acl();
        let filter = AccessFilter::new(Some(&acl));

        assert!(filter.has_permission("p1", "s1", None));
        assert!(filter.has_permission("p1", "s1", Some(Permissions::LOGS)));
        assert!(!filter.has_permission("p1", "s1", Some(Permissions::RESTART)));

        assert!(filter.has_permission("p2", "s1", Some(Permissions::DELETE)));
        // explicit empty override hides the process
        assert!(!filter.has_permission("p3", "s1", None));
    }

    #[test]
    fn test_unknown_server_has_no_permissions() {
        let acl = acl();
        let filter = AccessFilter::new(Some(&acl));
        assert!(!filter.has_permission("p1", "s9", None));
    }

    #[test]
    fn test_acl_deserializes_bitmask() {
        let acl: AccessControlList = serde_json::from_str(
            r#"{"servers":[{"server":"s1","perms":5,"processes":[{"process":"p1","perms":8}]}]}"#,
        )
        .unwrap();
        assert_eq!(acl.perms("s1", "p9"), Permissions::READ | Permissions::RESTART);
        assert_eq!(acl.perms("s1", "p1"), Permissions::STOP);
        assert_eq!(format!("{:?}", acl.perms("s1", "p1")), "Permissions(STOP)");
    }
}
