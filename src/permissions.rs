//! Per-channel permission table: which roles hold which capability.

use std::collections::{BTreeSet, HashMap};

use crate::models::{Permission, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTable {
    roles: HashMap<Permission, BTreeSet<Role>>,
}

impl PermissionTable {
    /// A table in which nobody holds anything.
    pub fn empty() -> Self {
        Self {
            roles: HashMap::new(),
        }
    }

    pub fn allows(&self, role: Role, permission: Permission) -> bool {
        self.roles
            .get(&permission)
            .is_some_and(|roles| roles.contains(&role))
    }

    /// Replaces the role set holding `permission`.
    pub fn set(&mut self, permission: Permission, roles: impl IntoIterator<Item = Role>) {
        let roles: BTreeSet<Role> = roles.into_iter().collect();
        if roles.is_empty() {
            self.roles.remove(&permission);
        } else {
            self.roles.insert(permission, roles);
        }
    }

}

impl Default for PermissionTable {
    fn default() -> Self {
        use Role::{Admin, Member, Subscriber, Superadmin};

        let mut table = Self::empty();
        table.set(Permission::Read, [Subscriber, Member, Admin, Superadmin]);
        table.set(Permission::Write, [Member, Admin, Superadmin]);
        for moderation in [
            Permission::Delete,
            Permission::Modify,
            Permission::Kick,
            Permission::Ban,
            Permission::AssignRole,
        ] {
            table.set(moderation, [Admin, Superadmin]);
        }
        table.set(Permission::RemoveChannel, [Superadmin]);
        table
    }
}
