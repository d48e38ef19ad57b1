//! Role and tenant access decisions.
//!
//! [`can_access`] is the pure predicate. [`TenantScope`] carries its
//! tenant-equality half into every store lookup, so a record owned by
//! another tenant is simply not found.

use crate::db::schema::Role;
use crate::types::TenantId;

/// Decide whether an actor may operate on a resource owned by `resource_tenant`.
///
/// The role must be in `required`. Superadmins then pass regardless of
/// tenant; everyone else only within their own tenant.
pub fn can_access(
    actor_role: Role,
    actor_tenant: Option<&TenantId>,
    resource_tenant: Option<&TenantId>,
    required: &[Role],
) -> bool {
    if !required.contains(&actor_role) {
        return false;
    }
    if actor_role.is_superadmin() {
        return true;
    }
    match (actor_tenant, resource_tenant) {
        (Some(actor), Some(resource)) => actor == resource,
        _ => false,
    }
}

/// Tenant filter applied inside store queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    /// Every tenant (superadmin).
    All,
    /// Only records owned by this tenant.
    Tenant(TenantId),
}

impl TenantScope {
    /// Scope of an actor: superadmins see everything, others their tenant.
    ///
    /// A non-superadmin without a tenant gets a scope that matches nothing.
    pub fn for_actor(role: Role, tenant: Option<&TenantId>) -> Self {
        if role.is_superadmin() {
            return TenantScope::All;
        }
        TenantScope::Tenant(tenant.cloned().unwrap_or_else(|| TenantId::new("")))
    }

    /// SurrealQL condition restricting `column` to this scope, bound to
    /// `$scope_tenant`. Empty for [`TenantScope::All`].
    pub fn condition(&self, column: &str) -> Option<String> {
        match self {
            TenantScope::All => None,
            TenantScope::Tenant(_) => Some(format!("{column} = $scope_tenant")),
        }
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            TenantScope::All => None,
            TenantScope::Tenant(t) => Some(t),
        }
    }

    pub fn bind_value(&self) -> Option<String> {
        self.tenant().map(|t| t.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: &str) -> TenantId {
        TenantId::new(id)
    }

    #[test]
    fn test_tenant_admin_cross_tenant_denied() {
        assert!(!can_access(
            Role::TenantAdmin,
            Some(&t("t1")),
            Some(&t("t2")),
            &[Role::TenantAdmin]
        ));
    }

    #[test]
    fn test_tenant_admin_same_tenant_allowed() {
        assert!(can_access(
            Role::TenantAdmin,
            Some(&t("t1")),
            Some(&t("t1")),
            &[Role::TenantAdmin, Role::TenantUser]
        ));
    }

    #[test]
    fn test_superadmin_ignores_tenant() {
        for resource in [Some(t("t2")), Some(t("other")), None] {
            assert!(can_access(
                Role::Superadmin,
                None,
                resource.as_ref(),
                &[Role::Superadmin]
            ));
        }
        assert!(can_access(
            Role::Superadmin,
            Some(&t("anything")),
            Some(&t("t2")),
            &[Role::Superadmin]
        ));
    }

    #[test]
    fn test_role_outside_required_set_denied() {
        assert!(!can_access(
            Role::TenantUser,
            Some(&t("t1")),
            Some(&t("t1")),
            &[Role::TenantAdmin]
        ));
        assert!(!can_access(
            Role::Superadmin,
            None,
            Some(&t("t1")),
            &[Role::TenantAdmin]
        ));
    }

    #[test]
    fn test_missing_tenant_denied_for_tenant_roles() {
        assert!(!can_access(
            Role::TenantUser,
            None,
            Some(&t("t1")),
            &[Role::TenantUser]
        ));
    }

    #[test]
    fn test_scope_condition() {
        let scope = TenantScope::for_actor(Role::TenantUser, Some(&t("t1")));
        assert_eq!(scope.condition("tenant_id").as_deref(), Some("tenant_id = $scope_tenant"));
        assert_eq!(scope.bind_value().as_deref(), Some("t1"));

        let all = TenantScope::for_actor(Role::Superadmin, None);
        assert_eq!(all, TenantScope::All);
        assert!(all.condition("tenant_id").is_none());
        assert!(all.bind_value().is_none());
    }
}
