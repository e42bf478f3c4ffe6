//! Route-boundary authorization.
//!
//! Roles map to permissions here; ownership (which farmer may touch which
//! order or product) is decided by the services.

use agriconnect_auth::{AuthzError, Permission, Principal, Role, authorize};

use crate::context::PrincipalContext;

/// Role → permission policy.
pub fn permissions_from_role(role: &Role) -> Vec<Permission> {
    let mut perms = vec![Permission::ORDERS_READ, Permission::CATALOG_READ];
    if role.is_farmer() {
        perms.extend([
            Permission::ORDERS_STATUS_UPDATE,
            Permission::ORDERS_FARMER_READ,
            Permission::CATALOG_MANAGE,
        ]);
    } else {
        perms.push(Permission::ORDERS_PLACE);
    }
    perms
}

pub fn require(principal: &PrincipalContext, permission: &Permission) -> Result<(), AuthzError> {
    let principal = Principal {
        user_id: principal.user_id(),
        role: principal.role().clone(),
        permissions: permissions_from_role(principal.role()),
    };
    authorize(&principal, permission)
}

#[cfg(test)]
mod tests {
    use agriconnect_core::UserId;

    use super::*;

    #[test]
    fn farmers_manage_and_buyers_place() {
        let farmer = PrincipalContext::new(UserId::new(), Role::FARMER);
        let buyer = PrincipalContext::new(UserId::new(), Role::INDUSTRIAL);

        assert!(require(&farmer, &Permission::ORDERS_STATUS_UPDATE).is_ok());
        assert!(require(&farmer, &Permission::CATALOG_MANAGE).is_ok());
        assert!(require(&farmer, &Permission::ORDERS_PLACE).is_err());

        assert!(require(&buyer, &Permission::ORDERS_PLACE).is_ok());
        assert!(require(&buyer, &Permission::ORDERS_FARMER_READ).is_err());
        assert!(require(&buyer, &Permission::ORDERS_READ).is_ok());
    }

    #[test]
    fn unknown_roles_may_buy_but_not_manage() {
        let other = PrincipalContext::new(UserId::new(), Role::new("restaurant"));
        assert!(require(&other, &Permission::ORDERS_PLACE).is_ok());
        assert!(require(&other, &Permission::CATALOG_MANAGE).is_err());
    }
}
