use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (e.g. "orders.place").
///
/// The wildcard `"*"` grants everything; only test fixtures and tooling use it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const ORDERS_PLACE: Permission = Permission(Cow::Borrowed("orders.place"));
    pub const ORDERS_READ: Permission = Permission(Cow::Borrowed("orders.read"));
    pub const ORDERS_STATUS_UPDATE: Permission = Permission(Cow::Borrowed("orders.status.update"));
    pub const ORDERS_FARMER_READ: Permission = Permission(Cow::Borrowed("orders.farmer.read"));
    pub const CATALOG_READ: Permission = Permission(Cow::Borrowed("catalog.read"));
    pub const CATALOG_MANAGE: Permission = Permission(Cow::Borrowed("catalog.manage"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
