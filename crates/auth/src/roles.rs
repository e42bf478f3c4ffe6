use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Marketplace role carried in the token.
///
/// Kept as an opaque string so an unknown role still authenticates; it simply
/// maps to no permissions beyond the read set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Produces and sells listings.
    pub const FARMER: Role = Role(Cow::Borrowed("farmer"));
    /// Household buyer; purchases from the local pool.
    pub const INDIVIDUAL: Role = Role(Cow::Borrowed("individual"));
    /// Business buyer; purchases from the industrial pool.
    pub const INDUSTRIAL: Role = Role(Cow::Borrowed("industrial"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_farmer(&self) -> bool {
        self.as_str() == "farmer"
    }

    pub fn is_industrial(&self) -> bool {
        self.as_str() == "industrial"
    }

    /// Any non-farmer role may buy.
    pub fn is_buyer(&self) -> bool {
        !self.is_farmer()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
