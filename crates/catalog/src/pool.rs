use serde::{Deserialize, Serialize};

use agriconnect_auth::Role;

/// One of the two independent stock pools a product carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockPool {
    Local,
    Industrial,
}

impl StockPool {
    pub fn as_str(self) -> &'static str {
        match self {
            StockPool::Local => "local",
            StockPool::Industrial => "industrial",
        }
    }
}

impl core::fmt::Display for StockPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool a buyer draws from: industrial buyers use the industrial pool, every
/// other role uses the local pool.
pub fn pool_for(role: &Role) -> StockPool {
    if role.is_industrial() {
        StockPool::Industrial
    } else {
        StockPool::Local
    }
}
