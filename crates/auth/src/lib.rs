//! `agriconnect-auth` — authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: the API layer turns a bearer token into a
//! [`Principal`] through a [`JwtValidator`] and checks permissions here.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod roles;

pub use authorize::{AuthzError, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use roles::Role;
