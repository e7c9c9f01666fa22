pub mod jwt;
pub mod middleware;

pub use jwt::{AuthError, FirebaseVerifier, IdentityVerifier, VerifiedIdentity};
