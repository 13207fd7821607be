// src/lib.rs

//! OAuth2 bearer-token verification for remote tool servers.
//!
//! `tollgate` validates signed JWT bearer tokens against an identity
//! provider's published JWKS: it caches the provider's signing keys,
//! survives key rotation without downtime, and turns every raw token into
//! either a [`verifier::VerifiedIdentity`] or a typed
//! [`error::VerifyError`].
//!
//! ```no_run
//! use tollgate::prelude::*;
//!
//! # async fn demo() -> Result<(), VerifyError> {
//! let config = ConfigBuilder::new()
//!     .issuer_domain("tenant.us.auth0.com")?
//!     .audience("https://api.example.com")
//!     .build()?;
//!
//! let verifier = TokenVerifier::new(config)?;
//! let identity = verifier.verify("eyJ...", &["profile"]).await?;
//! println!("authenticated {}", identity.subject);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod verifier;

/// The public prelude for the `tollgate` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::config::{Config, ConfigBuilder, VerificationOptions};
    pub use crate::error::VerifyError;
    pub use crate::verifier::{TokenVerifier, VerifiedIdentity};
    pub use jsonwebtoken::Algorithm;
}
