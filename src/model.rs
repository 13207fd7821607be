// src/model.rs

use serde::Deserialize;

/// A single JSON Web Key (JWK) as defined in RFC 7517.

#[derive(Debug, Deserialize)]
pub struct JsonWebKey {
    pub kid: String,
    pub kty: String,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

/// A JSON Web Key Set (JWKS): the provider's published collection of
/// current public signing keys.

#[derive(Debug, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}
