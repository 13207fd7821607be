// src/config.rs

use crate::error::VerifyError;
use jsonwebtoken::Algorithm;
use std::time::Duration;
use url::Url;

/// The path under the issuer at which providers publish their key set.
const WELL_KNOWN_JWKS_PATH: &str = ".well-known/jwks.json";

/// Claim-validation settings applied to every token.
#[derive(Debug, Clone)]
pub struct VerificationOptions {
    /// The signing algorithms that are permitted. Tokens declaring any
    /// other algorithm are rejected before their signature is examined.
    pub algorithms: Vec<Algorithm>,
    /// Clock-skew tolerance for the `iat` claim. `exp` is always checked
    /// strictly. Defaults to 60 seconds.
    pub leeway: Duration,
}

impl Default for VerificationOptions {
    fn default() -> Self {
        Self {
            // RS256 is what Auth0 and most providers sign access tokens with.
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(60),
        }
    }
}

/// The main configuration for the verifier.
///
/// Holds everything needed to reach the identity provider's key set and to
/// validate token claims. Construct it with [`ConfigBuilder`]; required
/// fields are checked once at build time, never per request.
#[derive(Debug, Clone)]
pub struct Config {
    /// The identity provider's issuer URL. Tokens must carry exactly this
    /// value in their `iss` claim.
    pub issuer_url: Url,
    /// The API identifier expected in the `aud` claim.
    pub audience: String,
    /// The key-set endpoint. Either supplied explicitly or derived from the
    /// issuer as `{issuer}/.well-known/jwks.json`.
    pub jwks_uri: Url,
    /// Claim-validation settings.
    pub validation: VerificationOptions,
    /// How long a fetched key set stays trusted when the provider sends no
    /// `Cache-Control: max-age`. Defaults to one hour.
    pub cache_ttl: Duration,
    /// Upper bound on a single key-set fetch. Defaults to 10 seconds.
    pub fetch_timeout: Duration,
}

/// A builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    issuer_url: Option<Url>,
    audience: Option<String>,
    jwks_uri: Option<Url>,
    cache_ttl: Option<Duration>,
    fetch_timeout: Option<Duration>,
    validation: VerificationOptions,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the issuer URL of the identity provider. Required, unless
    /// [`issuer_domain`](Self::issuer_domain) is used instead.
    pub fn issuer_url(mut self, url: &str) -> Result<Self, VerifyError> {
        let parsed = Url::parse(url).map_err(|e| VerifyError::InvalidUrl(e.to_string()))?;
        self.issuer_url = Some(parsed);
        Ok(self)
    }

    /// Sets the issuer from a bare provider domain, e.g.
    /// `"tenant.us.auth0.com"`. The issuer becomes `https://{domain}/`,
    /// matching the `iss` claim such providers emit.
    pub fn issuer_domain(self, domain: &str) -> Result<Self, VerifyError> {
        self.issuer_url(&format!("https://{domain}/"))
    }

    /// Sets the expected audience (API identifier). Required.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Sets an explicit key-set endpoint, overriding the well-known path
    /// derived from the issuer. Optional.
    pub fn jwks_uri(mut self, url: &str) -> Result<Self, VerifyError> {
        let parsed = Url::parse(url).map_err(|e| VerifyError::InvalidUrl(e.to_string()))?;
        self.jwks_uri = Some(parsed);
        Ok(self)
    }

    /// Sets the allowed signing algorithms.
    /// Defaults to `[Algorithm::RS256]` if not set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.validation.algorithms = algorithms;
        self
    }

    /// Sets the `iat` clock-skew tolerance. Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Sets the fallback TTL for cached key sets. Defaults to one hour.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the timeout for key-set fetches. Defaults to 10 seconds.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Consumes the builder and returns a `Config`.
    ///
    /// # Errors
    ///
    /// Returns `MissingConfiguration` if `issuer_url` or `audience` is
    /// unset.
    pub fn build(self) -> Result<Config, VerifyError> {
        let issuer_url = self
            .issuer_url
            .ok_or(VerifyError::MissingConfiguration("issuer_url"))?;
        let audience = self
            .audience
            .ok_or(VerifyError::MissingConfiguration("audience"))?;

        let jwks_uri = match self.jwks_uri {
            Some(uri) => uri,
            None => issuer_url
                .join(WELL_KNOWN_JWKS_PATH)
                .map_err(|e| VerifyError::InvalidUrl(e.to_string()))?,
        };

        Ok(Config {
            issuer_url,
            audience,
            jwks_uri,
            validation: self.validation,
            cache_ttl: self.cache_ttl.unwrap_or(Duration::from_secs(60 * 60)),
            fetch_timeout: self.fetch_timeout.unwrap_or(Duration::from_secs(10)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_issuer_and_audience() {
        let err = ConfigBuilder::new()
            .audience("https://api.example.com")
            .build()
            .unwrap_err();
        assert_eq!(err, VerifyError::MissingConfiguration("issuer_url"));

        let err = ConfigBuilder::new()
            .issuer_url("https://tenant.example.com/")
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(err, VerifyError::MissingConfiguration("audience"));
    }

    #[test]
    fn jwks_uri_is_derived_from_issuer() {
        let config = ConfigBuilder::new()
            .issuer_domain("tenant.us.auth0.com")
            .unwrap()
            .audience("https://api.example.com")
            .build()
            .unwrap();
        assert_eq!(config.issuer_url.as_str(), "https://tenant.us.auth0.com/");
        assert_eq!(
            config.jwks_uri.as_str(),
            "https://tenant.us.auth0.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn explicit_jwks_uri_wins_over_derived() {
        let config = ConfigBuilder::new()
            .issuer_url("https://tenant.example.com/")
            .unwrap()
            .audience("api")
            .jwks_uri("https://keys.example.com/jwks.json")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.jwks_uri.as_str(), "https://keys.example.com/jwks.json");
    }

    #[test]
    fn invalid_issuer_url_is_rejected() {
        let err = ConfigBuilder::new().issuer_url("not a url").unwrap_err();
        assert!(matches!(err, VerifyError::InvalidUrl(_)));
    }

    #[test]
    fn defaults() {
        let config = ConfigBuilder::new()
            .issuer_url("https://tenant.example.com/")
            .unwrap()
            .audience("api")
            .build()
            .unwrap();
        assert_eq!(config.validation.algorithms, vec![Algorithm::RS256]);
        assert_eq!(config.validation.leeway, Duration::from_secs(60));
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
    }
}
