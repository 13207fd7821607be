// src/verifier.rs

use crate::client::{JwksClient, SigningKey};
use crate::config::Config;
use crate::error::VerifyError;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

/// The identity carried by a successfully verified bearer token.
///
/// Created only by [`TokenVerifier::verify`], immutable, and scoped to a
/// single request; downstream handlers read it for authorization and audit
/// decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    /// The `sub` claim.
    pub subject: String,
    /// The authorized party: `azp`, falling back to `client_id`.
    pub client_id: Option<String>,
    /// The granted scope names, from the space-delimited `scope` claim or
    /// the `permissions` array.
    pub scopes: HashSet<String>,
    /// The `exp` claim, in unix seconds.
    pub expires_at: u64,
    /// The full claim mapping, for downstream inspection.
    pub claims: Map<String, Value>,
}

/// Verifies OAuth2 bearer tokens against the identity provider's key set.
///
/// Create one per process and reuse it for all requests; it is cheap to
/// clone and shares its key cache across clones.
#[derive(Clone)]
pub struct TokenVerifier {
    config: Config,
    jwks: JwksClient,
}

// The portion of the JOSE header the pipeline needs before any
// cryptography runs. Decoded by hand so that a header declaring an unknown
// algorithm (`"none"` included) still reaches the allow-list check.
#[derive(Deserialize)]
struct TokenHeader {
    alg: Option<String>,
    kid: Option<String>,
}

impl TokenVerifier {
    /// Creates a new `TokenVerifier` with the given configuration.
    pub fn new(config: Config) -> Result<Self, VerifyError> {
        let jwks = JwksClient::new(&config)?;
        Ok(Self { config, jwks })
    }

    /// Verifies a raw bearer token and returns the identity it carries.
    ///
    /// The pipeline runs in a fixed order and short-circuits on the first
    /// failure:
    ///
    /// 1. Structural parse of the three-segment token and its header.
    /// 2. Algorithm allow-list check, strictly before any key lookup, so
    ///    an algorithm-substitution attempt never touches the key cache.
    /// 3. Key resolution by `kid` (the only step that may perform I/O).
    /// 4. Cryptographic signature verification.
    /// 5. Claim checks: issuer, audience, expiration, issued-at.
    /// 6. Scope check, when `required_scopes` is non-empty.
    ///
    /// There are no retries within a call; a second `verify` with the same
    /// unexpired token and unchanged cache returns the same identity.
    #[instrument(skip(self, token), err)]
    pub async fn verify(
        &self,
        token: &str,
        required_scopes: &[&str],
    ) -> Result<VerifiedIdentity, VerifyError> {
        // 1. Structural parse.
        let header = decode_token_header(token)?;
        let declared_alg = header
            .alg
            .ok_or_else(|| VerifyError::Malformed("header is missing 'alg'".into()))?;
        let kid = header
            .kid
            .ok_or_else(|| VerifyError::Malformed("header is missing 'kid'".into()))?;

        // 2. Algorithm allow-list, before any key-cache traffic.
        let algorithm = Algorithm::from_str(&declared_alg)
            .map_err(|_| VerifyError::AlgorithmNotAllowed(declared_alg.clone()))?;
        if !self.config.validation.algorithms.contains(&algorithm) {
            return Err(VerifyError::AlgorithmNotAllowed(declared_alg));
        }

        // 3. Key resolution.
        let key = self.jwks.get_key(&kid).await?;

        // 4. Signature verification.
        let claims = verify_signature(token, &key, algorithm)?;

        // 5. Claim checks, each a pure predicate over the claim map.
        let now = unix_now();
        check_issuer(&claims, self.config.issuer_url.as_str())?;
        check_audience(&claims, &self.config.audience)?;
        check_expiration(&claims, now)?;
        check_issued_at(&claims, now, self.config.validation.leeway)?;

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| VerifyError::Malformed("token has no 'sub' claim".into()))?
            .to_owned();

        // 6. Scope check.
        let scopes = granted_scopes(&claims);
        check_required_scopes(&scopes, required_scopes)?;

        let client_id = claims
            .get("azp")
            .or_else(|| claims.get("client_id"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let expires_at = claims.get("exp").and_then(Value::as_u64).unwrap_or(0);

        debug!(%subject, "token verified");
        Ok(VerifiedIdentity {
            subject,
            client_id,
            scopes,
            expires_at,
            claims,
        })
    }
}

/// Splits the token into its three segments and decodes the header, without
/// touching the signature.
fn decode_token_header(token: &str) -> Result<TokenHeader, VerifyError> {
    let mut segments = token.split('.');
    let header_segment = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(header), Some(_payload), Some(_signature), None) => header,
        _ => {
            return Err(VerifyError::Malformed(
                "expected three dot-separated segments".into(),
            ))
        }
    };

    let header_bytes = base64_url::decode(header_segment)
        .map_err(|e| VerifyError::Malformed(format!("header is not valid base64url: {e}")))?;
    serde_json::from_slice(&header_bytes)
        .map_err(|e| VerifyError::Malformed(format!("header is not valid JSON: {e}")))
}

/// Verifies the token's signature with the resolved key and returns the raw
/// claim map. All claim validation is disabled here; the pipeline's own
/// checks run afterwards so that each violation maps to its own error kind.
fn verify_signature(
    token: &str,
    key: &SigningKey,
    algorithm: Algorithm,
) -> Result<Map<String, Value>, VerifyError> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    match decode::<Map<String, Value>>(token, &key.key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => Err(VerifyError::BadSignature),
            _ => Err(VerifyError::Malformed(e.to_string())),
        },
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The `iss` claim must equal the configured issuer exactly.
fn check_issuer(claims: &Map<String, Value>, expected: &str) -> Result<(), VerifyError> {
    match claims.get("iss").and_then(Value::as_str) {
        Some(iss) if iss == expected => Ok(()),
        _ => Err(VerifyError::IssuerMismatch {
            expected: expected.to_owned(),
        }),
    }
}

/// The `aud` claim (string or array) must contain the configured audience.
fn check_audience(claims: &Map<String, Value>, expected: &str) -> Result<(), VerifyError> {
    let matches = match claims.get("aud") {
        Some(Value::String(aud)) => aud == expected,
        Some(Value::Array(auds)) => auds.iter().any(|v| v.as_str() == Some(expected)),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(VerifyError::AudienceMismatch {
            expected: expected.to_owned(),
        })
    }
}

/// The `exp` claim must be present and strictly in the future. A token
/// expiring exactly now is already expired; no leeway applies.
fn check_expiration(claims: &Map<String, Value>, now: u64) -> Result<(), VerifyError> {
    match claims.get("exp").and_then(Value::as_u64) {
        Some(exp) if exp > now => Ok(()),
        Some(exp) => Err(VerifyError::Expired(Some(exp))),
        None => Err(VerifyError::Expired(None)),
    }
}

/// The `iat` claim, when present, must not be in the future beyond the
/// clock-skew tolerance.
fn check_issued_at(
    claims: &Map<String, Value>,
    now: u64,
    leeway: Duration,
) -> Result<(), VerifyError> {
    match claims.get("iat").and_then(Value::as_u64) {
        Some(iat) if iat > now + leeway.as_secs() => Err(VerifyError::NotYetValid(iat)),
        _ => Ok(()),
    }
}

/// Extracts the granted scope set: the space-delimited `scope` claim,
/// falling back to the `permissions` array some providers emit instead.
fn granted_scopes(claims: &Map<String, Value>) -> HashSet<String> {
    if let Some(scope) = claims.get("scope").and_then(Value::as_str) {
        return scope.split_whitespace().map(str::to_owned).collect();
    }
    if let Some(permissions) = claims.get("permissions").and_then(Value::as_array) {
        return permissions
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();
    }
    HashSet::new()
}

/// The granted scopes must be a superset of the required ones.
fn check_required_scopes(
    granted: &HashSet<String>,
    required: &[&str],
) -> Result<(), VerifyError> {
    let mut missing: Vec<String> = required
        .iter()
        .filter(|scope| !granted.contains(**scope))
        .map(|scope| (*scope).to_owned())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        missing.sort_unstable();
        Err(VerifyError::InsufficientScope { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn issuer_must_match_exactly() {
        let c = claims(json!({ "iss": "https://tenant.example.com/" }));
        assert!(check_issuer(&c, "https://tenant.example.com/").is_ok());
        assert!(matches!(
            check_issuer(&c, "https://other.example.com/"),
            Err(VerifyError::IssuerMismatch { .. })
        ));
        let missing = claims(json!({}));
        assert!(check_issuer(&missing, "https://tenant.example.com/").is_err());
    }

    #[test]
    fn audience_accepts_string_or_array() {
        let single = claims(json!({ "aud": "https://api.example.com" }));
        assert!(check_audience(&single, "https://api.example.com").is_ok());

        let multi = claims(json!({ "aud": ["https://api.example.com", "https://userinfo"] }));
        assert!(check_audience(&multi, "https://api.example.com").is_ok());

        assert!(matches!(
            check_audience(&multi, "https://elsewhere"),
            Err(VerifyError::AudienceMismatch { .. })
        ));
    }

    #[test]
    fn expiration_boundary_is_exclusive() {
        let now = 1_700_000_000;
        let at_now = claims(json!({ "exp": now }));
        assert_eq!(
            check_expiration(&at_now, now),
            Err(VerifyError::Expired(Some(now)))
        );

        let one_second_left = claims(json!({ "exp": now + 1 }));
        assert!(check_expiration(&one_second_left, now).is_ok());

        let missing = claims(json!({}));
        assert_eq!(
            check_expiration(&missing, now),
            Err(VerifyError::Expired(None))
        );

        // A missing claim must not read as "expired at epoch" in logs.
        assert_eq!(
            VerifyError::Expired(None).to_string(),
            "token has no expiration claim"
        );
        assert_eq!(
            VerifyError::Expired(Some(now)).to_string(),
            format!("token expired at {now}")
        );
    }

    #[test]
    fn issued_at_tolerates_leeway_only() {
        let now = 1_700_000_000;
        let leeway = Duration::from_secs(60);

        let within = claims(json!({ "iat": now + 60 }));
        assert!(check_issued_at(&within, now, leeway).is_ok());

        let beyond = claims(json!({ "iat": now + 61 }));
        assert_eq!(
            check_issued_at(&beyond, now, leeway),
            Err(VerifyError::NotYetValid(now + 61))
        );

        let absent = claims(json!({}));
        assert!(check_issued_at(&absent, now, leeway).is_ok());
    }

    #[test]
    fn scopes_come_from_scope_claim_or_permissions() {
        let spaced = granted_scopes(&claims(json!({ "scope": "openid profile email" })));
        assert_eq!(spaced.len(), 3);
        assert!(spaced.contains("profile"));

        let listed = granted_scopes(&claims(json!({ "permissions": ["read:videos", "admin"] })));
        assert_eq!(listed.len(), 2);
        assert!(listed.contains("read:videos"));

        // "scope" wins when both are present.
        let both = granted_scopes(&claims(
            json!({ "scope": "openid", "permissions": ["admin"] }),
        ));
        assert_eq!(both.len(), 1);
        assert!(both.contains("openid"));

        assert!(granted_scopes(&claims(json!({}))).is_empty());
    }

    #[test]
    fn required_scopes_must_be_covered() {
        let granted: HashSet<String> =
            ["openid", "email"].iter().map(|s| s.to_string()).collect();

        assert!(check_required_scopes(&granted, &[]).is_ok());
        assert!(check_required_scopes(&granted, &["openid"]).is_ok());
        assert_eq!(
            check_required_scopes(&granted, &["profile"]),
            Err(VerifyError::InsufficientScope {
                missing: vec!["profile".to_owned()]
            })
        );
    }

    #[test]
    fn header_decoding_rejects_garbage() {
        assert!(matches!(
            decode_token_header("not-a-jwt"),
            Err(VerifyError::Malformed(_))
        ));
        assert!(matches!(
            decode_token_header("a.b"),
            Err(VerifyError::Malformed(_))
        ));
        assert!(matches!(
            decode_token_header("a.b.c.d"),
            Err(VerifyError::Malformed(_))
        ));
        assert!(matches!(
            decode_token_header("!!!.payload.sig"),
            Err(VerifyError::Malformed(_))
        ));
    }

    #[test]
    fn header_decoding_reads_alg_and_kid() {
        let header = base64_url::encode(r#"{"alg":"RS256","kid":"key-1","typ":"JWT"}"#);
        let parsed = decode_token_header(&format!("{header}.payload.sig")).unwrap();
        assert_eq!(parsed.alg.as_deref(), Some("RS256"));
        assert_eq!(parsed.kid.as_deref(), Some("key-1"));
    }
}
