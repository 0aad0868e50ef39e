//! Identity token validation: decrypt, verify the nested signature, check claims.

use super::error::VerifyError;
use super::key_set::KeySetCache;
use crate::claims::{IdentityTokenClaims, is_expired, unix_now};
use crate::keys::EncryptionKeyManager;

/// What a valid identity token must assert.
#[derive(Debug, Clone, Copy)]
pub struct Expectations<'a> {
    /// Required `iss`.
    pub issuer: &'a str,
    /// Must be among `aud`.
    pub client_id: &'a str,
    /// Required `nonce`, echoed from the pushed request.
    pub nonce: &'a str,
    /// Seconds of clock skew tolerated on `exp`.
    pub leeway: u64,
}

/// Open and validate an encrypted identity token.
pub async fn validate(
    encrypted: &str,
    decryptor: &EncryptionKeyManager,
    keys: &KeySetCache,
    expect: Expectations<'_>,
) -> Result<IdentityTokenClaims, VerifyError> {
    let nested = decryptor
        .decrypt(encrypted)
        .map_err(|_| VerifyError::DecryptionFailed)?;
    let nested = std::str::from_utf8(&nested)
        .map_err(|_| VerifyError::Malformed("identity token is not UTF-8".to_string()))?;

    let payload = keys.verify(nested).await?;
    let claims: IdentityTokenClaims = serde_json::from_slice(&payload)
        .map_err(|e| VerifyError::Malformed(format!("identity token claims: {e}")))?;

    check_claims(&claims, expect, unix_now())?;
    Ok(claims)
}

fn check_claims(
    claims: &IdentityTokenClaims,
    expect: Expectations<'_>,
    now: u64,
) -> Result<(), VerifyError> {
    if claims.iss != expect.issuer {
        return Err(VerifyError::IssuerMismatch {
            expected: expect.issuer.to_string(),
            actual: claims.iss.clone(),
        });
    }
    if !claims.aud.contains(expect.client_id) {
        return Err(VerifyError::AudienceMismatch(expect.client_id.to_string()));
    }
    if is_expired(claims.exp, now, expect.leeway) {
        return Err(VerifyError::TokenExpired);
    }
    if claims.sub.as_deref().is_none_or(str::is_empty) {
        return Err(VerifyError::MissingSubject);
    }
    if claims.nonce.as_deref() != Some(expect.nonce) {
        return Err(VerifyError::NonceMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Audience;

    const EXPECT: Expectations<'static> = Expectations {
        issuer: "http://issuer.test",
        client_id: "portfolio-api",
        nonce: "n-1",
        leeway: 60,
    };

    fn claims() -> IdentityTokenClaims {
        IdentityTokenClaims {
            iss: "http://issuer.test".into(),
            sub: Some("portfolio-api".into()),
            aud: Audience::from("portfolio-api"),
            jti: "jti-1".into(),
            iat: 1_000,
            exp: 2_000,
            nonce: Some("n-1".into()),
        }
    }

    #[test]
    fn valid_claims_pass() {
        assert!(check_claims(&claims(), EXPECT, 1_500).is_ok());
    }

    #[test]
    fn expiry_allows_leeway() {
        // GIVEN: exp=2000 and 60s leeway
        // THEN: 2059 passes, 2060 fails
        assert!(check_claims(&claims(), EXPECT, 2_059).is_ok());
        assert!(matches!(
            check_claims(&claims(), EXPECT, 2_060),
            Err(VerifyError::TokenExpired)
        ));
    }

    #[test]
    fn each_claim_mismatch_has_its_own_error() {
        let mut wrong_iss = claims();
        wrong_iss.iss = "http://evil.test".into();
        assert!(matches!(
            check_claims(&wrong_iss, EXPECT, 1_500),
            Err(VerifyError::IssuerMismatch { .. })
        ));

        let mut wrong_aud = claims();
        wrong_aud.aud = Audience::Multiple(vec!["other".into()]);
        assert!(matches!(
            check_claims(&wrong_aud, EXPECT, 1_500),
            Err(VerifyError::AudienceMismatch(_))
        ));

        let mut no_sub = claims();
        no_sub.sub = None;
        assert!(matches!(
            check_claims(&no_sub, EXPECT, 1_500),
            Err(VerifyError::MissingSubject)
        ));

        let mut wrong_nonce = claims();
        wrong_nonce.nonce = Some("replayed".into());
        assert!(matches!(
            check_claims(&wrong_nonce, EXPECT, 1_500),
            Err(VerifyError::NonceMismatch)
        ));
    }

    #[tokio::test]
    async fn foreign_ciphertext_fails_decryption() {
        // GIVEN: a token sealed for someone else's key
        let ours = EncryptionKeyManager::generate("enc").unwrap();
        let theirs = EncryptionKeyManager::generate("enc").unwrap();
        let token = theirs.encrypt(b"header.payload.sig", Some("JWT")).unwrap();
        let keys = KeySetCache::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/jwks".into(),
            std::time::Duration::from_secs(60),
        );

        // THEN: decryption fails before any key fetch
        let result = validate(&token, &ours, &keys, EXPECT).await;
        assert!(matches!(result, Err(VerifyError::DecryptionFailed)));
        assert_eq!(keys.generation(), 0);
    }
}
