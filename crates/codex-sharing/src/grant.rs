//! Signed access grants for password-protected links.
//!
//! Token format: `base64url(link_id|expires_unix_secs|hmac_hex)`. The
//! signature binds the link ID to an expiry, so a grant for one link cannot
//! open another and stops working once it expires.

use crate::ShareError;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A short-lived proof that the share password was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessGrant {
    pub token: String,
    /// Expiry as Unix seconds.
    pub expires_at: i64,
}

fn signature(secret: &[u8], payload: &str) -> Result<HmacSha256, ShareError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| ShareError::AccessDenied)?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Issues a grant for `link_id` valid for `ttl_minutes` from `now`.
pub fn issue_access_grant(
    secret: &[u8],
    link_id: &str,
    ttl_minutes: u64,
    now: i64,
) -> Result<AccessGrant, ShareError> {
    let ttl_secs = i64::try_from(ttl_minutes.saturating_mul(60)).unwrap_or(i64::MAX);
    let expires_at = now.saturating_add(ttl_secs);
    let payload = format!("{}|{}", link_id, expires_at);
    let sig = signature(secret, &payload)?.finalize().into_bytes();

    let token = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(format!("{}|{}", payload, hex::encode(sig)).as_bytes());
    Ok(AccessGrant { token, expires_at })
}

/// Checks that `token` was issued for `link_id` and has not expired.
///
/// # Errors
///
/// Returns [`ShareError::AccessDenied`] for malformed, forged, mismatched
/// or expired grants.
pub fn verify_access_grant(
    secret: &[u8],
    token: &str,
    link_id: &str,
    now: i64,
) -> Result<(), ShareError> {
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| ShareError::AccessDenied)?;
    let token_str = String::from_utf8(decoded).map_err(|_| ShareError::AccessDenied)?;

    // Link IDs are UUIDs, so splitting from the right is unambiguous.
    let mut parts = token_str.rsplitn(3, '|');
    let (Some(sig_hex), Some(expires_str), Some(granted_link)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(ShareError::AccessDenied);
    };

    let provided = hex::decode(sig_hex).map_err(|_| ShareError::AccessDenied)?;
    signature(secret, &format!("{}|{}", granted_link, expires_str))?
        .verify_slice(&provided)
        .map_err(|_| ShareError::AccessDenied)?;

    if granted_link != link_id {
        return Err(ShareError::AccessDenied);
    }
    let expires: i64 = expires_str.parse().map_err(|_| ShareError::AccessDenied)?;
    if now >= expires {
        return Err(ShareError::AccessDenied);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-with-enough-entropy!";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn grant_verifies_until_expiry() {
        let grant = issue_access_grant(SECRET, "link-1", 60, NOW).unwrap();
        assert_eq!(grant.expires_at, NOW + 3_600);
        assert!(verify_access_grant(SECRET, &grant.token, "link-1", NOW + 10).is_ok());
        assert!(matches!(
            verify_access_grant(SECRET, &grant.token, "link-1", NOW + 3_600),
            Err(ShareError::AccessDenied)
        ));
    }

    #[test]
    fn grant_is_bound_to_link_and_secret() {
        let grant = issue_access_grant(SECRET, "link-1", 60, NOW).unwrap();
        assert!(verify_access_grant(SECRET, &grant.token, "link-2", NOW).is_err());
        assert!(verify_access_grant(b"other-secret", &grant.token, "link-1", NOW).is_err());
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let forged = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(format!("link-1|{}|{}", NOW + 99_999, "00".repeat(32)));
        assert!(verify_access_grant(SECRET, &forged, "link-1", NOW).is_err());
        assert!(verify_access_grant(SECRET, "not base64!", "link-1", NOW).is_err());
        assert!(verify_access_grant(SECRET, "", "link-1", NOW).is_err());
    }
}
