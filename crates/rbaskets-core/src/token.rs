use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::models::Auth;

/// Issue a fresh, unpredictable basket token (32 hex characters of v4 UUID).
pub fn generate_auth() -> Auth {
    Auth {
        token: Uuid::new_v4().simple().to_string(),
    }
}

/// Constant-time comparison of a presented token against the stored one.
pub fn tokens_match(presented: &str, stored: &str) -> bool {
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}
