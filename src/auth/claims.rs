use serde::{Deserialize, Serialize};

/// Schema version stamped into every token; anything else is rejected as malformed.
pub const CLAIMS_VERSION: u16 = 1;

/// What a token may be used for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenPurpose {
    Session,
    /// Pending registration: the account is created from these claims on verification.
    EmailVerification { password_hash: String },
    PasswordReset,
}

/// JWT payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub ver: u16,       // schema version
    pub sub: String,    // user email
    pub iat: i64,       // issued at (unix timestamp)
    pub exp: i64,       // expires at (unix timestamp)
    pub iss: String,    // issuer
    pub aud: String,    // audience
    #[serde(flatten)]
    pub purpose: TokenPurpose,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verification_claims_carry_tag_and_hash() {
        let claims = Claims {
            ver: CLAIMS_VERSION,
            sub: "a@x.com".into(),
            iat: 10,
            exp: 20,
            iss: "iss".into(),
            aud: "aud".into(),
            purpose: TokenPurpose::EmailVerification {
                password_hash: "$argon2id$h".into(),
            },
        };
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["kind"], "email_verification");
        assert_eq!(value["password_hash"], "$argon2id$h");
        assert_eq!(value["ver"], 1);
    }

    #[test]
    fn unknown_kind_does_not_parse() {
        let value = json!({
            "ver": 1, "sub": "a@x.com", "iat": 1, "exp": 2,
            "iss": "i", "aud": "a", "kind": "refresh"
        });
        assert!(serde_json::from_value::<Claims>(value).is_err());
    }

    #[test]
    fn verification_without_hash_does_not_parse() {
        let value = json!({
            "ver": 1, "sub": "a@x.com", "iat": 1, "exp": 2,
            "iss": "i", "aud": "a", "kind": "email_verification"
        });
        assert!(serde_json::from_value::<Claims>(value).is_err());
    }
}
