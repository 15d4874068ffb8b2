use jsonwebtoken::{encode, decode, Header, Validation, EncodingKey, DecodingKey};
use serde::{Deserialize, Serialize};
use mongodb::bson::oid::ObjectId;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // User ID
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtService;

impl JwtService {
    pub fn generate_access_token(user_id: &ObjectId, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let secret = crate::config::Config::jwt_secret();
        Self::sign(user_id, username, &secret, crate::config::Config::jwt_expiry())
    }

    pub fn generate_refresh_token(user_id: &ObjectId, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let secret = crate::config::Config::jwt_refresh_secret();
        Self::sign(user_id, username, &secret, crate::config::Config::jwt_refresh_expiry())
    }

    pub fn verify_token(token: &str, is_refresh: bool) -> Result<Claims, jsonwebtoken::errors::Error> {
        let secret = if is_refresh {
            crate::config::Config::jwt_refresh_secret()
        } else {
            crate::config::Config::jwt_secret()
        };
        Self::decode_with(token, &secret)
    }

    fn sign(user_id: &ObjectId, username: &str, secret: &str, ttl_secs: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp();

        let claims = Claims {
            sub: user_id.to_hex(),
            username: username.to_string(),
            exp: now + ttl_secs,
            iat: now,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    fn decode_with(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_claims() {
        let user_id = ObjectId::new();
        let token = JwtService::sign(&user_id, "amara", "s3cret", 60).unwrap();

        let claims = JwtService::decode_with(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, user_id.to_hex());
        assert_eq!(claims.username, "amara");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = JwtService::sign(&ObjectId::new(), "amara", "access-secret", 60).unwrap();
        assert!(JwtService::decode_with(&token, "refresh-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        // past the default 60s leeway
        let token = JwtService::sign(&ObjectId::new(), "amara", "s3cret", -600).unwrap();
        assert!(JwtService::decode_with(&token, "s3cret").is_err());
    }
}
