use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::{Validate, ValidationError};

pub const USERS: &str = "users";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub username: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub is_active: bool,
    pub last_login_at: DateTime,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct RegisterDto {
    pub username: String,
    #[validate(
        length(min = 8, message = "Password must be at least 8 characters"),
        custom = "validate_password_bytes"
    )]
    pub password: String,
    #[validate(length(max = 60))]
    pub display_name: Option<String>,
}

/// bcrypt only reads the first 72 bytes of a password.
fn validate_password_bytes(password: &str) -> Result<(), ValidationError> {
    if password.len() > 72 {
        let mut err = ValidationError::new("password_bytes");
        err.message = Some("Password must be at most 72 bytes".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LoginDto {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UpdateProfileDto {
    #[validate(length(max = 60))]
    pub display_name: Option<String>,
    #[validate(length(max = 500))]
    pub bio: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            username: user.username,
            display_name: user.display_name,
            bio: user.bio,
        }
    }
}
