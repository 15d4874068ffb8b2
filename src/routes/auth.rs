use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime, oid::ObjectId};
use mongodb::error::{ErrorKind, WriteFailure};
use validator::Validate;
use crate::db::DbConn;
use crate::models::{LoginDto, RegisterDto, User, UserResponse, USERS};
use crate::services::{JwtService, PasswordService};
use crate::utils::{validate_username, ApiResponse, ApiError};

const LOGIN_WINDOW_MS: i64 = 10 * 60 * 1000;
const LOGIN_LIMIT: i32 = 5;
const REFRESH_LIMIT: i32 = 10;
const REFRESH_WINDOW_MS: i64 = 60 * 1000;
const DUPLICATE_KEY: i32 = 11000;

/// --------------------
/// Rate limiter helper
/// --------------------
async fn rate_limit(
    db: &DbConn,
    key: &str,
    limit: i32,
    window_ms: i64,
) -> Result<(), ApiError> {
    let now = chrono::Utc::now().timestamp_millis();
    let window_expires = DateTime::from_millis(now + window_ms);

    let collection = db.collection::<mongodb::bson::Document>("rate_limits");

    let doc = collection
        .find_one(doc! { "key": key }, None)
        .await
        .map_err(|_| ApiError::internal_error("Rate limiter lookup failed"))?;

    match doc {
        // First request
        None => {
            collection
                .insert_one(
                    doc! {
                        "key": key,
                        "count": 1,
                        "expires_at": window_expires
                    },
                    None,
                )
                .await
                .map_err(|_| ApiError::internal_error("Rate limiter insert failed"))?;
            Ok(())
        }

        Some(d) => {
            let count = d.get_i32("count").unwrap_or(0);
            let expires_at = d.get_datetime("expires_at").ok();

            // Window expired → reset
            if expires_at.map(|e| *e < DateTime::now()).unwrap_or(true) {
                collection
                    .update_one(
                        doc! { "key": key },
                        doc! {
                            "$set": {
                                "count": 1,
                                "expires_at": window_expires
                            }
                        },
                        None,
                    )
                    .await
                    .map_err(|_| ApiError::internal_error("Rate limiter reset failed"))?;
                return Ok(());
            }

            if count >= limit {
                return Err(ApiError::too_many_requests(
                    "Too many requests. Please try later.",
                ));
            }

            collection
                .update_one(
                    doc! { "key": key },
                    doc! { "$inc": { "count": 1 } },
                    None,
                )
                .await
                .map_err(|_| ApiError::internal_error("Rate limiter increment failed"))?;

            Ok(())
        }
    }
}

/// Usernames are case-sensitive, so each spelling is throttled on its own.
fn login_rate_key(username: &str) -> String {
    format!("login:{}", username)
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

fn issue_tokens(user_id: &ObjectId, username: &str) -> Result<(String, String), ApiError> {
    let access_token = JwtService::generate_access_token(user_id, username)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    let refresh_token = JwtService::generate_refresh_token(user_id, username)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    Ok((access_token, refresh_token))
}

/// --------------------
/// Register
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<dto>")]
pub async fn register(
    db: &State<DbConn>,
    dto: Json<RegisterDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if !validate_username(&dto.username) {
        return Err(ApiError::bad_request(
            "Username must be 3-30 letters, digits, '_' or '.'",
        ));
    }
    dto.validate()?;

    let password_hash = PasswordService::hash_password(dto.password.clone())
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to hash password: {}", e)))?;

    let now = DateTime::now();
    let mut user = User {
        id: None,
        username: dto.username.clone(),
        password_hash,
        display_name: dto.display_name.clone(),
        bio: None,
        is_active: true,
        last_login_at: now,
        created_at: now,
        updated_at: now,
    };

    let res = db.collection::<User>(USERS)
        .insert_one(&user, None)
        .await
        .map_err(|e| {
            if is_duplicate_key(&e) {
                ApiError::conflict("Username is already taken")
            } else {
                ApiError::internal_error(e.to_string())
            }
        })?;

    let user_id = res.inserted_id.as_object_id()
        .ok_or_else(|| ApiError::internal_error("Invalid user ID"))?;
    user.id = Some(user_id);

    let (access_token, refresh_token) = issue_tokens(&user_id, &user.username)?;

    info!("New user registered: {}", user.username);

    Ok(Json(ApiResponse::success_with_message(
        "Registration successful".to_string(),
        serde_json::json!({
            "user": UserResponse::from(user),
            "accessToken": access_token,
            "refreshToken": refresh_token
        }),
    )))
}

/// --------------------
/// Login
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<dto>")]
pub async fn login(
    db: &State<DbConn>,
    dto: Json<LoginDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    rate_limit(db, &login_rate_key(&dto.username), LOGIN_LIMIT, LOGIN_WINDOW_MS).await?;

    let user = db.collection::<User>(USERS)
        .find_one(doc! { "username": &dto.username }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

    if !PasswordService::verify_password(dto.password.clone(), user.password_hash.clone()).await {
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let user_id = user.id
        .ok_or_else(|| ApiError::internal_error("Stored user has no ID"))?;

    db.collection::<User>(USERS)
        .update_one(
            doc! { "_id": user_id },
            doc! { "$set": { "lastLoginAt": DateTime::now() } },
            None,
        )
        .await
        .ok();

    let (access_token, refresh_token) = issue_tokens(&user_id, &user.username)?;

    Ok(Json(ApiResponse::success_with_message(
        "Login successful".to_string(),
        serde_json::json!({
            "user": UserResponse::from(user),
            "accessToken": access_token,
            "refreshToken": refresh_token
        }),
    )))
}

/// --------------------
/// Silent Refresh Token
/// --------------------
#[derive(serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct RefreshTokenDto {
    pub refresh_token: String,
}

#[openapi(tag = "Auth")]
#[post("/auth/refresh", data = "<dto>")]
pub async fn refresh_token(
    db: &State<DbConn>,
    dto: Json<RefreshTokenDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let claims = JwtService::verify_token(&dto.refresh_token, true)
        .map_err(|_| ApiError::unauthorized("Invalid refresh token"))?;

    rate_limit(
        db,
        &format!("refresh:{}", claims.sub),
        REFRESH_LIMIT,
        REFRESH_WINDOW_MS,
    ).await?;

    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| ApiError::unauthorized("Invalid user id in token"))?;

    let access = JwtService::generate_access_token(&user_id, &claims.username)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "accessToken": access
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_throttle_is_per_exact_username() {
        assert_eq!(login_rate_key("bob"), "login:bob");
        assert_ne!(login_rate_key("Bob"), login_rate_key("bob"));
    }
}
