use rocket::request::{self, FromRequest, Request, Outcome};
use rocket::http::Status;
use mongodb::bson::oid::ObjectId;

use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use rocket_okapi::r#gen::OpenApiGenerator;

use crate::services::JwtService;

/// JWT-based authentication guard. Only access tokens are accepted.
pub struct AuthGuard {
    pub user_id: ObjectId,
    pub username: String,
}

impl AuthGuard {
    fn from_header(header: &str) -> Option<AuthGuard> {
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        let claims = JwtService::verify_token(token, false).ok()?;
        let user_id = ObjectId::parse_str(&claims.sub).ok()?;

        Some(AuthGuard {
            user_id,
            username: claims.username,
        })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.headers().get_one("Authorization").and_then(AuthGuard::from_header) {
            Some(guard) => Outcome::Success(guard),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for AuthGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        // The guard doesn't contribute any special header/parameter for docs
        Ok(RequestHeaderInput::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bearer_access_token() {
        let user_id = ObjectId::new();
        let token = JwtService::generate_access_token(&user_id, "lena").unwrap();

        let guard = AuthGuard::from_header(&format!("Bearer {}", token)).unwrap();
        assert_eq!(guard.user_id, user_id);
        assert_eq!(guard.username, "lena");
    }

    #[test]
    fn rejects_refresh_token_as_access() {
        let token = JwtService::generate_refresh_token(&ObjectId::new(), "lena").unwrap();
        assert!(AuthGuard::from_header(&format!("Bearer {}", token)).is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(AuthGuard::from_header("Bearer not.a.jwt").is_none());
        assert!(AuthGuard::from_header("").is_none());
    }
}
