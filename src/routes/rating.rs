use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use crate::db::Ratings;
use crate::guards::AuthGuard;
use crate::utils::{ApiResponse, ApiError};

/// Rewrites the cached summary of every evaluated post from scratch.
#[openapi(tag = "Rating")]
#[post("/ratings/recompute")]
pub async fn recompute_ratings(
    ratings: &State<Ratings>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    info!("Rating sweep requested by {}", auth.username);

    let written = ratings.recompute_all().await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "posts_updated": written
    }))))
}
