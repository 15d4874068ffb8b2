use rocket::serde::json::Json;
use rocket::State;
use rocket::futures::TryStreamExt;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::FindOptions;
use validator::Validate;
use crate::db::DbConn;
use crate::db::store::rating_value;
use crate::models::{RatingSummary, UpdateProfileDto, User, UserResponse, EVALUATIONS, POSTS, USERS};
use crate::guards::AuthGuard;
use crate::utils::{ApiResponse, ApiError};

fn db_error(e: mongodb::error::Error) -> ApiError {
    ApiError::internal_error(format!("Database error: {}", e))
}

#[openapi(tag = "User")]
#[get("/user/profile")]
pub async fn get_profile(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let user = db.collection::<User>(USERS)
        .find_one(doc! { "_id": auth.user_id }, None)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    // Ids of every post this user owns
    let options = FindOptions::builder().projection(doc! { "_id": 1 }).build();
    let owned: Vec<Document> = db.collection::<Document>(POSTS)
        .find(doc! { "ownerId": auth.user_id }, options)
        .await
        .map_err(db_error)?
        .try_collect()
        .await
        .map_err(db_error)?;
    let post_ids: Vec<ObjectId> = owned.iter().filter_map(|d| d.get_object_id("_id").ok()).collect();

    let evaluations_written = db.collection::<Document>(EVALUATIONS)
        .count_documents(doc! { "authorUsername": &auth.username }, None)
        .await
        .map_err(db_error)?;

    let options = FindOptions::builder().projection(doc! { "rating": 1 }).build();
    let received: Vec<Document> = db.collection::<Document>(EVALUATIONS)
        .find(doc! { "postId": { "$in": post_ids.clone() } }, options)
        .await
        .map_err(db_error)?
        .try_collect()
        .await
        .map_err(db_error)?;
    let received: Vec<i32> = received.iter().filter_map(rating_value).collect();

    let mut response_data = serde_json::to_value(UserResponse::from(user))
        .map_err(|e| ApiError::internal_error(format!("Serialization error: {}", e)))?;

    response_data["stats"] = serde_json::json!({
        "posts": post_ids.len(),
        "evaluations_written": evaluations_written,
        "rating_received": RatingSummary::from_ratings(&received),
    });

    Ok(Json(ApiResponse::success(response_data)))
}

#[openapi(tag = "User")]
#[put("/user/profile", data = "<dto>")]
pub async fn update_profile(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<UpdateProfileDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()?;

    // Build update document
    let mut update_doc = doc! {
        "updatedAt": DateTime::now()
    };

    if let Some(ref display_name) = dto.display_name {
        update_doc.insert("displayName", display_name);
    }
    if let Some(ref bio) = dto.bio {
        update_doc.insert("bio", bio);
    }

    let result = db.collection::<User>(USERS)
        .update_one(
            doc! { "_id": auth.user_id },
            doc! { "$set": update_doc },
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update profile: {}", e)))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Profile updated successfully"
    }))))
}
