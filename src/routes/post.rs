use rocket::serde::json::Json;
use rocket::State;
use rocket::futures::TryStreamExt;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime};
use mongodb::options::FindOptions;
use validator::Validate;
use crate::db::{DbConn, Ratings};
use crate::models::{CreatePostDto, Post, PostQuery, PostResponse, EVALUATIONS, POSTS};
use crate::guards::AuthGuard;
use crate::utils::{parse_object_id, ApiResponse, ApiError};

/// Final step of the new-task wizard: the completed form becomes a post.
#[openapi(tag = "Post")]
#[post("/post/create", data = "<dto>")]
pub async fn create_post(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<CreatePostDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()?;
    let dto = dto.into_inner();

    let now = DateTime::now();
    let post = Post {
        id: None,
        title: dto.title.trim().to_string(),
        price: dto.price,
        description: dto.description,
        images: dto.images,
        location: dto.location,
        date: dto.date,
        offering: dto.offering,
        owner_id: auth.user_id,
        owner_username: auth.username,
        rating: 0.0,
        rating_cnt: 0,
        created_at: now,
        updated_at: now,
    };

    let result = db.collection::<Post>(POSTS)
        .insert_one(&post, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to create post: {}", e)))?;

    let post_id = result.inserted_id.as_object_id()
        .ok_or_else(|| ApiError::internal_error("Invalid post ID"))?;

    Ok(Json(ApiResponse::success_with_message(
        "Post created successfully".to_string(),
        serde_json::json!({
            "post_id": post_id.to_hex()
        }),
    )))
}

#[openapi(tag = "Post")]
#[get("/post/list?<query..>")]
pub async fn list_posts(
    db: &State<DbConn>,
    query: PostQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = query.page();
    let limit = query.limit();
    let filter = query.filter();

    let find_options = FindOptions::builder()
        .skip(query.skip())
        .limit(limit)
        .sort(query.sort())
        .build();

    let posts: Vec<Post> = db.collection::<Post>(POSTS)
        .find(filter.clone(), find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Collection error: {}", e)))?;

    let total = db.collection::<Post>(POSTS)
        .count_documents(filter, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Count error: {}", e)))?;

    let posts: Vec<PostResponse> = posts.into_iter().map(PostResponse::from).collect();

    Ok(Json(ApiResponse::success(serde_json::json!({
        "posts": posts,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "pages": (total as f64 / limit as f64).ceil() as i64,
        }
    }))))
}

#[openapi(tag = "Post")]
#[get("/post/<post_id>")]
pub async fn get_post(
    db: &State<DbConn>,
    post_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = parse_object_id(&post_id, "post")?;

    let post = db.collection::<Post>(POSTS)
        .find_one(doc! { "_id": object_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    Ok(Json(ApiResponse::success(serde_json::json!(PostResponse::from(post)))))
}

/// Current aggregate over the post's evaluations, computed on the spot and
/// not written back. May differ briefly from the cached summary on the post.
#[openapi(tag = "Post")]
#[get("/post/<post_id>/rating")]
pub async fn get_post_rating(
    ratings: &State<Ratings>,
    post_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = parse_object_id(&post_id, "post")?;

    let summary = ratings.live_rating(&object_id).await?;

    Ok(Json(ApiResponse::success(serde_json::json!(summary))))
}

#[openapi(tag = "Post")]
#[delete("/post/<post_id>")]
pub async fn delete_post(
    db: &State<DbConn>,
    auth: AuthGuard,
    post_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = parse_object_id(&post_id, "post")?;

    let post = db.collection::<Post>(POSTS)
        .find_one(doc! { "_id": object_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    if post.owner_id != auth.user_id {
        return Err(ApiError::forbidden("Not authorized to delete this post"));
    }

    db.collection::<Post>(POSTS)
        .delete_one(doc! { "_id": object_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to delete post: {}", e)))?;

    let removed = db.collection::<mongodb::bson::Document>(EVALUATIONS)
        .delete_many(doc! { "postId": object_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to delete evaluations: {}", e)))?;

    info!(
        "Post {} deleted by {} with {} evaluations",
        post_id, auth.username, removed.deleted_count
    );

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Post deleted successfully"
    }))))
}
