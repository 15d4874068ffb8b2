use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime};
use mongodb::options::FindOptions;
use validator::Validate;
use crate::db::{DbConn, Ratings};
use crate::models::{
    CreateEvaluationDto, Evaluation, EvaluationResponse, Post, UpdateEvaluationDto,
    EVALUATIONS, POSTS,
};
use crate::guards::AuthGuard;
use crate::utils::{page_skip, parse_object_id, ApiResponse, ApiError};
use rocket::futures::TryStreamExt;

async fn find_owned_evaluation(
    db: &DbConn,
    auth: &AuthGuard,
    evaluation_id: &str,
) -> Result<Evaluation, ApiError> {
    let object_id = parse_object_id(evaluation_id, "evaluation")?;

    let evaluation = db.collection::<Evaluation>(EVALUATIONS)
        .find_one(doc! { "_id": object_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Evaluation not found"))?;

    if evaluation.author_username != auth.username {
        return Err(ApiError::forbidden("Not authorized to change this evaluation"));
    }

    Ok(evaluation)
}

#[openapi(tag = "Evaluation")]
#[post("/evaluation/create", data = "<dto>")]
pub async fn create_evaluation(
    db: &State<DbConn>,
    ratings: &State<Ratings>,
    auth: AuthGuard,
    dto: Json<CreateEvaluationDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()?;

    let post_id = parse_object_id(&dto.post_id, "post")?;

    // Check if post exists
    db.collection::<Post>(POSTS)
        .find_one(doc! { "_id": post_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    // Several evaluations per author and post are allowed
    let now = DateTime::now();
    let evaluation = Evaluation {
        id: None,
        post_id,
        author_username: auth.username.clone(),
        rating: dto.rating,
        comment: dto.comment.trim().to_string(),
        created_at: now,
        updated_at: now,
    };

    let result = db.collection::<Evaluation>(EVALUATIONS)
        .insert_one(&evaluation, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to create evaluation: {}", e)))?;

    let evaluation_id = result.inserted_id.as_object_id()
        .ok_or_else(|| ApiError::internal_error("Invalid evaluation ID"))?;

    ratings.refresh_post(post_id).await;

    Ok(Json(ApiResponse::success_with_message(
        "Evaluation submitted successfully".to_string(),
        serde_json::json!({
            "evaluation_id": evaluation_id.to_hex()
        }),
    )))
}

#[openapi(tag = "Evaluation")]
#[put("/evaluation/<evaluation_id>", data = "<dto>")]
pub async fn update_evaluation(
    db: &State<DbConn>,
    ratings: &State<Ratings>,
    auth: AuthGuard,
    evaluation_id: String,
    dto: Json<UpdateEvaluationDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()?;

    let evaluation = find_owned_evaluation(db, &auth, &evaluation_id).await?;

    let mut update_doc = doc! {
        "updatedAt": DateTime::now()
    };
    if let Some(rating) = dto.rating {
        update_doc.insert("rating", rating);
    }
    if let Some(ref comment) = dto.comment {
        update_doc.insert("comment", comment.trim());
    }

    db.collection::<Evaluation>(EVALUATIONS)
        .update_one(
            doc! { "_id": evaluation.id },
            doc! { "$set": update_doc },
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update evaluation: {}", e)))?;

    if dto.rating.is_some() {
        ratings.refresh_post(evaluation.post_id).await;
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Evaluation updated successfully"
    }))))
}

#[openapi(tag = "Evaluation")]
#[delete("/evaluation/<evaluation_id>")]
pub async fn delete_evaluation(
    db: &State<DbConn>,
    ratings: &State<Ratings>,
    auth: AuthGuard,
    evaluation_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let evaluation = find_owned_evaluation(db, &auth, &evaluation_id).await?;

    db.collection::<Evaluation>(EVALUATIONS)
        .delete_one(doc! { "_id": evaluation.id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to delete evaluation: {}", e)))?;

    // The last evaluation going away resets the post to 0.0 / 0
    ratings.refresh_post(evaluation.post_id).await;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Evaluation deleted successfully"
    }))))
}

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct PostEvaluationsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PostEvaluationsQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(20).clamp(1, 100)
    }

    pub fn skip(&self) -> u64 {
        page_skip(self.page(), self.limit())
    }
}

#[openapi(tag = "Evaluation")]
#[get("/evaluation/post/<post_id>?<query..>")]
pub async fn get_post_evaluations(
    db: &State<DbConn>,
    post_id: String,
    query: PostEvaluationsQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = query.page();
    let limit = query.limit();

    let object_id = parse_object_id(&post_id, "post")?;
    let filter = doc! { "postId": object_id };

    let find_options = FindOptions::builder()
        .skip(query.skip())
        .limit(limit)
        .sort(doc! { "createdAt": -1 })
        .build();

    let evaluations: Vec<Evaluation> = db.collection::<Evaluation>(EVALUATIONS)
        .find(filter.clone(), find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Collection error: {}", e)))?;

    let total = db.collection::<Evaluation>(EVALUATIONS)
        .count_documents(filter, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Count error: {}", e)))?;

    let evaluations: Vec<EvaluationResponse> =
        evaluations.into_iter().map(EvaluationResponse::from).collect();

    Ok(Json(ApiResponse::success(serde_json::json!({
        "evaluations": evaluations,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "pages": (total as f64 / limit as f64).ceil() as i64,
        }
    }))))
}
