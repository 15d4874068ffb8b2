use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

pub const EVALUATIONS: &str = "jobEval";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub post_id: ObjectId,
    pub author_username: String,
    pub rating: i32, // 0-5
    #[serde(default)]
    pub comment: String,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreateEvaluationDto {
    pub post_id: String,
    #[validate(range(min = 0, max = 5, message = "Rating must be between 0 and 5"))]
    pub rating: i32,
    #[serde(default)]
    #[validate(length(max = 1000, message = "Comment is too long"))]
    pub comment: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UpdateEvaluationDto {
    #[validate(range(min = 0, max = 5, message = "Rating must be between 0 and 5"))]
    pub rating: Option<i32>,
    #[validate(length(max = 1000, message = "Comment is too long"))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct EvaluationResponse {
    pub id: String,
    pub post_id: String,
    pub author_username: String,
    pub rating: i32,
    pub comment: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Evaluation> for EvaluationResponse {
    fn from(evaluation: Evaluation) -> Self {
        EvaluationResponse {
            id: evaluation.id.map(|id| id.to_hex()).unwrap_or_default(),
            post_id: evaluation.post_id.to_hex(),
            author_username: evaluation.author_username,
            rating: evaluation.rating,
            comment: evaluation.comment,
            created_at: evaluation.created_at.try_to_rfc3339_string().unwrap_or_default(),
            updated_at: evaluation.updated_at.try_to_rfc3339_string().unwrap_or_default(),
        }
    }
}
