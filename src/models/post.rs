use mongodb::bson::{doc, oid::ObjectId, DateTime, Document, Regex};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use super::RatingSummary;
use crate::utils::page_skip;

pub const POSTS: &str = "posts";

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct PostLocation {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    pub price: f64,
    pub description: String,
    pub images: Vec<String>,
    pub location: Option<PostLocation>,
    pub date: Option<String>, // day the job takes place, as entered
    /// `true` when a tasker offers a service, `false` when a seeker asks for one.
    pub offering: bool,
    pub owner_id: ObjectId,
    pub owner_username: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub rating_cnt: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreatePostDto {
    #[validate(length(min = 1, max = 120, message = "Title must be 1-120 characters"))]
    pub title: String,
    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: f64,
    #[serde(default)]
    #[validate(length(max = 5000, message = "Description is too long"))]
    pub description: String,
    #[serde(default)]
    #[validate(length(max = 10, message = "At most 10 images per post"))]
    pub images: Vec<String>,
    pub location: Option<PostLocation>,
    pub date: Option<String>,
    pub offering: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PostResponse {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub description: String,
    pub images: Vec<String>,
    pub location: Option<PostLocation>,
    pub date: Option<String>,
    pub offering: bool,
    pub owner_username: String,
    pub rating: RatingSummary,
    pub created_at: String,
}

impl From<Post> for PostResponse {
    fn from(post: Post) -> Self {
        PostResponse {
            id: post.id.map(|id| id.to_hex()).unwrap_or_default(),
            title: post.title,
            price: post.price,
            description: post.description,
            images: post.images,
            location: post.location,
            date: post.date,
            offering: post.offering,
            owner_username: post.owner_username,
            rating: RatingSummary {
                rating: post.rating,
                rating_cnt: post.rating_cnt,
            },
            created_at: post.created_at.try_to_rfc3339_string().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, FromForm, Deserialize, JsonSchema)]
pub struct PostQuery {
    pub offering: Option<bool>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub search: Option<String>,
    /// `newest` (default), `price_asc`, `price_desc` or `rating`.
    pub sort: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PostQuery {
    pub fn filter(&self) -> Document {
        let mut filter = Document::new();

        if let Some(offering) = self.offering {
            filter.insert("offering", offering);
        }

        let mut price = Document::new();
        if let Some(min) = self.min_price {
            price.insert("$gte", min);
        }
        if let Some(max) = self.max_price {
            price.insert("$lte", max);
        }
        if !price.is_empty() {
            filter.insert("price", price);
        }

        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = Regex {
                pattern: regex::escape(search),
                options: "i".to_string(),
            };
            filter.insert(
                "$or",
                vec![
                    doc! { "title": pattern.clone() },
                    doc! { "description": pattern },
                ],
            );
        }

        filter
    }

    pub fn sort(&self) -> Document {
        match self.sort.as_deref() {
            Some("price_asc") => doc! { "price": 1, "createdAt": -1 },
            Some("price_desc") => doc! { "price": -1, "createdAt": -1 },
            Some("rating") => doc! { "rating": -1, "ratingCnt": -1 },
            _ => doc! { "createdAt": -1 },
        }
    }

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
