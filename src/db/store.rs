use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use mongodb::options::FindOptions;
use mongodb::Database;
use log::warn;
use rocket::futures::TryStreamExt;

use crate::models::{RatingSummary, EVALUATIONS, POSTS};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

/// Reads evaluations and writes the cached rating summary onto posts.
#[rocket::async_trait]
pub trait RatingStore: Send + Sync {
    async fn ratings_for_post(&self, post_id: &ObjectId) -> Result<Vec<i32>, StoreError>;

    /// Every post id referenced by at least one evaluation.
    async fn evaluated_post_ids(&self) -> Result<Vec<ObjectId>, StoreError>;

    async fn write_summary(&self, post_id: &ObjectId, summary: &RatingSummary) -> Result<(), StoreError>;
}

pub struct MongoRatingStore {
    db: Database,
}

impl MongoRatingStore {
    pub fn new(db: Database) -> Self {
        MongoRatingStore { db }
    }
}

/// Reads the integer 0-5 rating of a stored evaluation.
///
/// Mobile clients writing straight to the store may save ratings as doubles;
/// whole doubles are accepted, fractional or out-of-range values are skipped.
pub fn rating_value(doc: &Document) -> Option<i32> {
    let value = match doc.get("rating")? {
        Bson::Int32(v) => i64::from(*v),
        Bson::Int64(v) => *v,
        Bson::Double(v) if v.is_finite() && v.fract() == 0.0 => *v as i64,
        other => {
            warn!("Skipping evaluation with unusable rating {:?}", other);
            return None;
        }
    };

    if (0..=5).contains(&value) {
        Some(value as i32)
    } else {
        warn!("Skipping evaluation with out-of-range rating {}", value);
        None
    }
}

#[rocket::async_trait]
impl RatingStore for MongoRatingStore {
    async fn ratings_for_post(&self, post_id: &ObjectId) -> Result<Vec<i32>, StoreError> {
        let options = FindOptions::builder()
            .projection(doc! { "rating": 1 })
            .build();

        let docs: Vec<Document> = self.db.collection::<Document>(EVALUATIONS)
            .find(doc! { "postId": post_id }, options)
            .await?
            .try_collect()
            .await?;

        Ok(docs.iter().filter_map(rating_value).collect())
    }

    async fn evaluated_post_ids(&self) -> Result<Vec<ObjectId>, StoreError> {
        let ids = self.db.collection::<Document>(EVALUATIONS)
            .distinct("postId", None, None)
            .await?;

        Ok(ids.iter().filter_map(Bson::as_object_id).collect())
    }

    async fn write_summary(&self, post_id: &ObjectId, summary: &RatingSummary) -> Result<(), StoreError> {
        self.db.collection::<Document>(POSTS)
            .update_one(
                doc! { "_id": post_id },
                doc! {
                    "$set": {
                        "rating": summary.rating,
                        "ratingCnt": summary.rating_cnt,
                        "updatedAt": DateTime::now()
                    }
                },
                None,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_ratings_of_any_numeric_type() {
        assert_eq!(rating_value(&doc! { "rating": 4 }), Some(4));
        assert_eq!(rating_value(&doc! { "rating": 3_i64 }), Some(3));
        assert_eq!(rating_value(&doc! { "rating": 5.0 }), Some(5));
    }

    #[test]
    fn skips_missing_or_garbage_ratings() {
        assert_eq!(rating_value(&doc! {}), None);
        assert_eq!(rating_value(&doc! { "rating": "five" }), None);
        assert_eq!(rating_value(&doc! { "rating": f64::NAN }), None);
    }

    #[test]
    fn skips_ratings_outside_zero_to_five() {
        assert_eq!(rating_value(&doc! { "rating": 9 }), None);
        assert_eq!(rating_value(&doc! { "rating": -1 }), None);
        assert_eq!(rating_value(&doc! { "rating": 6_i64 }), None);
        assert_eq!(rating_value(&doc! { "rating": 5.0e12 }), None);
        assert_eq!(rating_value(&doc! { "rating": 0 }), Some(0));
    }

    #[test]
    fn fractional_doubles_are_not_rounded_in() {
        assert_eq!(rating_value(&doc! { "rating": 4.5 }), None);

        let docs = [doc! { "rating": 9 }, doc! { "rating": 5 }, doc! { "rating": 4.5 }];
        let ratings: Vec<i32> = docs.iter().filter_map(rating_value).collect();
        assert_eq!(ratings, vec![5]);
        assert_eq!(crate::services::rating::aggregate(&ratings), 5.0);
    }
}
