use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;

use crate::services::rating::aggregate;

/// Cached `{rating, ratingCnt}` pair stored on a post.
///
/// Never authoritative: it is always recomputed from the post's current
/// evaluations.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub rating: f64,
    pub rating_cnt: i32,
}

impl RatingSummary {
    pub fn from_ratings(ratings: &[i32]) -> Self {
        if ratings.is_empty() {
            return Self::empty();
        }
        RatingSummary {
            rating: aggregate(ratings),
            rating_cnt: ratings.len() as i32,
        }
    }

    pub fn empty() -> Self {
        RatingSummary {
            rating: 0.0,
            rating_cnt: 0,
        }
    }
}
