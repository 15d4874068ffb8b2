use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use mongodb::bson::{oid::ObjectId, Document};
use mongodb::change_stream::event::OperationType;
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use mongodb::Database;
use rocket::futures::StreamExt;

use crate::models::EVALUATIONS;
use crate::services::RatingService;

/// What a single `jobEval` change asks of the rating service.
#[derive(Debug, PartialEq)]
pub enum Trigger {
    /// Recompute the one post the evaluation belongs to.
    Post(ObjectId),
    /// The affected post is unknown; recompute every evaluated post.
    Sweep,
    Ignore,
}

pub fn trigger_for(operation: &OperationType, full_document: Option<&Document>) -> Trigger {
    match operation {
        OperationType::Insert | OperationType::Update | OperationType::Replace => {
            match full_document.and_then(|d| d.get_object_id("postId").ok()) {
                Some(post_id) => Trigger::Post(post_id),
                // update lookup found nothing: deleted since
                None => Trigger::Sweep,
            }
        }
        // deletes carry only the document key
        OperationType::Delete => Trigger::Sweep,
        _ => Trigger::Ignore,
    }
}

async fn apply(ratings: &RatingService, trigger: Trigger) {
    match trigger {
        Trigger::Post(post_id) => ratings.refresh_post(post_id).await,
        Trigger::Sweep => {
            // errors already logged by the sweep
            let _ = ratings.recompute_all().await;
        }
        Trigger::Ignore => {}
    }
}

/// Keeps post ratings in step with every write to `jobEval`, including writes
/// that never pass through this API.
///
/// If the change stream cannot be opened at all (standalone server without a
/// replica set) the watcher gives up and request handlers remain the only
/// trigger. A stream that breaks mid-way is reopened after a sweep catches up
/// on whatever was missed.
pub async fn watch_evaluations(db: Database, ratings: Arc<RatingService>, retry: Duration) {
    let collection = db.collection::<Document>(EVALUATIONS);
    let options = ChangeStreamOptions::builder()
        .full_document(Some(FullDocumentType::UpdateLookup))
        .build();

    let mut opened_once = false;
    loop {
        let mut stream = match collection.watch(Vec::<Document>::new(), options.clone()).await {
            Ok(stream) => stream,
            Err(e) if !opened_once => {
                warn!("Evaluation change stream unavailable, watcher disabled: {}", e);
                return;
            }
            Err(e) => {
                error!("Failed to reopen evaluation change stream: {}", e);
                tokio::time::sleep(retry).await;
                continue;
            }
        };

        if opened_once {
            apply(&ratings, Trigger::Sweep).await;
        }
        opened_once = true;
        info!("Watching {} for rating changes", EVALUATIONS);

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    let trigger = trigger_for(&event.operation_type, event.full_document.as_ref());
                    apply(&ratings, trigger).await;
                }
                Err(e) => {
                    error!("Evaluation change stream failed: {}", e);
                    break;
                }
            }
        }

        tokio::time::sleep(retry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn insert_targets_its_post() {
        let post_id = ObjectId::new();
        let evaluation = doc! { "postId": post_id, "rating": 4 };
        assert_eq!(
            trigger_for(&OperationType::Insert, Some(&evaluation)),
            Trigger::Post(post_id)
        );
        assert_eq!(
            trigger_for(&OperationType::Update, Some(&evaluation)),
            Trigger::Post(post_id)
        );
    }

    #[test]
    fn delete_falls_back_to_sweep() {
        assert_eq!(trigger_for(&OperationType::Delete, None), Trigger::Sweep);
    }

    #[test]
    fn update_of_vanished_document_sweeps() {
        assert_eq!(trigger_for(&OperationType::Update, None), Trigger::Sweep);
        let no_post = doc! { "rating": 2 };
        assert_eq!(trigger_for(&OperationType::Replace, Some(&no_post)), Trigger::Sweep);
    }

    #[test]
    fn collection_level_events_are_ignored() {
        assert_eq!(trigger_for(&OperationType::Drop, None), Trigger::Ignore);
        assert_eq!(trigger_for(&OperationType::Invalidate, None), Trigger::Ignore);
    }
}
