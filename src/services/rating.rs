use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info};
use mongodb::bson::oid::ObjectId;
use tokio::sync::Mutex as AsyncMutex;

use crate::db::{RatingStore, StoreError};
use crate::models::RatingSummary;

/// Mean of `ratings` rounded *up* to one decimal place: `ceil(mean * 10) / 10`.
///
/// An empty slice yields `0.0`, which reads the same as a genuine 0-star
/// average. The ceiling is taken on exact integer tenths so a mean such as
/// 2.3 never turns into 2.4 through float error.
pub fn aggregate(ratings: &[i32]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }

    let count = ratings.len() as i64;
    let tenths_sum: i64 = ratings.iter().map(|&r| i64::from(r) * 10).sum();

    let mut tenths = tenths_sum.div_euclid(count);
    if tenths_sum.rem_euclid(count) != 0 {
        tenths += 1;
    }

    tenths as f64 / 10.0
}

/// Single write path for the rating summary cached on posts.
///
/// Every recomputation of a post holds that post's lock from reading its
/// evaluations until the summary is written, so at most one is in flight per
/// post and the last to run always sees the newest evaluations.
pub struct RatingService {
    store: Arc<dyn RatingStore>,
    locks: Mutex<HashMap<ObjectId, Arc<AsyncMutex<()>>>>,
}

impl RatingService {
    pub fn new(store: Arc<dyn RatingStore>) -> Self {
        RatingService {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn post_lock(&self, post_id: ObjectId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(post_id).or_default().clone()
    }

    fn release_lock(&self, post_id: &ObjectId, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // one handle in the table, one here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(post_id);
        }
    }

    /// Recomputes one post's summary from its current evaluations and writes it.
    /// A post without evaluations gets `0.0 / 0`.
    pub async fn recompute_post(&self, post_id: ObjectId) -> Result<RatingSummary, StoreError> {
        let lock = self.post_lock(post_id);
        let result = {
            let _guard = lock.lock().await;
            self.recompute_locked(&post_id).await
        };
        self.release_lock(&post_id, lock);
        result
    }

    async fn recompute_locked(&self, post_id: &ObjectId) -> Result<RatingSummary, StoreError> {
        let ratings = self.store.ratings_for_post(post_id).await?;
        let summary = RatingSummary::from_ratings(&ratings);
        self.store.write_summary(post_id, &summary).await?;

        debug!(
            "Post {} rating recomputed: {} ({} evaluations)",
            post_id.to_hex(),
            summary.rating,
            summary.rating_cnt
        );
        Ok(summary)
    }

    /// Fire-and-forget variant used after evaluation writes: failures are
    /// logged and the cached summary stays stale.
    pub async fn refresh_post(&self, post_id: ObjectId) {
        if let Err(e) = self.recompute_post(post_id).await {
            error!("Failed to refresh rating of post {}: {}", post_id.to_hex(), e);
        }
    }

    /// Aggregate over the current evaluations without touching the post.
    pub async fn live_rating(&self, post_id: &ObjectId) -> Result<RatingSummary, StoreError> {
        let ratings = self.store.ratings_for_post(post_id).await?;
        Ok(RatingSummary::from_ratings(&ratings))
    }

    /// Recomputes every post referenced by at least one evaluation.
    ///
    /// Posts without evaluations are left untouched. The first failure aborts
    /// the rest of the batch. Returns the number of posts written.
    pub async fn recompute_all(&self) -> Result<usize, StoreError> {
        let post_ids = self.store.evaluated_post_ids().await.map_err(|e| {
            error!("Rating sweep aborted, could not scan evaluations: {}", e);
            e
        })?;

        for post_id in &post_ids {
            if let Err(e) = self.recompute_post(*post_id).await {
                error!("Rating sweep aborted at post {}: {}", post_id.to_hex(), e);
                return Err(e);
            }
        }

        info!("Rating sweep wrote {} posts", post_ids.len());
        Ok(post_ids.len())
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryStore {
        evaluations: Mutex<Vec<(ObjectId, i32)>>,
        summaries: Mutex<HashMap<ObjectId, RatingSummary>>,
        writes: AtomicUsize,
        fail_after_writes: Option<usize>,
        read_delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MemoryStore {
        fn with(evaluations: &[(ObjectId, i32)]) -> Self {
            MemoryStore {
                evaluations: Mutex::new(evaluations.to_vec()),
                ..Default::default()
            }
        }

        fn add(&self, post_id: ObjectId, rating: i32) {
            self.evaluations.lock().unwrap().push((post_id, rating));
        }

        fn summary(&self, post_id: &ObjectId) -> Option<RatingSummary> {
            self.summaries.lock().unwrap().get(post_id).copied()
        }

        fn snapshot(&self) -> HashMap<ObjectId, RatingSummary> {
            self.summaries.lock().unwrap().clone()
        }
    }

    fn io_failure() -> StoreError {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        StoreError::Database(mongodb::error::Error::from(io))
    }

    #[rocket::async_trait]
    impl RatingStore for MemoryStore {
        async fn ratings_for_post(&self, post_id: &ObjectId) -> Result<Vec<i32>, StoreError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
            let ratings = self.evaluations.lock().unwrap()
                .iter()
                .filter(|(id, _)| id == post_id)
                .map(|(_, r)| *r)
                .collect();
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ratings)
        }

        async fn evaluated_post_ids(&self) -> Result<Vec<ObjectId>, StoreError> {
            let mut ids: Vec<ObjectId> = self.evaluations.lock().unwrap().iter().map(|(id, _)| *id).collect();
            ids.sort();
            ids.dedup();
            Ok(ids)
        }

        async fn write_summary(&self, post_id: &ObjectId, summary: &RatingSummary) -> Result<(), StoreError> {
            let done = self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_after_writes.is_some_and(|limit| done >= limit) {
                return Err(io_failure());
            }
            self.summaries.lock().unwrap().insert(*post_id, *summary);
            Ok(())
        }
    }

    fn service(store: &Arc<MemoryStore>) -> RatingService {
        RatingService::new(store.clone())
    }

    #[test]
    fn empty_set_is_zero() {
        assert_eq!(aggregate(&[]), 0.0);
    }

    #[test]
    fn exact_mean_is_kept() {
        assert_eq!(aggregate(&[5, 4, 3]), 4.0);
        assert_eq!(aggregate(&[4]), 4.0);
    }

    #[test]
    fn mean_is_rounded_up_not_to_nearest() {
        // 3.25 -> 3.3
        assert_eq!(aggregate(&[3, 3, 3, 4]), 3.3);
        // 4.01 -> 4.1
        let mut ratings = vec![4; 99];
        ratings.push(5);
        assert_eq!(aggregate(&ratings), 4.1);
        // 4.05 -> 4.1
        let mut ratings = vec![4; 19];
        ratings.push(5);
        assert_eq!(aggregate(&ratings), 4.1);
        // 4.333.. -> 4.4, nearest would give 4.3
        assert_eq!(aggregate(&[4, 4, 5]), 4.4);
    }

    #[test]
    fn exact_tenths_are_not_bumped_by_float_error() {
        // mean 2.3 exactly
        let ratings = [2, 2, 2, 2, 2, 2, 2, 3, 3, 3];
        assert_eq!(aggregate(&ratings), 2.3);
    }

    #[test]
    fn aggregate_matches_ceiling_formula_and_stays_in_range() {
        let sets: Vec<Vec<i32>> = vec![
            vec![0],
            vec![5, 5, 5],
            vec![0, 5],
            vec![1, 2],
            vec![1, 1, 2],
            vec![0, 0, 1],
            vec![5, 4, 4, 4, 4, 4, 3],
        ];
        for set in sets {
            let got = aggregate(&set);
            let sum: i32 = set.iter().sum();
            let expected_tenths = (sum as f64 * 10.0 / set.len() as f64).ceil();
            assert_eq!(got, expected_tenths / 10.0, "set {:?}", set);
            assert!((0.0..=5.0).contains(&got));
        }
    }

    #[test]
    fn summary_counts_every_evaluation() {
        let summary = RatingSummary::from_ratings(&[3, 3, 3, 4]);
        assert_eq!(summary, RatingSummary { rating: 3.3, rating_cnt: 4 });
        assert_eq!(RatingSummary::from_ratings(&[]), RatingSummary::empty());
    }

    #[tokio::test]
    async fn recompute_post_writes_summary() {
        let post = ObjectId::new();
        let other = ObjectId::new();
        let store = Arc::new(MemoryStore::with(&[(post, 5), (post, 4), (post, 3), (other, 1)]));

        let summary = service(&store).recompute_post(post).await.unwrap();

        assert_eq!(summary, RatingSummary { rating: 4.0, rating_cnt: 3 });
        assert_eq!(store.summary(&post), Some(summary));
        assert_eq!(store.summary(&other), None);
    }

    #[tokio::test]
    async fn recompute_post_without_evaluations_writes_zero() {
        let post = ObjectId::new();
        let store = Arc::new(MemoryStore::default());

        let summary = service(&store).recompute_post(post).await.unwrap();

        assert_eq!(summary, RatingSummary::empty());
        assert_eq!(store.summary(&post), Some(RatingSummary::empty()));
    }

    #[tokio::test]
    async fn live_rating_does_not_write() {
        let post = ObjectId::new();
        let store = Arc::new(MemoryStore::with(&[(post, 2), (post, 5)]));

        let summary = service(&store).live_rating(&post).await.unwrap();

        assert_eq!(summary, RatingSummary { rating: 3.5, rating_cnt: 2 });
        assert_eq!(store.summary(&post), None);
    }

    #[tokio::test]
    async fn sweep_skips_posts_without_evaluations() {
        let rated = ObjectId::new();
        let unrated = ObjectId::new();
        let store = Arc::new(MemoryStore::with(&[(rated, 3), (rated, 3), (rated, 3), (rated, 4)]));

        let written = service(&store).recompute_all().await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(store.summary(&rated), Some(RatingSummary { rating: 3.3, rating_cnt: 4 }));
        assert_eq!(store.summary(&unrated), None);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let store = Arc::new(MemoryStore::with(&[(a, 1), (a, 2), (b, 5), (b, 4), (b, 4)]));
        let ratings = service(&store);

        ratings.recompute_all().await.unwrap();
        let first = store.snapshot();
        ratings.recompute_all().await.unwrap();

        assert_eq!(store.snapshot(), first);
        assert_eq!(first.len(), 2);
        assert_eq!(first[&b], RatingSummary { rating: 4.4, rating_cnt: 3 });
    }

    #[tokio::test]
    async fn sweep_picks_up_new_evaluations() {
        let post = ObjectId::new();
        let store = Arc::new(MemoryStore::with(&[(post, 5)]));
        let ratings = service(&store);

        ratings.recompute_all().await.unwrap();
        store.add(post, 2);
        ratings.recompute_all().await.unwrap();

        assert_eq!(store.summary(&post), Some(RatingSummary { rating: 3.5, rating_cnt: 2 }));
    }

    #[tokio::test]
    async fn sweep_aborts_on_first_write_failure() {
        let posts: Vec<ObjectId> = (0..4).map(|_| ObjectId::new()).collect();
        let evaluations: Vec<(ObjectId, i32)> = posts.iter().map(|id| (*id, 4)).collect();
        let store = Arc::new(MemoryStore {
            fail_after_writes: Some(1),
            ..MemoryStore::with(&evaluations)
        });

        let result = service(&store).recompute_all().await;

        assert!(result.is_err());
        assert_eq!(store.snapshot().len(), 1);
        // one success, one failure, nothing attempted after
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_recomputes_of_one_post_never_overlap() {
        let post = ObjectId::new();
        let store = Arc::new(MemoryStore {
            read_delay: Some(Duration::from_millis(5)),
            ..MemoryStore::with(&[(post, 4), (post, 5)])
        });
        let ratings = Arc::new(service(&store));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let ratings = ratings.clone();
                tokio::spawn(async move { ratings.recompute_post(post).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(store.summary(&post), Some(RatingSummary { rating: 4.5, rating_cnt: 2 }));
        assert_eq!(ratings.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn different_posts_recompute_in_parallel() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let store = Arc::new(MemoryStore {
            read_delay: Some(Duration::from_millis(20)),
            ..MemoryStore::with(&[(a, 1), (b, 2)])
        });
        let ratings = Arc::new(service(&store));

        let (ra, rb) = tokio::join!(ratings.recompute_post(a), ratings.recompute_post(b));

        ra.unwrap();
        rb.unwrap();
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 2);
    }
}
