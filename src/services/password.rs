use bcrypt::{hash, verify, BcryptError, DEFAULT_COST};
use tokio::task::{spawn_blocking, JoinError};

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Hash error: {0}")]
    Hash(#[from] BcryptError),
    #[error("Hash task failed: {0}")]
    Join(#[from] JoinError),
}

/// bcrypt runs on the blocking pool so request workers stay free.
pub struct PasswordService;

impl PasswordService {
    pub async fn hash_password(password: String) -> Result<String, PasswordError> {
        Self::hash_with_cost(password, DEFAULT_COST).await
    }

    pub async fn hash_with_cost(password: String, cost: u32) -> Result<String, PasswordError> {
        Ok(spawn_blocking(move || hash(password, cost)).await??)
    }

    /// A malformed stored hash counts as a mismatch.
    pub async fn verify_password(password: String, password_hash: String) -> bool {
        spawn_blocking(move || verify(password, &password_hash).unwrap_or(false))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn verifies_matching_password() {
        let hashed = PasswordService::hash_with_cost("correct horse".to_string(), 4)
            .await
            .unwrap();
        assert!(PasswordService::verify_password("correct horse".to_string(), hashed.clone()).await);
        assert!(!PasswordService::verify_password("battery staple".to_string(), hashed).await);
    }

    #[tokio::test]
    async fn garbage_hash_never_verifies() {
        assert!(
            !PasswordService::verify_password("anything".to_string(), "not-a-bcrypt-hash".to_string())
                .await
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn hashing_leaves_the_runtime_responsive() {
        let handle = tokio::spawn(PasswordService::hash_with_cost("correct horse".to_string(), 10));

        // With bcrypt on the runtime thread this task could not tick until hashing ended.
        let mut ticks = 0;
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ticks += 1;
        }

        assert!(ticks > 1);
        assert!(handle.await.unwrap().is_ok());
    }
}
