//! Single-controller session tracking.
//!
//! At most one client may hold the session at a time. `claim` mints a fresh
//! token, rejecting if a live controller already holds one; every mutating
//! request re-validates the presented token and resets the idle clock. A
//! session that goes quiet for `control_timeout` is treated as released the
//! next time anyone checks it — there is no background reaper task, mirroring
//! the teacher's register/unregister-on-demand approach to `active_forwarders`
//! rather than a timer sweep.

use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::sync::RwLock;

struct SessionRecord {
    token: String,
    last_active: Instant,
}

pub struct SessionManager {
    control_timeout: Duration,
    current: RwLock<Option<SessionRecord>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(control_timeout: Duration) -> Self {
        Self {
            control_timeout,
            current: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn control_timeout_secs(&self) -> u64 {
        self.control_timeout.as_secs()
    }

    /// Mints and stores a new session token, rejecting if a live controller
    /// already holds one.
    pub async fn claim(&self) -> Result<String, SessionError> {
        let mut guard = self.current.write().await;
        if let Some(record) = guard.as_ref() {
            if record.last_active.elapsed() < self.control_timeout {
                return Err(SessionError::AlreadyClaimed);
            }
        }
        let token = generate_token();
        *guard = Some(SessionRecord {
            token: token.clone(),
            last_active: Instant::now(),
        });
        Ok(token)
    }

    /// Validates a presented token against the live session, refreshing its
    /// idle clock on success. A session whose idle timeout has elapsed is
    /// treated as absent regardless of the token presented.
    pub async fn touch(&self, presented: &str) -> Result<(), SessionError> {
        let mut guard = self.current.write().await;
        match guard.as_mut() {
            Some(record) if record.last_active.elapsed() >= self.control_timeout => {
                *guard = None;
                Err(SessionError::NoController)
            }
            Some(record) if record.token == presented => {
                record.last_active = Instant::now();
                Ok(())
            }
            Some(_) => Err(SessionError::TokenMismatch),
            None => Err(SessionError::NoController),
        }
    }

    /// Whether a non-expired controller currently holds the session, for
    /// status/meta reporting.
    pub async fn has_controller(&self) -> bool {
        let guard = self.current.read().await;
        guard
            .as_ref()
            .is_some_and(|r| r.last_active.elapsed() < self.control_timeout)
    }

    pub async fn release(&self) {
        *self.current.write().await = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    AlreadyClaimed,
    NoController,
    TokenMismatch,
}

fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_then_second_claim_is_rejected() {
        let sessions = SessionManager::new(Duration::from_secs(60));
        sessions.claim().await.unwrap();
        assert_eq!(sessions.claim().await.unwrap_err(), SessionError::AlreadyClaimed);
    }

    #[tokio::test]
    async fn touch_with_wrong_token_is_rejected() {
        let sessions = SessionManager::new(Duration::from_secs(60));
        sessions.claim().await.unwrap();
        assert_eq!(
            sessions.touch("not-the-token").await.unwrap_err(),
            SessionError::TokenMismatch
        );
    }

    #[tokio::test]
    async fn touch_with_correct_token_succeeds_and_refreshes() {
        let sessions = SessionManager::new(Duration::from_secs(60));
        let token = sessions.claim().await.unwrap();
        sessions.touch(&token).await.unwrap();
        assert!(sessions.has_controller().await);
    }

    #[tokio::test]
    async fn expired_session_can_be_reclaimed() {
        let sessions = SessionManager::new(Duration::from_millis(10));
        sessions.claim().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!sessions.has_controller().await);
        sessions.claim().await.unwrap();
    }

    #[tokio::test]
    async fn release_clears_the_controller() {
        let sessions = SessionManager::new(Duration::from_secs(60));
        sessions.claim().await.unwrap();
        sessions.release().await;
        assert!(!sessions.has_controller().await);
    }

    #[tokio::test]
    async fn touch_without_any_claim_reports_no_controller() {
        let sessions = SessionManager::new(Duration::from_secs(60));
        assert_eq!(sessions.touch("whatever").await.unwrap_err(), SessionError::NoController);
    }
}
