use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::types::ArtifactRecord;
use crate::error::VideoGenError;

#[derive(Debug)]
struct SessionSlot {
    generating: bool,
    operation_id: Option<String>,
    artifact: Option<ArtifactRecord>,
    last_error: Option<String>,
    cancel: Option<CancellationToken>,
    last_used: Instant,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            generating: false,
            operation_id: None,
            artifact: None,
            last_error: None,
            cancel: None,
            last_used: Instant::now(),
        }
    }
}

/// State for one user: the in-flight generation, if any, and the last video it produced.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    slot: Mutex<SessionSlot>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub generating: bool,
    pub operation_id: Option<String>,
    pub artifact: Option<ArtifactRecord>,
    pub last_error: Option<String>,
}

impl Session {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            slot: Mutex::new(SessionSlot::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the session busy. Fails if a generation is already running here.
    ///
    /// The check and the claim happen under one lock, so of two concurrent
    /// callers exactly one gets the guard.
    pub fn begin_generation(self: &Arc<Self>) -> Result<GenerationGuard, VideoGenError> {
        let mut slot = self.slot();
        if slot.generating {
            return Err(VideoGenError::SessionBusy);
        }

        let cancel = CancellationToken::new();
        slot.generating = true;
        slot.operation_id = None;
        slot.last_error = None;
        slot.cancel = Some(cancel.clone());
        slot.last_used = Instant::now();

        Ok(GenerationGuard {
            session: self.clone(),
            cancel,
        })
    }

    fn touch(&self) {
        self.slot().last_used = Instant::now();
    }

    /// Idle sessions with no generation running
    fn is_expired(&self, now: Instant, max_idle: Duration) -> bool {
        let slot = self.slot();
        !slot.generating && now.saturating_duration_since(slot.last_used) >= max_idle
    }

    /// Cancel the running generation. Returns false if nothing was running.
    pub fn cancel(&self) -> bool {
        let slot = self.slot();
        match (&slot.cancel, slot.generating) {
            (Some(token), true) => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn artifact(&self) -> Option<ArtifactRecord> {
        self.slot().artifact.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let slot = self.slot();
        SessionSnapshot {
            session_id: self.id,
            generating: slot.generating,
            operation_id: slot.operation_id.clone(),
            artifact: slot.artifact.clone(),
            last_error: slot.last_error.clone(),
        }
    }
}

/// Held for the duration of one generation; clears the busy flag when dropped.
/// Owns its session so it can move into a spawned task.
pub struct GenerationGuard {
    session: Arc<Session>,
    cancel: CancellationToken,
}

impl GenerationGuard {
    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_operation_id(&self, operation_id: &str) {
        self.session.slot().operation_id = Some(operation_id.to_string());
    }

    /// Replace the cached artifact, returning the one it displaced. The old
    /// file stays on disk.
    pub fn store_artifact(&self, record: ArtifactRecord) -> Option<ArtifactRecord> {
        self.session.slot().artifact.replace(record)
    }

    pub fn record_error(&self, message: String) {
        self.session.slot().last_error = Some(message);
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        let mut slot = self.session.slot();
        slot.generating = false;
        slot.cancel = None;
        slot.last_used = Instant::now();
    }
}

/// Sessions keyed by id. Each session is isolated from the others, so two
/// users (or two tabs) can generate at the same time.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(Uuid::new_v4()));
        self.sessions
            .write()
            .await
            .insert(session.id(), session.clone());
        session
    }

    /// Look up a session and mark it as used
    pub async fn get(&self, id: &Uuid) -> Result<Arc<Session>, VideoGenError> {
        let session = self
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| VideoGenError::SessionNotFound(id.to_string()))?;
        session.touch();
        Ok(session)
    }

    /// Drop a session and its video, cancelling whatever it was waiting on.
    pub async fn remove(&self, id: &Uuid) -> Result<(), VideoGenError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| VideoGenError::SessionNotFound(id.to_string()))?;
        session.cancel();
        remove_artifact_file(&session).await;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle for at least `max_idle` and delete their videos.
    /// Sessions with a generation running are kept. Returns how many went.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<Uuid> = sessions
                .values()
                .filter(|session| session.is_expired(now, max_idle))
                .map(|session| session.id())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            remove_artifact_file(session).await;
        }

        expired.len()
    }
}

async fn remove_artifact_file(session: &Session) {
    let Some(artifact) = session.artifact() else {
        return;
    };
    if let Err(e) = tokio::fs::remove_file(&artifact.local_path).await {
        warn!(
            session = %session.id(),
            path = %artifact.local_path.display(),
            "Failed to remove session video: {e}"
        );
    }
}

/// Periodically expire idle sessions until `cancel` fires.
pub async fn run_session_expiry(
    registry: Arc<SessionRegistry>,
    max_idle: Duration,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        max_idle_secs = max_idle.as_secs(),
        interval_secs = sweep_interval.as_secs(),
        "Session expiry job started"
    );

    let mut interval = tokio::time::interval(sweep_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Session expiry job stopping");
                break;
            }
            _ = interval.tick() => {
                let expired = registry.expire_idle(max_idle).await;
                if expired > 0 {
                    info!(expired, "Expired idle sessions");
                } else {
                    tracing::debug!("No idle sessions to expire");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    const IDLE: Duration = Duration::from_secs(3600);

    fn record(name: &str) -> ArtifactRecord {
        ArtifactRecord {
            local_path: PathBuf::from("/tmp").join(name),
            file_name: name.to_string(),
            size_bytes: 10,
            mime_type: "video/mp4".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_second_generation_on_same_session_is_rejected() {
        let registry = SessionRegistry::new();
        let session = registry.create().await;

        let guard = session.begin_generation().unwrap();
        assert!(matches!(
            session.begin_generation(),
            Err(VideoGenError::SessionBusy)
        ));
        assert!(session.snapshot().generating);

        drop(guard);
        assert!(!session.snapshot().generating);
        assert!(session.begin_generation().is_ok());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let first = registry.create().await;
        let second = registry.create().await;
        assert_ne!(first.id(), second.id());

        let _busy = first.begin_generation().unwrap();
        let other = second.begin_generation().unwrap();
        other.store_artifact(record("b.mp4"));

        assert!(first.artifact().is_none());
        assert_eq!(second.artifact().unwrap().file_name, "b.mp4");
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_last_artifact_wins() {
        let registry = SessionRegistry::new();
        let session = registry.create().await;
        let guard = session.begin_generation().unwrap();

        assert!(guard.store_artifact(record("first.mp4")).is_none());
        let displaced = guard.store_artifact(record("second.mp4")).unwrap();

        assert_eq!(displaced.file_name, "first.mp4");
        assert_eq!(session.artifact().unwrap().file_name, "second.mp4");
    }

    #[tokio::test]
    async fn test_cancel_and_remove() {
        let registry = SessionRegistry::new();
        let session = registry.create().await;
        assert!(!session.cancel());

        let guard = session.begin_generation().unwrap();
        let token = guard.cancel_token().clone();

        registry.remove(&session.id()).await.unwrap();
        assert!(token.is_cancelled());
        assert!(matches!(
            registry.get(&session.id()).await,
            Err(VideoGenError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.remove(&session.id()).await,
            Err(VideoGenError::SessionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_expire() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new();
        let idle = registry.create().await;
        let recent = registry.create().await;
        let busy = registry.create().await;

        let video = dir.path().join("old.mp4");
        tokio::fs::write(&video, b"mp4").await.unwrap();
        {
            let guard = idle.begin_generation().unwrap();
            guard.store_artifact(ArtifactRecord {
                local_path: video.clone(),
                ..record("old.mp4")
            });
        }
        let _running = busy.begin_generation().unwrap();

        tokio::time::advance(Duration::from_secs(1800)).await;
        registry.get(&recent.id()).await.unwrap();
        assert_eq!(registry.expire_idle(IDLE).await, 0);

        tokio::time::advance(Duration::from_secs(1800)).await;
        assert_eq!(registry.expire_idle(IDLE).await, 1);

        assert!(registry.get(&idle.id()).await.is_err());
        assert!(registry.get(&recent.id()).await.is_ok());
        assert!(registry.get(&busy.id()).await.is_ok());
        assert!(!video.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_job_sweeps_until_cancelled() {
        let registry = Arc::new(SessionRegistry::new());
        registry.create().await;
        let cancel = CancellationToken::new();

        let job = tokio::spawn(run_session_expiry(
            registry.clone(),
            IDLE,
            Duration::from_secs(60),
            cancel.clone(),
        ));

        tokio::time::sleep(IDLE + Duration::from_secs(120)).await;
        assert_eq!(registry.len().await, 0);

        cancel.cancel();
        job.await.unwrap();
    }
}
