use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, warn};

use super::api::VideoGenApi;
use super::artifact::fetch_and_store;
use super::poller::{await_completion, PollOptions};
use super::session::GenerationGuard;
use super::types::{ArtifactRecord, GenerationRequest, ProgressEstimate};
use crate::error::VideoGenError;

/// Where and how a generation runs; built once from the app config.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub poll: PollOptions,
    pub scratch_dir: PathBuf,
    pub artifact_prefix: String,
}

/// What a caller sees while a generation runs, in order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GenerationEvent {
    Submitted { operation_id: String },
    Progress(ProgressEstimate),
    Downloading,
    Completed(ArtifactRecord),
    Failed { kind: String, message: String },
}

impl GenerationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::Progress(_) => "progress",
            Self::Downloading => "downloading",
            Self::Completed(_) => "completed",
            Self::Failed { .. } => "error",
        }
    }
}

/// Submit, wait, download, cache: one full generation on the session `guard`
/// has claimed. The session is released when this returns.
///
/// Any failure ends the run right away; the message is kept on the session
/// and a `Failed` event is emitted so the caller can show it and let the user
/// try again.
pub async fn generate_video<F>(
    api: &dyn VideoGenApi,
    guard: GenerationGuard,
    request: GenerationRequest,
    settings: &GenerationSettings,
    mut on_event: F,
) -> Result<ArtifactRecord, VideoGenError>
where
    F: FnMut(GenerationEvent) + Send,
{
    let session_id = guard.session_id();

    let result = async {
        info!(
            session = %session_id,
            aspect_ratio = request.aspect_ratio().as_str(),
            person_generation = request.person_policy().as_str(),
            "Starting video generation"
        );

        let handle = api.submit(&request).await?;
        guard.set_operation_id(&handle.name);
        on_event(GenerationEvent::Submitted {
            operation_id: handle.name.clone(),
        });

        let handle = await_completion(
            api,
            handle,
            &settings.poll,
            guard.cancel_token(),
            |progress| on_event(GenerationEvent::Progress(progress)),
        )
        .await?;

        on_event(GenerationEvent::Downloading);
        let record = fetch_and_store(
            api,
            &handle,
            &settings.scratch_dir,
            &settings.artifact_prefix,
        )
        .await?;

        if let Some(previous) = guard.store_artifact(record.clone()) {
            remove_replaced(&previous, &record).await;
        }
        Ok::<_, VideoGenError>(record)
    }
    .await;

    match result {
        Ok(record) => {
            on_event(GenerationEvent::Completed(record.clone()));
            Ok(record)
        }
        Err(e) => {
            error!(session = %session_id, kind = e.kind(), "Video generation failed: {e}");
            guard.record_error(e.to_string());
            on_event(GenerationEvent::Failed {
                kind: e.kind().to_string(),
                message: e.to_string(),
            });
            Err(e)
        }
    }
}

async fn remove_replaced(previous: &ArtifactRecord, current: &ArtifactRecord) {
    // Same-second names collide, and then the new video already overwrote it
    if previous.local_path == current.local_path {
        return;
    }
    if let Err(e) = tokio::fs::remove_file(&previous.local_path).await {
        warn!(
            path = %previous.local_path.display(),
            "Failed to remove replaced video: {e}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::videogen::api::mock::ScriptedApi;
    use crate::videogen::session::SessionRegistry;
    use crate::videogen::types::{AspectRatio, GeneratedAsset, JobHandle, JobOutcome};

    fn settings(dir: &std::path::Path) -> GenerationSettings {
        GenerationSettings {
            poll: PollOptions::default(),
            scratch_dir: dir.to_path_buf(),
            artifact_prefix: "veo3_video".to_string(),
        }
    }

    fn finished(name: &str) -> JobHandle {
        JobHandle::completed(
            name,
            JobOutcome::Succeeded {
                assets: vec![GeneratedAsset {
                    uri: "https://example.test/files/balloon:download".to_string(),
                    mime_type: Some("video/mp4".to_string()),
                }],
                filtered_reasons: vec![],
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_red_balloon_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let api = ScriptedApi::new(
            Ok(JobHandle::pending("operations/balloon")),
            vec![
                Ok(JobHandle::pending("operations/balloon")),
                Ok(JobHandle::pending("operations/balloon")),
                Ok(finished("operations/balloon")),
            ],
            vec![0u8; 5_242_880],
        );
        let registry = SessionRegistry::new();
        let session = registry.create().await;

        let request = GenerationRequest::new("A red balloon rising")
            .unwrap()
            .with_aspect_ratio(AspectRatio::Landscape);

        let mut events = Vec::new();
        let guard = session.begin_generation().unwrap();
        let record = generate_video(&api, guard, request, &settings(dir.path()), |e| {
            events.push(e)
        })
        .await
        .unwrap();

        assert_eq!(record.size_bytes, 5_242_880);

        let progress: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                GenerationEvent::Progress(p) => Some(p.fraction),
                _ => None,
            })
            .collect();
        // Emitted at 0 s, 10 s and 20 s while pending, then 1.0 once done at 30 s
        let expected = [0.0, 10.0 / 60.0, 20.0 / 60.0, 1.0];
        assert_eq!(progress.len(), expected.len());
        for (got, want) in progress.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
        }

        assert!(matches!(events.first(), Some(GenerationEvent::Submitted { operation_id }) if operation_id == "operations/balloon"));
        assert!(matches!(events.last(), Some(GenerationEvent::Completed(_))));

        let snapshot = session.snapshot();
        assert!(!snapshot.generating);
        assert_eq!(snapshot.operation_id.as_deref(), Some("operations/balloon"));
        assert_eq!(snapshot.artifact.unwrap().size_bytes, 5_242_880);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_recorded_and_session_released() {
        let dir = tempfile::tempdir().unwrap();
        let api = ScriptedApi::new(
            Ok(JobHandle::pending("op")),
            vec![
                Ok(JobHandle::pending("op")),
                Err(VideoGenError::TransientService("connection reset".into())),
            ],
            vec![],
        );
        let registry = SessionRegistry::new();
        let session = registry.create().await;

        let mut events = Vec::new();
        let result = generate_video(
            &api,
            session.begin_generation().unwrap(),
            GenerationRequest::new("A red balloon rising").unwrap(),
            &settings(dir.path()),
            |e| events.push(e),
        )
        .await;

        assert!(matches!(result, Err(VideoGenError::TransientService(_))));
        assert_eq!(api.refresh_count(), 2);
        assert!(matches!(
            events.last(),
            Some(GenerationEvent::Failed { kind, .. }) if kind == "transient_service"
        ));

        let snapshot = session.snapshot();
        assert!(!snapshot.generating);
        assert!(snapshot.artifact.is_none());
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("Service temporarily unavailable: connection reset")
        );
    }

    #[tokio::test]
    async fn test_new_video_replaces_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new();
        let session = registry.create().await;

        let first_api = ScriptedApi::new(Ok(finished("op-1")), vec![], b"first".to_vec());
        let first = generate_video(
            &first_api,
            session.begin_generation().unwrap(),
            GenerationRequest::new("A red balloon rising").unwrap(),
            &settings(dir.path()),
            |_| {},
        )
        .await
        .unwrap();
        assert!(first.local_path.exists());

        let second_api = ScriptedApi::new(Ok(finished("op-2")), vec![], b"second".to_vec());
        let second_settings = GenerationSettings {
            artifact_prefix: "retry".to_string(),
            ..settings(dir.path())
        };
        let second = generate_video(
            &second_api,
            session.begin_generation().unwrap(),
            GenerationRequest::new("A blue balloon rising").unwrap(),
            &second_settings,
            |_| {},
        )
        .await
        .unwrap();

        assert!(!first.local_path.exists());
        assert!(second.local_path.exists());
        assert_eq!(session.artifact().unwrap(), second);
        assert!(!session.snapshot().generating);
    }
}
