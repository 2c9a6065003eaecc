use chrono::{DateTime, Local, Utc};
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::api::{ByteStream, VideoGenApi};
use super::types::{ArtifactRecord, JobHandle, JobOutcome};
use crate::consts::{CONTENT_POLICY_ERROR_CODE, FILE_TIMESTAMP_FORMAT, VIDEO_MIME_TYPE};
use crate::error::VideoGenError;

/// `{prefix}_YYYYMMDD_HHMMSS.mp4`. Second resolution only: two calls inside
/// the same second yield the same name.
pub fn artifact_file_name(prefix: &str, at: &DateTime<Local>) -> String {
    format!("{}_{}.mp4", prefix, at.format(FILE_TIMESTAMP_FORMAT))
}

/// Download the video a finished operation produced and save it under
/// `destination_dir`. A file from an earlier call with the same name is
/// overwritten; older files are never cleaned up here.
pub async fn fetch_and_store(
    api: &dyn VideoGenApi,
    handle: &JobHandle,
    destination_dir: &Path,
    prefix: &str,
) -> Result<ArtifactRecord, VideoGenError> {
    if !handle.done {
        return Err(VideoGenError::FatalService(format!(
            "Operation {} has not completed",
            handle.name
        )));
    }

    let (assets, filtered_reasons) = match &handle.outcome {
        Some(JobOutcome::Succeeded {
            assets,
            filtered_reasons,
        }) => (assets, filtered_reasons),
        Some(JobOutcome::Failed { code, message }) => {
            return Err(operation_failure(*code, message));
        }
        None => {
            return Err(VideoGenError::FatalService(
                "Operation completed but no response data found".to_string(),
            ));
        }
    };

    let Some(asset) = assets.first() else {
        return Err(VideoGenError::EmptyResult {
            filtered_reasons: filtered_reasons.clone(),
        });
    };

    if assets.len() > 1 {
        debug!(
            operation = %handle.name,
            count = assets.len(),
            "Operation returned several videos, keeping the first"
        );
    }

    let body = api.download(asset).await?;

    tokio::fs::create_dir_all(destination_dir).await?;

    let now = Local::now();
    let file_name = artifact_file_name(prefix, &now);
    let local_path = destination_dir.join(&file_name);

    let size_bytes = match write_body(body, &local_path).await {
        Ok(size_bytes) => size_bytes,
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&local_path).await {
                warn!(
                    path = %local_path.display(),
                    "Failed to remove partial video: {remove_err}"
                );
            }
            return Err(e);
        }
    };

    let record = ArtifactRecord {
        local_path,
        file_name,
        size_bytes,
        mime_type: asset
            .mime_type
            .clone()
            .unwrap_or_else(|| VIDEO_MIME_TYPE.to_string()),
        created_at: now.with_timezone(&Utc),
    };

    info!(
        operation = %handle.name,
        path = %record.local_path.display(),
        size_bytes = record.size_bytes,
        "Saved generated video"
    );

    Ok(record)
}

/// Stream the body to disk, returning the number of bytes written
async fn write_body(mut body: ByteStream, path: &Path) -> Result<u64, VideoGenError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut size_bytes = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        size_bytes += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(size_bytes)
}

fn operation_failure(code: i32, message: &str) -> VideoGenError {
    if code == CONTENT_POLICY_ERROR_CODE && message.contains("usage guidelines") {
        return VideoGenError::Validation(format!("Content policy violation: {message}"));
    }

    VideoGenError::FatalService(format!(
        "Operation failed with error code {code}: {message}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::videogen::api::mock::ScriptedApi;
    use crate::videogen::types::GeneratedAsset;
    use chrono::TimeZone;

    fn api_with_bytes(bytes: Vec<u8>) -> ScriptedApi {
        ScriptedApi::new(Ok(JobHandle::pending("op")), vec![], bytes)
    }

    fn one_video() -> JobOutcome {
        JobOutcome::Succeeded {
            assets: vec![GeneratedAsset {
                uri: "https://example.test/files/abc:download".to_string(),
                mime_type: None,
            }],
            filtered_reasons: vec![],
        }
    }

    #[test]
    fn test_artifact_file_name_pattern() {
        let at = Local.with_ymd_and_hms(2025, 6, 1, 9, 5, 7).unwrap();
        assert_eq!(
            artifact_file_name("veo3_video", &at),
            "veo3_video_20250601_090507.mp4"
        );
    }

    #[tokio::test]
    async fn test_stores_downloaded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_with_bytes(vec![7u8; 5_242_880]);
        let handle = JobHandle::completed("op", one_video());

        let record = fetch_and_store(&api, &handle, dir.path(), "veo3_video")
            .await
            .unwrap();

        assert_eq!(record.size_bytes, 5_242_880);
        assert_eq!(record.mime_type, "video/mp4");
        assert!(record.file_name.starts_with("veo3_video_"));
        assert!(record.file_name.ends_with(".mp4"));
        assert_eq!(record.local_path, dir.path().join(&record.file_name));

        let on_disk = tokio::fs::metadata(&record.local_path).await.unwrap();
        assert_eq!(on_disk.len(), 5_242_880);
    }

    #[tokio::test]
    async fn test_creates_missing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scratch").join("videos");
        let api = api_with_bytes(b"mp4".to_vec());

        let record = fetch_and_store(&api, &JobHandle::completed("op", one_video()), &nested, "clip")
            .await
            .unwrap();

        assert!(record.local_path.starts_with(&nested));
        assert_eq!(record.size_bytes, 3);
    }

    #[tokio::test]
    async fn test_zero_assets_is_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_with_bytes(vec![]);
        let handle = JobHandle::completed(
            "op",
            JobOutcome::Succeeded {
                assets: vec![],
                filtered_reasons: vec!["Prompt mentions a celebrity".to_string()],
            },
        );

        let err = fetch_and_store(&api, &handle, dir.path(), "veo3_video")
            .await
            .unwrap_err();

        match err {
            VideoGenError::EmptyResult { filtered_reasons } => {
                assert_eq!(filtered_reasons, vec!["Prompt mentions a celebrity"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(api.download_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_operation_maps_to_error() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_with_bytes(vec![]);

        let policy = JobHandle::completed(
            "op",
            JobOutcome::Failed {
                code: 3,
                message: "The prompt could violate the usage guidelines".to_string(),
            },
        );
        assert!(matches!(
            fetch_and_store(&api, &policy, dir.path(), "v").await,
            Err(VideoGenError::Validation(_))
        ));

        let internal = JobHandle::completed(
            "op",
            JobOutcome::Failed {
                code: 13,
                message: "Internal error".to_string(),
            },
        );
        let err = fetch_and_store(&api, &internal, dir.path(), "v")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Service error: Operation failed with error code 13: Internal error"
        );
    }

    #[tokio::test]
    async fn test_interrupted_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_with_bytes(vec![7u8; 200_000]).with_download_error(
            VideoGenError::TransientService("Failed to read video bytes: connection reset".into()),
        );

        let result =
            fetch_and_store(&api, &JobHandle::completed("op", one_video()), dir.path(), "v").await;

        assert!(matches!(result, Err(VideoGenError::TransientService(_))));
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_handle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_with_bytes(vec![1, 2, 3]);

        let result = fetch_and_store(&api, &JobHandle::pending("op"), dir.path(), "v").await;
        assert!(matches!(result, Err(VideoGenError::FatalService(_))));
    }
}
