use std::time::Duration;

pub const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const VEO3_MODEL_ID: &str = "veo-3.0-generate-preview";

/// Header the Gemini API reads the user's key from
pub const GOOGLE_API_KEY_HEADER: &str = "x-goog-api-key";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Seconds over which the progress estimate ramps linearly
pub const PROGRESS_RAMP_SECS: u64 = 60;

/// The estimate never goes past this while the operation is still running
pub const PROGRESS_RUNNING_CAP: f64 = 0.9;

pub const DEFAULT_ARTIFACT_PREFIX: &str = "veo3_video";

/// Prefix used for the attachment name offered on download
pub const DOWNLOAD_FILE_PREFIX: &str = "veo3_generated";

pub const VIDEO_MIME_TYPE: &str = "video/mp4";

/// strftime pattern shared by stored and downloaded file names
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Vendor status code for a prompt rejected by the usage guidelines
pub const CONTENT_POLICY_ERROR_CODE: i32 = 3;
