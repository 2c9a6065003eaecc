use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use utoipa::ToSchema;

use crate::consts::{PROGRESS_RAMP_SECS, PROGRESS_RUNNING_CAP};
use crate::error::VideoGenError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
        }
    }
}

/// Whether the model may render people
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PersonPolicy {
    #[default]
    AllowAll,
    AllowAdult,
    DontAllow,
}

impl PersonPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllowAll => "allow_all",
            Self::AllowAdult => "allow_adult",
            Self::DontAllow => "dont_allow",
        }
    }
}

/// A validated generation request. Fields are private so an empty prompt
/// can never reach the vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    negative_prompt: Option<String>,
    aspect_ratio: AspectRatio,
    person_policy: PersonPolicy,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Result<Self, VideoGenError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(VideoGenError::Validation(
                "Prompt must not be empty".to_string(),
            ));
        }

        Ok(Self {
            prompt,
            negative_prompt: None,
            aspect_ratio: AspectRatio::default(),
            person_policy: PersonPolicy::default(),
        })
    }

    pub fn with_negative_prompt(mut self, negative_prompt: Option<String>) -> Self {
        self.negative_prompt = negative_prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_person_policy(mut self, person_policy: PersonPolicy) -> Self {
        self.person_policy = person_policy;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn negative_prompt(&self) -> Option<&str> {
        self.negative_prompt.as_deref()
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn person_policy(&self) -> PersonPolicy {
        self.person_policy
    }
}

/// User-supplied vendor key. Lives only as long as the generation that uses it.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Result<Self, VideoGenError> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err(VideoGenError::Authentication(
                "An API key is required".to_string(),
            ));
        }
        Ok(Self(key))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// One downloadable video produced by an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    pub uri: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded {
        assets: Vec<GeneratedAsset>,
        /// Content-filter reasons reported alongside (or instead of) the assets
        filtered_reasons: Vec<String>,
    },
    Failed {
        code: i32,
        message: String,
    },
}

/// Handle to a remote long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub done: bool,
    /// Set only once `done` is true
    pub outcome: Option<JobOutcome>,
}

impl JobHandle {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            outcome: None,
        }
    }

    pub fn completed(name: impl Into<String>, outcome: JobOutcome) -> Self {
        Self {
            name: name.into(),
            done: true,
            outcome: Some(outcome),
        }
    }
}

/// Locally computed progress. Not a measurement: the vendor only reports
/// done / not done, so `fraction` is a linear ramp over the first minute,
/// held at 0.9 until the operation finishes and only then set to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct ProgressEstimate {
    pub elapsed_seconds: u64,
    pub fraction: f64,
}

impl ProgressEstimate {
    pub fn running(elapsed_seconds: u64) -> Self {
        Self {
            elapsed_seconds,
            fraction: running_fraction(elapsed_seconds),
        }
    }

    pub fn finished(elapsed_seconds: u64) -> Self {
        Self {
            elapsed_seconds,
            fraction: 1.0,
        }
    }
}

pub fn running_fraction(elapsed_seconds: u64) -> f64 {
    if elapsed_seconds < PROGRESS_RAMP_SECS {
        (elapsed_seconds as f64 / PROGRESS_RAMP_SECS as f64).min(PROGRESS_RUNNING_CAP)
    } else {
        PROGRESS_RUNNING_CAP
    }
}

/// A generated video saved to local scratch storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ArtifactRecord {
    #[schema(value_type = String)]
    pub local_path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prompt_is_rejected() {
        assert!(matches!(
            GenerationRequest::new(""),
            Err(VideoGenError::Validation(_))
        ));
        assert!(matches!(
            GenerationRequest::new("   \n"),
            Err(VideoGenError::Validation(_))
        ));
    }

    #[test]
    fn test_blank_negative_prompt_is_dropped() {
        let request = GenerationRequest::new("A red balloon rising")
            .unwrap()
            .with_negative_prompt(Some("  ".to_string()));
        assert_eq!(request.negative_prompt(), None);

        let request = request.with_negative_prompt(Some("blurry".to_string()));
        assert_eq!(request.negative_prompt(), Some("blurry"));
    }

    #[test]
    fn test_defaults_match_form_defaults() {
        let request = GenerationRequest::new("A red balloon rising").unwrap();
        assert_eq!(request.aspect_ratio(), AspectRatio::Landscape);
        assert_eq!(request.person_policy(), PersonPolicy::AllowAll);
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("AIzaSecret").unwrap();
        assert_eq!(format!("{key:?}"), "ApiKey([REDACTED])");
        assert!(matches!(
            ApiKey::new(" "),
            Err(VideoGenError::Authentication(_))
        ));
    }

    #[test]
    fn test_running_fraction_ramp() {
        assert_eq!(running_fraction(0), 0.0);
        assert!((running_fraction(10) - 10.0 / 60.0).abs() < 1e-9);
        assert!((running_fraction(30) - 0.5).abs() < 1e-9);
        assert_eq!(running_fraction(54), 0.9);
        assert_eq!(running_fraction(59), 0.9);
        assert_eq!(running_fraction(60), 0.9);
        assert_eq!(running_fraction(600), 0.9);
    }

    #[test]
    fn test_running_fraction_never_decreases() {
        let mut previous = 0.0;
        for elapsed in 0..400 {
            let fraction = running_fraction(elapsed);
            assert!(fraction >= previous);
            assert!(fraction < 1.0);
            previous = fraction;
        }
    }

    #[test]
    fn test_aspect_ratio_wire_names() {
        assert_eq!(
            serde_json::to_string(&AspectRatio::Portrait).unwrap(),
            "\"9:16\""
        );
        let parsed: PersonPolicy = serde_json::from_str("\"dont_allow\"").unwrap();
        assert_eq!(parsed, PersonPolicy::DontAllow);
    }
}
