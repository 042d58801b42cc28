use crate::error::SessionError;

const DEFAULT_API_MODEL: &str = "gemini-2.0-flash-live-001";
const DEFAULT_VERTEX_MODEL: &str = "gemini-2.0-flash-live-preview-04-09";
const DEFAULT_VERTEX_LOCATION: &str = "us-central1";

/// Which of the two connection configurations to use. They differ only in
/// endpoint, credential source, and the media-type tag on outbound audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Developer endpoint, authenticated by API key.
    ApiKey,
    /// Regional Vertex endpoint, authenticated by bearer token.
    Vertex,
}

#[derive(Debug, Clone)]
enum Credentials {
    ApiKey(String),
    Bearer {
        project: String,
        location: String,
        token: String,
    },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: ConnectMode,
    pub model: String,
    credentials: Credentials,
}

impl SessionConfig {
    /// Resolve the connection configuration from the environment. Missing
    /// credentials are a configuration error, reported before any flow
    /// starts.
    pub fn from_env(vertex: bool) -> Result<Self, SessionError> {
        if vertex {
            let project = require_env("GOOGLE_CLOUD_PROJECT")?;
            let location = std::env::var("GOOGLE_CLOUD_LOCATION")
                .unwrap_or_else(|_| DEFAULT_VERTEX_LOCATION.to_string());
            let token = require_env("GOOGLE_ACCESS_TOKEN")?;
            Ok(Self {
                mode: ConnectMode::Vertex,
                model: model_from_env(DEFAULT_VERTEX_MODEL),
                credentials: Credentials::Bearer {
                    project,
                    location,
                    token,
                },
            })
        } else {
            let key = require_env("GOOGLE_API_KEY")?;
            Ok(Self {
                mode: ConnectMode::ApiKey,
                model: model_from_env(DEFAULT_API_MODEL),
                credentials: Credentials::ApiKey(key),
            })
        }
    }

    /// Media-type tag for outbound audio chunks; must match what the
    /// connection negotiated.
    pub fn media_type(&self) -> &'static str {
        match self.mode {
            ConnectMode::ApiKey => "audio/pcm;rate=24000",
            ConnectMode::Vertex => "audio/pcm",
        }
    }

    pub(crate) fn endpoint(&self) -> String {
        match &self.credentials {
            Credentials::ApiKey(key) => format!(
                "wss://generativelanguage.googleapis.com/ws/\
                 google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent?key={}",
                key
            ),
            Credentials::Bearer { location, .. } => format!(
                "wss://{}-aiplatform.googleapis.com/ws/\
                 google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent",
                location
            ),
        }
    }

    /// Fully qualified model name as the endpoint expects it.
    pub(crate) fn model_path(&self) -> String {
        match &self.credentials {
            Credentials::ApiKey(_) => format!("models/{}", self.model),
            Credentials::Bearer {
                project, location, ..
            } => format!(
                "projects/{}/locations/{}/publishers/google/models/{}",
                project, location, self.model
            ),
        }
    }

    pub(crate) fn auth_header(&self) -> Option<String> {
        match &self.credentials {
            Credentials::ApiKey(_) => None,
            Credentials::Bearer { token, .. } => Some(format!("Bearer {}", token)),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(mode: ConnectMode) -> Self {
        let credentials = match mode {
            ConnectMode::ApiKey => Credentials::ApiKey("test-key".to_string()),
            ConnectMode::Vertex => Credentials::Bearer {
                project: "test-project".to_string(),
                location: DEFAULT_VERTEX_LOCATION.to_string(),
                token: "test-token".to_string(),
            },
        };
        Self {
            mode,
            model: "test-model".to_string(),
            credentials,
        }
    }
}

fn model_from_env(default: &str) -> String {
    std::env::var("VOXLINE_MODEL").unwrap_or_else(|_| default.to_string())
}

fn require_env(name: &str) -> Result<String, SessionError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SessionError::Config(format!("{} is not set", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_follows_mode() {
        let api = SessionConfig::for_tests(ConnectMode::ApiKey);
        let vertex = SessionConfig::for_tests(ConnectMode::Vertex);
        assert_eq!(api.media_type(), "audio/pcm;rate=24000");
        assert_eq!(vertex.media_type(), "audio/pcm");
    }

    #[test]
    fn model_path_is_mode_specific() {
        let api = SessionConfig::for_tests(ConnectMode::ApiKey);
        assert_eq!(api.model_path(), "models/test-model");

        let vertex = SessionConfig::for_tests(ConnectMode::Vertex);
        assert_eq!(
            vertex.model_path(),
            "projects/test-project/locations/us-central1/publishers/google/models/test-model"
        );
        assert!(vertex.endpoint().starts_with("wss://us-central1-aiplatform"));
        assert_eq!(vertex.auth_header().as_deref(), Some("Bearer test-token"));
    }
}
