use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::Engine as _;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    config::AppConfig,
    error::{CoreError, CoreResult},
    store::ImageStore,
};

/// Trailing window the analysis selects captures from. Matches the framing
/// shown to the user ("analyze the last five minutes").
pub const ANALYSIS_WINDOW: Duration = Duration::from_secs(5 * 60);

const USER_CAPTION: &str =
    "These are screenshots from the last five minutes of the current work session, newest first. \
     Judge whether the user is still on task.";
const SCHEMA_NAME: &str = "focus_verdict";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusStatus {
    OnTask,
    Drifted,
}

/// Structured verdict returned by the model. Parsed strictly: a response
/// carrying extra or missing fields is a `MalformedResponse`, never a
/// partially populated verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationVerdict {
    pub status: FocusStatus,
    pub analysis: String,
    pub suggested_prompt: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub verdict: ClassificationVerdict,
    pub images_analyzed: usize,
}

/// Seam used by the session controller so end-of-session analysis can be
/// exercised without a network.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn analyze(&self, limit: usize) -> CoreResult<AnalysisOutcome>;
}

/// Stateless client for the multimodal completion endpoint. Owns no
/// persistent state; reads captures from the store per request.
pub struct ClassificationClient {
    http: reqwest::Client,
    config: AppConfig,
    store: Arc<ImageStore>,
}

impl ClassificationClient {
    pub fn new(config: AppConfig, store: Arc<ImageStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            store,
        }
    }
}

#[async_trait]
impl Classifier for ClassificationClient {
    async fn analyze(&self, limit: usize) -> CoreResult<AnalysisOutcome> {
        let paths = self.store.recent_within(limit, ANALYSIS_WINDOW)?;
        if paths.is_empty() {
            return Err(CoreError::NoImages);
        }

        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(CoreError::MissingApiKey)?;

        let mut data_urls = Vec::with_capacity(paths.len());
        for path in &paths {
            let bytes = tokio::fs::read(path).await?;
            data_urls.push(to_data_url(&bytes));
        }

        info!("requesting classification over {} capture(s)", paths.len());

        let body = build_request_body(&self.config.model, &self.config.system_prompt, &data_urls);
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let payload: Value = response.json().await?;

        let verdict = parse_verdict(&payload)?;
        Ok(AnalysisOutcome {
            verdict,
            images_analyzed: paths.len(),
        })
    }
}

fn to_data_url(bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:image/jpeg;base64,{encoded}")
}

/// One user turn: the caption, then every image as a low-detail data URL to
/// bound token cost.
fn build_request_body(model: &str, system_prompt: &str, data_urls: &[String]) -> Value {
    let mut content = vec![json!({ "type": "text", "text": USER_CAPTION })];
    for url in data_urls {
        content.push(json!({
            "type": "image_url",
            "image_url": { "url": url, "detail": "low" },
        }));
    }

    json!({
        "model": model,
        "temperature": 0,
        "messages": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": content },
        ],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": SCHEMA_NAME,
                "strict": true,
                "schema": {
                    "type": "object",
                    "properties": {
                        "status": { "type": "string", "enum": ["on_task", "drifted"] },
                        "analysis": { "type": "string" },
                        "suggested_prompt": { "type": "string" },
                    },
                    "required": ["status", "analysis", "suggested_prompt"],
                    "additionalProperties": false,
                },
            },
        },
    })
}

fn parse_verdict(payload: &Value) -> CoreResult<ClassificationVerdict> {
    let content = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::MalformedResponse("missing message content".to_string()))?;
    serde_json::from_str(content).map_err(|err| CoreError::MalformedResponse(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn completion_payload(content: &str) -> Value {
        json!({
            "choices": [
                { "message": { "role": "assistant", "content": content } }
            ]
        })
    }

    #[test]
    fn request_body_carries_schema_and_low_detail_images() {
        let urls = vec![to_data_url(b"a"), to_data_url(b"b")];
        let body = build_request_body("gpt-4o-mini", "watch for drift", &urls);

        assert_eq!(body["temperature"], 0);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "watch for drift");

        let content = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3); // caption + two images
        assert_eq!(content[1]["image_url"]["detail"], "low");
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));

        let schema = &body["response_format"]["json_schema"]["schema"];
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(
            schema["required"],
            json!(["status", "analysis", "suggested_prompt"])
        );
    }

    #[test]
    fn parses_conforming_verdict() {
        let payload = completion_payload(
            r#"{"status":"drifted","analysis":"watching videos","suggested_prompt":"back to the editor?"}"#,
        );
        let verdict = parse_verdict(&payload).unwrap();
        assert_eq!(verdict.status, FocusStatus::Drifted);
        assert_eq!(verdict.analysis, "watching videos");
    }

    #[test]
    fn rejects_non_json_content() {
        let payload = completion_payload("the user seems fine");
        assert!(matches!(
            parse_verdict(&payload),
            Err(CoreError::MalformedResponse(_))
        ));
    }

    #[test]
    fn rejects_extra_or_missing_fields() {
        let extra = completion_payload(
            r#"{"status":"on_task","analysis":"","suggested_prompt":"","confidence":0.9}"#,
        );
        assert!(matches!(
            parse_verdict(&extra),
            Err(CoreError::MalformedResponse(_))
        ));

        let missing = completion_payload(r#"{"status":"on_task","analysis":""}"#);
        assert!(matches!(
            parse_verdict(&missing),
            Err(CoreError::MalformedResponse(_))
        ));
    }

    #[test]
    fn rejects_unknown_status_value() {
        let payload = completion_payload(
            r#"{"status":"asleep","analysis":"","suggested_prompt":""}"#,
        );
        assert!(matches!(
            parse_verdict(&payload),
            Err(CoreError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn analyze_with_no_captures_is_no_images_before_any_network() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ImageStore::new(dir.path()));
        let config = AppConfig {
            system_prompt: "p".to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
            api_key: Some("k".to_string()),
            model: "m".to_string(),
        };
        let client = ClassificationClient::new(config, store);

        assert!(matches!(client.analyze(10).await, Err(CoreError::NoImages)));
    }

    #[tokio::test]
    async fn analyze_without_key_fails_before_any_network() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ImageStore::new(dir.path()));
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
        bytes.extend_from_slice(b"frame");
        store
            .save(&bytes, "image/jpeg", chrono::Utc::now())
            .unwrap();

        let config = AppConfig {
            system_prompt: "p".to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
            api_key: None,
            model: "m".to_string(),
        };
        let client = ClassificationClient::new(config, Arc::new(ImageStore::new(dir.path())));

        assert!(matches!(
            client.analyze(10).await,
            Err(CoreError::MissingApiKey)
        ));
    }
}
