// client.rs
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::signature::app_secret_proof;

pub const DEFAULT_API: &str = "https://graph.facebook.com/v2.10";

const PROFILE_FIELDS: &str = "first_name,locale,timezone";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Page access token.
    pub token: String,
    /// App secret, used for the `appsecret_proof`.
    pub secret: String,
    /// Overrides the Graph API base URL.
    pub api: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Facebook error: {message}")]
    Api {
        message: String,
        kind: String,
        code: i64,
        trace_id: String,
    },

    #[error("unexpected response status: {0}")]
    Status(StatusCode),

    #[error("invalid JSON in response: {0}")]
    Json(#[from] serde_json::Error),
}

/// A text quick reply offered below a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Text on the button.
    pub text: String,
    /// Sent back in a payload event when tapped.
    pub payload: String,
}

impl Reply {
    pub fn new(text: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            payload: payload.into(),
        }
    }
}

/// A button of a button template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Button {
    #[serde(rename = "type")]
    kind: &'static str,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webview_share_button: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    messenger_extensions: bool,
}

impl Button {
    /// Posts `payload` back to the bot.
    pub fn payload(title: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: "postback",
            title: title.into(),
            payload: Some(payload.into()),
            url: None,
            webview_share_button: None,
            messenger_extensions: false,
        }
    }

    /// Opens `url` in a full-screen webview.
    pub fn url(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: "web_url",
            title: title.into(),
            payload: None,
            url: Some(url.into()),
            webview_share_button: Some("hide"),
            messenger_extensions: true,
        }
    }

    /// Opens `url` in the browser.
    pub fn link(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            messenger_extensions: false,
            ..Self::url(title, url)
        }
    }
}

/// A localized bot description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Greeting {
    /// Five characters like "en_US", or "default".
    pub locale: String,
    /// At most 160 characters.
    pub text: String,
}

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub first_name: String,
    /// Locale in the form "en_GB".
    #[serde(default)]
    pub locale: String,
    /// Offset from UTC in hours.
    #[serde(default)]
    pub timezone: f64,
}

#[derive(Serialize)]
struct QuickReplyOption<'a> {
    content_type: &'static str,
    title: &'a str,
    payload: &'a str,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    fbtrace_id: String,
}

#[derive(Debug, Clone)]
pub struct MessengerClient {
    client: Client,
    token: String,
    secret_proof: String,
    api: String,
}

impl MessengerClient {
    pub fn new(config: ClientConfig) -> Self {
        let api = config
            .api
            .as_deref()
            .map(|a| a.trim_end_matches('/'))
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_API)
            .to_string();

        Self {
            client: Client::new(),
            secret_proof: app_secret_proof(&config.secret, &config.token),
            token: config.token,
            api,
        }
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    /// Sends a text message with optional quick replies.
    pub async fn send(&self, id: i64, text: &str, replies: &[Reply]) -> Result<(), ClientError> {
        let mut message = json!({ "text": text });
        if !replies.is_empty() {
            message["quick_replies"] = json!(quick_replies(replies));
        }
        self.send_message(id, message).await
    }

    /// Sends a button template with optional quick replies.
    pub async fn send_with_buttons(
        &self,
        id: i64,
        text: &str,
        replies: &[Reply],
        buttons: &[Button],
    ) -> Result<(), ClientError> {
        let mut message = json!({
            "attachment": {
                "type": "template",
                "payload": {
                    "template_type": "button",
                    "text": text,
                    "buttons": buttons,
                }
            }
        });
        if !replies.is_empty() {
            message["quick_replies"] = json!(quick_replies(replies));
        }
        self.send_message(id, message).await
    }

    async fn send_message(&self, id: i64, message: serde_json::Value) -> Result<(), ClientError> {
        let url = format!("{}/me/messages", self.api);
        let payload = json!({
            "recipient": { "id": id.to_string() },
            "message": message,
        });

        debug!(recipient = id, "Sending message");
        let response = self
            .client
            .post(&url)
            .query(&self.auth())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let body = response.bytes().await?;
        match check_error(&body) {
            Err(e @ ClientError::Api { .. }) => Err(e),
            _ => Err(ClientError::Status(status)),
        }
    }

    /// Fetches the public profile of a user.
    pub async fn get_profile(&self, id: i64) -> Result<Profile, ClientError> {
        let url = format!("{}/{}", self.api, id);
        let response = self
            .client
            .get(&url)
            .query(&[("fields", PROFILE_FIELDS)])
            .query(&self.auth())
            .send()
            .await?;

        let body = response.bytes().await?;
        check_error(&body)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Sets the texts shown before a user starts a conversation.
    ///
    /// Include a "default" locale as fallback.
    pub async fn set_greetings(&self, greetings: &[Greeting]) -> Result<(), ClientError> {
        let setting = if greetings.is_empty() {
            json!({})
        } else {
            json!({ "greeting": greetings })
        };
        self.post_setting(setting).await
    }

    /// Shows a Get Started button to new users; tapping it sends a
    /// postback with `payload`.
    pub async fn set_get_started_payload(&self, payload: &str) -> Result<(), ClientError> {
        let get_started = if payload.is_empty() {
            json!({})
        } else {
            json!({ "payload": payload })
        };
        self.post_setting(json!({ "get_started": get_started })).await
    }

    async fn post_setting(&self, setting: serde_json::Value) -> Result<(), ClientError> {
        let url = format!("{}/me/messenger_profile", self.api);
        let response = self
            .client
            .post(&url)
            .query(&self.auth())
            .json(&setting)
            .send()
            .await?;

        let body = response.bytes().await?;
        check_error(&body)
    }

    fn auth(&self) -> [(&'static str, &str); 2] {
        [
            ("access_token", self.token.as_str()),
            ("appsecret_proof", self.secret_proof.as_str()),
        ]
    }
}

fn quick_replies(replies: &[Reply]) -> Vec<QuickReplyOption<'_>> {
    replies
        .iter()
        .map(|r| QuickReplyOption {
            content_type: "text",
            title: &r.text,
            payload: &r.payload,
        })
        .collect()
}

/// Fails with the platform's error envelope if the body carries one.
fn check_error(body: &[u8]) -> Result<(), ClientError> {
    let envelope: ErrorEnvelope = serde_json::from_slice(body)?;
    match envelope.error {
        Some(e) => Err(ClientError::Api {
            message: e.message,
            kind: e.kind,
            code: e.code,
            trace_id: e.fbtrace_id,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MessengerClient {
        MessengerClient::new(ClientConfig {
            token: "page-token".to_string(),
            secret: "app-secret".to_string(),
            api: Some(format!("{}/", server.uri())),
        })
    }

    fn proof() -> String {
        app_secret_proof("app-secret", "page-token")
    }

    fn error_body() -> serde_json::Value {
        json!({
            "error": {
                "message": "(#100) No matching user found",
                "type": "OAuthException",
                "code": 100,
                "fbtrace_id": "H2gk"
            }
        })
    }

    #[test]
    fn test_default_api() {
        let client = MessengerClient::new(ClientConfig {
            token: "t".to_string(),
            secret: "s".to_string(),
            api: None,
        });
        assert_eq!(client.api(), DEFAULT_API);
    }

    #[test]
    fn test_api_trailing_slash_is_trimmed() {
        let client = MessengerClient::new(ClientConfig {
            token: "t".to_string(),
            secret: "s".to_string(),
            api: Some("http://localhost:9000/v2.10/".to_string()),
        });
        assert_eq!(client.api(), "http://localhost:9000/v2.10");
    }

    #[test]
    fn test_button_serialization() {
        assert_eq!(
            serde_json::to_value(Button::payload("Start", "START")).unwrap(),
            json!({ "type": "postback", "title": "Start", "payload": "START" })
        );
        assert_eq!(
            serde_json::to_value(Button::url("Open", "https://x")).unwrap(),
            json!({
                "type": "web_url",
                "title": "Open",
                "url": "https://x",
                "webview_share_button": "hide",
                "messenger_extensions": true
            })
        );
        assert_eq!(
            serde_json::to_value(Button::link("Open", "https://x")).unwrap(),
            json!({
                "type": "web_url",
                "title": "Open",
                "url": "https://x",
                "webview_share_button": "hide"
            })
        );
    }

    #[tokio::test]
    async fn test_send_with_quick_replies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .and(query_param("access_token", "page-token"))
            .and(query_param("appsecret_proof", proof()))
            .and(body_json(json!({
                "recipient": { "id": "1254459154682919" },
                "message": {
                    "text": "Continue?",
                    "quick_replies": [
                        { "content_type": "text", "title": "Yes", "payload": "YES" },
                        { "content_type": "text", "title": "No", "payload": "NO" }
                    ]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "recipient_id": "1254459154682919",
                "message_id": "mid.1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let replies = [Reply::new("Yes", "YES"), Reply::new("No", "NO")];
        client_for(&server)
            .send(1254459154682919, "Continue?", &replies)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_without_replies_omits_them() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .and(body_json(json!({
                "recipient": { "id": "7" },
                "message": { "text": "hi" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).send(7, "hi", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_with_buttons() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .and(body_json(json!({
                "recipient": { "id": "7" },
                "message": {
                    "attachment": {
                        "type": "template",
                        "payload": {
                            "template_type": "button",
                            "text": "Pick one",
                            "buttons": [
                                { "type": "postback", "title": "A", "payload": "A" },
                                {
                                    "type": "web_url",
                                    "title": "Docs",
                                    "url": "https://x/docs",
                                    "webview_share_button": "hide"
                                }
                            ]
                        }
                    },
                    "quick_replies": [
                        { "content_type": "text", "title": "Later", "payload": "LATER" }
                    ]
                }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .send_with_buttons(
                7,
                "Pick one",
                &[Reply::new("Later", "LATER")],
                &[Button::payload("A", "A"), Button::link("Docs", "https://x/docs")],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_surfaces_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_json(error_body()))
            .mount(&server)
            .await;

        let err = client_for(&server).send(7, "hi", &[]).await.unwrap_err();
        match err {
            ClientError::Api {
                message,
                kind,
                code,
                trace_id,
            } => {
                assert_eq!(message, "(#100) No matching user found");
                assert_eq!(kind, "OAuthException");
                assert_eq!(code, 100);
                assert_eq!(trace_id, "H2gk");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_non_json_failure_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).send(7, "hi", &[]).await.unwrap_err();
        assert!(matches!(err, ClientError::Status(StatusCode::BAD_GATEWAY)));
    }

    #[tokio::test]
    async fn test_get_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1254459154682919"))
            .and(query_param("fields", PROFILE_FIELDS))
            .and(query_param("access_token", "page-token"))
            .and(query_param("appsecret_proof", proof()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "first_name": "Peter",
                "locale": "de_DE",
                "timezone": 5.5,
                "id": "1254459154682919"
            })))
            .mount(&server)
            .await;

        let profile = client_for(&server)
            .get_profile(1254459154682919)
            .await
            .unwrap();
        assert_eq!(
            profile,
            Profile {
                first_name: "Peter".to_string(),
                locale: "de_DE".to_string(),
                timezone: 5.5,
            }
        );
    }

    #[tokio::test]
    async fn test_get_profile_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/7"))
            .respond_with(ResponseTemplate::new(400).set_body_json(error_body()))
            .mount(&server)
            .await;

        let err = client_for(&server).get_profile(7).await.unwrap_err();
        assert_eq!(err.to_string(), "Facebook error: (#100) No matching user found");
    }

    #[tokio::test]
    async fn test_set_greetings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messenger_profile"))
            .and(query_param("appsecret_proof", proof()))
            .and(body_json(json!({
                "greeting": [
                    { "locale": "default", "text": "Hello!" },
                    { "locale": "de_DE", "text": "Hallo!" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "success" })))
            .expect(1)
            .mount(&server)
            .await;

        let greetings = [
            Greeting {
                locale: "default".to_string(),
                text: "Hello!".to_string(),
            },
            Greeting {
                locale: "de_DE".to_string(),
                text: "Hallo!".to_string(),
            },
        ];
        client_for(&server).set_greetings(&greetings).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_get_started_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messenger_profile"))
            .and(body_json(json!({ "get_started": { "payload": "GET_STARTED" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "success" })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .set_get_started_payload("GET_STARTED")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_setting_error_envelope_on_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messenger_profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(error_body()))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .set_get_started_payload("GET_STARTED")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api { code: 100, .. }));
    }
}
