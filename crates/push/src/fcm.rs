//! Firebase Cloud Messaging (HTTP v1) provider.

use std::collections::BTreeSet;

use {
    async_trait::async_trait,
    courier_config::FcmConfig,
    secrecy::{ExposeSecret, Secret},
    serde_json::json,
};

use crate::{NotificationJob, Platform, ProviderError, PushProvider, Result};

const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com";
const NAME: &str = "fcm";

pub struct FcmProvider {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    access_token: Option<Secret<String>>,
}

impl FcmProvider {
    pub fn new(config: &FcmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config
                .endpoint
                .as_deref()
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            project_id: config.project_id.clone(),
            access_token: config.access_token.clone(),
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint, self.project_id
        )
    }
}

fn message_body(job: &NotificationJob, registration_token: &str) -> serde_json::Value {
    let payload = &job.payload;
    let mut android = json!({ "priority": "high" });
    if let Some(collapse_key) = &payload.collapse_key {
        android["collapse_key"] = json!(collapse_key);
    }
    json!({
        "message": {
            "token": registration_token,
            "notification": { "title": payload.title, "body": payload.body },
            "data": { "messageId": payload.message_id, "dialogId": payload.dialog_id },
            "android": android,
        }
    })
}

#[async_trait]
impl PushProvider for FcmProvider {
    fn provider_name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> BTreeSet<Platform> {
        BTreeSet::from([Platform::Android])
    }

    fn validate_config(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(ProviderError::configuration(NAME, "project_id is not set"));
        }
        if self
            .access_token
            .as_ref()
            .is_none_or(|t| t.expose_secret().trim().is_empty())
        {
            return Err(ProviderError::configuration(NAME, "access_token is not set"));
        }
        Ok(())
    }

    async fn send(&self, job: &NotificationJob) -> Result<()> {
        let registration_token = job.require_address()?;
        let access_token = self
            .access_token
            .as_ref()
            .ok_or_else(|| ProviderError::configuration(NAME, "access_token is not set"))?;

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(access_token.expose_secret())
            .json(&message_body(job, registration_token))
            .send()
            .await
            .map_err(|e| ProviderError::external("fcm request", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::PushPayload, courier_common::Identity, mockito::Matcher};

    fn provider(endpoint: &str) -> FcmProvider {
        FcmProvider::new(&FcmConfig {
            project_id: "courier-test".into(),
            access_token: Some(Secret::new("ya29.token".into())),
            endpoint: Some(endpoint.to_string()),
            ..Default::default()
        })
    }

    fn job() -> NotificationJob {
        NotificationJob::new("m1", Identity::new("carol"), Platform::Android, PushPayload {
            title: "alice".into(),
            body: "hello".into(),
            message_id: "m1".into(),
            dialog_id: "d1".into(),
            collapse_key: Some("d1".into()),
            ..Default::default()
        })
        .with_address("regtoken")
    }

    #[test]
    fn validation_requires_credentials() {
        let unconfigured = FcmProvider::new(&FcmConfig::default());
        assert!(matches!(
            unconfigured.validate_config(),
            Err(ProviderError::Configuration { .. })
        ));
        provider("http://localhost").validate_config().unwrap();
    }

    #[tokio::test]
    async fn posts_v1_message_with_collapse_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/projects/courier-test/messages:send")
            .match_header("authorization", "Bearer ya29.token")
            .match_body(Matcher::PartialJson(json!({
                "message": {
                    "token": "regtoken",
                    "notification": { "title": "alice", "body": "hello" },
                    "android": { "collapse_key": "d1" },
                }
            })))
            .with_status(200)
            .with_body(r#"{"name":"projects/courier-test/messages/1"}"#)
            .create_async()
            .await;

        provider(&server.url()).send(&job()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unregistered_token_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/projects/courier-test/messages:send")
            .with_status(404)
            .with_body(r#"{"error":{"status":"NOT_FOUND","details":[{"errorCode":"UNREGISTERED"}]}}"#)
            .create_async()
            .await;

        let error = provider(&server.url()).send(&job()).await.unwrap_err();
        assert!(error.is_gone());
        match error {
            ProviderError::Rejected { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("UNREGISTERED"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
