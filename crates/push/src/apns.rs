//! Apple Push Notification service provider.
//!
//! Uses token-based authentication: an ES256 JWT signed with the team's
//! `.p8` key, cached and refreshed before Apple's one hour limit.

use std::{
    collections::BTreeSet,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    courier_config::{ApnsConfig, ApnsEnvironment},
    p256::{
        ecdsa::{Signature, SigningKey, signature::Signer},
        pkcs8::DecodePrivateKey,
    },
    secrecy::ExposeSecret,
    serde::Serialize,
    tracing::debug,
};

use crate::{NotificationJob, Platform, ProviderError, PushProvider, Result};

const PRODUCTION_ENDPOINT: &str = "https://api.push.apple.com";
const SANDBOX_ENDPOINT: &str = "https://api.sandbox.push.apple.com";
const TOKEN_REFRESH: Duration = Duration::from_secs(50 * 60);
const NAME: &str = "apns";

#[derive(Serialize)]
struct ApnsBody<'a> {
    aps: Aps<'a>,
    #[serde(rename = "messageId")]
    message_id: &'a str,
    #[serde(rename = "dialogId")]
    dialog_id: &'a str,
}

#[derive(Serialize)]
struct Aps<'a> {
    alert: Alert<'a>,
    sound: &'static str,
    #[serde(rename = "thread-id", skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

#[derive(Serialize)]
struct Alert<'a> {
    title: &'a str,
    body: &'a str,
}

struct CachedToken {
    jwt: String,
    issued_at: Instant,
}

pub struct ApnsProvider {
    client: reqwest::Client,
    endpoint: String,
    key_id: String,
    team_id: String,
    topic: String,
    signing_key: std::result::Result<SigningKey, String>,
    token: Mutex<Option<CachedToken>>,
}

impl ApnsProvider {
    /// Build from config. Key problems surface through
    /// [`validate_config`](PushProvider::validate_config).
    pub fn new(config: &ApnsConfig) -> Self {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            match config.environment {
                ApnsEnvironment::Production => PRODUCTION_ENDPOINT,
                ApnsEnvironment::Sandbox => SANDBOX_ENDPOINT,
            }
            .to_string()
        });
        let signing_key = match &config.private_key_pem {
            Some(pem) => SigningKey::from_pkcs8_pem(pem.expose_secret())
                .map_err(|e| format!("private_key_pem is not a PKCS#8 P-256 key: {e}")),
            None => Err("private_key_pem is not set".to_string()),
        };
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            team_id: config.team_id.clone(),
            topic: config.topic.clone(),
            signing_key,
            token: Mutex::new(None),
        }
    }

    fn provider_token(&self) -> Result<String> {
        let key = self
            .signing_key
            .as_ref()
            .map_err(|message| ProviderError::configuration(NAME, message.clone()))?;
        let mut cached = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref()
            && token.issued_at.elapsed() < TOKEN_REFRESH
        {
            return Ok(token.jwt.clone());
        }

        let jwt = sign_token(key, &self.key_id, &self.team_id)?;
        debug!(key_id = %self.key_id, "minted apns provider token");
        *cached = Some(CachedToken {
            jwt: jwt.clone(),
            issued_at: Instant::now(),
        });
        Ok(jwt)
    }

    fn invalidate_token(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn sign_token(key: &SigningKey, key_id: &str, team_id: &str) -> Result<String> {
    let issued_at = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let header = serde_json::json!({ "alg": "ES256", "kid": key_id });
    let claims = serde_json::json!({ "iss": team_id, "iat": issued_at });
    let encode = |value: &serde_json::Value| {
        serde_json::to_vec(value)
            .map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
            .map_err(|e| ProviderError::external("encode apns token", e))
    };
    let signing_input = format!("{}.{}", encode(&header)?, encode(&claims)?);
    let signature: Signature = key.sign(signing_input.as_bytes());
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

#[async_trait]
impl PushProvider for ApnsProvider {
    fn provider_name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> BTreeSet<Platform> {
        BTreeSet::from([Platform::Ios])
    }

    fn validate_config(&self) -> Result<()> {
        for (field, value) in [
            ("key_id", &self.key_id),
            ("team_id", &self.team_id),
            ("topic", &self.topic),
        ] {
            if value.trim().is_empty() {
                return Err(ProviderError::configuration(NAME, format!("{field} is not set")));
            }
        }
        if let Err(message) = &self.signing_key {
            return Err(ProviderError::configuration(NAME, message.clone()));
        }
        Ok(())
    }

    async fn send(&self, job: &NotificationJob) -> Result<()> {
        let device_token = job.require_address()?;
        let token = self.provider_token()?;
        let body = ApnsBody {
            aps: Aps {
                alert: Alert {
                    title: &job.payload.title,
                    body: &job.payload.body,
                },
                sound: "default",
                thread_id: job.payload.thread_id.as_deref(),
            },
            message_id: &job.payload.message_id,
            dialog_id: &job.payload.dialog_id,
        };

        let response = self
            .client
            .post(format!("{}/3/device/{device_token}", self.endpoint))
            .header("authorization", format!("bearer {token}"))
            .header("apns-topic", &self.topic)
            .header("apns-push-type", "alert")
            .header("apns-priority", "10")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::external("apns request", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 403 && body.contains("ExpiredProviderToken") {
            self.invalidate_token();
        }
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
