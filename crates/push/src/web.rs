//! Web Push (VAPID) provider for browser subscriptions.
//!
//! A job's address is the browser's `PushSubscription` serialized as JSON.

use std::collections::BTreeSet;

use {
    async_trait::async_trait,
    courier_config::WebPushConfig,
    p256::{SecretKey, pkcs8::DecodePrivateKey},
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
    web_push::{
        ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder,
        WebPushClient, WebPushError, WebPushMessageBuilder,
    },
};

use crate::{NotificationJob, Platform, ProviderError, PushProvider, Result};

const NAME: &str = "web-push";

pub struct WebPushProvider {
    client: Box<dyn WebPushClient + Send + Sync>,
    vapid_private_key_pem: Option<Secret<String>>,
    ttl_secs: u32,
}

impl WebPushProvider {
    pub fn new(config: &WebPushConfig) -> Result<Self> {
        let client = IsahcWebPushClient::new()
            .map_err(|e| ProviderError::external("create web push client", e))?;
        Ok(Self {
            client: Box::new(client),
            vapid_private_key_pem: config.vapid_private_key_pem.clone(),
            ttl_secs: config.ttl_secs,
        })
    }

    fn vapid_pem(&self) -> Result<&str> {
        self.vapid_private_key_pem
            .as_ref()
            .map(|pem| pem.expose_secret().as_str())
            .filter(|pem| !pem.trim().is_empty())
            .ok_or_else(|| ProviderError::configuration(NAME, "vapid_private_key_pem is not set"))
    }
}

/// 404/410 from the push service mean the subscription is gone.
fn into_provider_error(error: WebPushError) -> ProviderError {
    let kind = format!("{error:?}");
    if kind.starts_with("EndpointNotFound") || kind.starts_with("EndpointNotValid") {
        return ProviderError::Rejected {
            status: 410,
            body: error.to_string(),
        };
    }
    ProviderError::external("web push", error)
}

#[async_trait]
impl PushProvider for WebPushProvider {
    fn provider_name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> BTreeSet<Platform> {
        BTreeSet::from([Platform::Web])
    }

    fn validate_config(&self) -> Result<()> {
        let pem = self.vapid_pem()?;
        // VAPID keys come as PKCS#8 or SEC1 PEM; both must be P-256.
        if SecretKey::from_pkcs8_pem(pem).is_err() && SecretKey::from_sec1_pem(pem).is_err() {
            return Err(ProviderError::configuration(
                NAME,
                "vapid_private_key_pem is not a P-256 private key",
            ));
        }
        Ok(())
    }

    async fn send(&self, job: &NotificationJob) -> Result<()> {
        let subscription: SubscriptionInfo = serde_json::from_str(job.require_address()?)
            .map_err(|e| ProviderError::external("parse web push subscription", e))?;
        let payload = serde_json::to_vec(&job.payload)
            .map_err(|e| ProviderError::external("encode web push payload", e))?;

        let signature = VapidSignatureBuilder::from_pem(self.vapid_pem()?.as_bytes(), &subscription)
            .map_err(into_provider_error)?
            .build()
            .map_err(into_provider_error)?;

        let mut builder = WebPushMessageBuilder::new(&subscription);
        builder.set_ttl(self.ttl_secs);
        builder.set_payload(ContentEncoding::Aes128Gcm, &payload);
        builder.set_vapid_signature(signature);
        let message = builder.build().map_err(into_provider_error)?;

        self.client
            .send(message)
            .await
            .map_err(into_provider_error)?;
        debug!(endpoint = %subscription.endpoint, "sent web push notification");
        Ok(())
    }
}
