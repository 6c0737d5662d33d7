//! Push notification channel adapter.
//!
//! Heterogeneous backends (APNs, FCM, Web Push) sit behind [`PushProvider`].
//! The [`NotificationRouter`] picks a provider per job by [`Platform`],
//! dedupes jobs on `(messageId, recipientId)`, bounds every call with a
//! timeout and reports per-job outcomes.

#[cfg(feature = "apns")]
pub mod apns;
pub mod directory;
pub mod error;
#[cfg(feature = "fcm")]
pub mod fcm;
pub mod job;
pub mod ledger;
pub mod provider;
pub mod router;
#[cfg(feature = "web-push")]
pub mod web;

use std::sync::Arc;

use courier_config::PushConfig;

pub use {
    directory::{DeviceDirectory, DeviceRecord, InMemoryDeviceDirectory},
    error::{ProviderError, Result},
    job::{JobKey, NotificationJob, Platform, PushPayload},
    ledger::JobLedger,
    provider::PushProvider,
    router::{JobReport, JobStatus, NotificationRouter},
};

/// Instantiate every provider enabled in `config`, in registration order
/// (APNs, FCM, Web Push), paired with its name. Entries are `Err` when the
/// provider cannot be built at all, e.g. support was not compiled in.
pub fn providers_from_config(
    config: &PushConfig,
) -> Vec<(&'static str, Result<Arc<dyn PushProvider>>)> {
    let mut providers = Vec::new();

    if let Some(apns) = config.apns.as_ref().filter(|c| c.enabled) {
        #[cfg(feature = "apns")]
        providers.push((
            "apns",
            Ok(Arc::new(apns::ApnsProvider::new(apns)) as Arc<dyn PushProvider>),
        ));
        #[cfg(not(feature = "apns"))]
        {
            let _ = apns;
            providers.push(("apns", Err(not_compiled("apns"))));
        }
    }

    if let Some(fcm) = config.fcm.as_ref().filter(|c| c.enabled) {
        #[cfg(feature = "fcm")]
        providers.push((
            "fcm",
            Ok(Arc::new(fcm::FcmProvider::new(fcm)) as Arc<dyn PushProvider>),
        ));
        #[cfg(not(feature = "fcm"))]
        {
            let _ = fcm;
            providers.push(("fcm", Err(not_compiled("fcm"))));
        }
    }

    if let Some(web) = config.web_push.as_ref().filter(|c| c.enabled) {
        #[cfg(feature = "web-push")]
        providers.push((
            "web-push",
            web::WebPushProvider::new(web).map(|p| Arc::new(p) as Arc<dyn PushProvider>),
        ));
        #[cfg(not(feature = "web-push"))]
        {
            let _ = web;
            providers.push(("web-push", Err(not_compiled("web-push"))));
        }
    }

    providers
}

#[allow(dead_code)]
fn not_compiled(provider: &str) -> ProviderError {
    ProviderError::configuration(provider, "support not compiled in")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        courier_config::{ApnsConfig, FcmConfig},
    };

    #[test]
    fn nothing_enabled_builds_nothing() {
        assert!(providers_from_config(&PushConfig::default()).is_empty());
    }

    #[cfg(all(feature = "apns", feature = "fcm"))]
    #[test]
    fn enabled_providers_in_order() {
        let config = PushConfig {
            apns: Some(ApnsConfig::default()),
            fcm: Some(FcmConfig::default()),
            ..Default::default()
        };
        let names: Vec<String> = providers_from_config(&config)
            .into_iter()
            .map(|(name, p)| {
                assert_eq!(p.unwrap().provider_name(), name);
                name.to_string()
            })
            .collect();
        assert_eq!(names, vec!["apns", "fcm"]);
    }

    #[test]
    fn disabled_provider_is_skipped() {
        let config = PushConfig {
            fcm: Some(FcmConfig {
                enabled: false,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(providers_from_config(&config).is_empty());
    }
}
