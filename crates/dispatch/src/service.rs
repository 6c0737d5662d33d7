//! Delivery service lifecycle.

use std::sync::Arc;

use {
    courier_admission::AdmissionController,
    courier_common::Message,
    courier_config::CourierConfig,
    courier_gate::{ContentGate, KeywordGate},
    courier_presence::PresenceRegistry,
    courier_push::{DeviceDirectory, NotificationRouter, PushProvider, providers_from_config},
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{
    Result,
    dispatcher::{DispatchSettings, Dispatcher},
    error::Context,
    events::DeliveryEventSink,
    outcome::SendOutcome,
};

/// A configured provider that did not make it into the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProvider {
    pub name: String,
    pub reason: String,
}

/// Owns the components for one process: the admission sweep, the provider
/// registry and the dispatcher wired to the injected collaborators.
pub struct DeliveryService {
    dispatcher: Dispatcher,
    skipped: Vec<SkippedProvider>,
}

impl DeliveryService {
    /// Build every component from `config` with the keyword content gate.
    /// Must run inside a tokio runtime; the admission sweep starts here.
    pub fn start(
        config: &CourierConfig,
        presence: Arc<dyn PresenceRegistry>,
        devices: Arc<dyn DeviceDirectory>,
    ) -> Result<Self> {
        let gate =
            KeywordGate::from_config(&config.gate).context("build keyword content gate")?;
        Ok(Self::start_with_gate(config, Arc::new(gate), presence, devices))
    }

    /// Like [`start`](Self::start) with a caller-supplied content gate.
    pub fn start_with_gate(
        config: &CourierConfig,
        gate: Arc<dyn ContentGate>,
        presence: Arc<dyn PresenceRegistry>,
        devices: Arc<dyn DeviceDirectory>,
    ) -> Self {
        let admission = AdmissionController::start(&config.admission);
        let router = Arc::new(NotificationRouter::new(&config.push));

        let mut skipped = Vec::new();
        for (name, built) in providers_from_config(&config.push) {
            let registered = built.and_then(|provider| router.register(provider));
            if let Err(error) = registered {
                warn!(provider = name, %error, "push provider skipped");
                skipped.push(SkippedProvider {
                    name: name.to_string(),
                    reason: error.to_string(),
                });
            }
        }

        let dispatcher = Dispatcher::new(
            gate,
            admission,
            presence,
            devices,
            Arc::clone(&router),
            DispatchSettings::from_config(config),
        );
        info!(
            providers = ?router.provider_names(),
            skipped = skipped.len(),
            "delivery service started"
        );
        Self {
            dispatcher,
            skipped,
        }
    }

    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn DeliveryEventSink>) -> Self {
        self.dispatcher = self.dispatcher.with_event_sink(sink);
        self
    }

    /// Register an extra provider after startup.
    pub fn register_provider(&self, provider: Arc<dyn PushProvider>) -> courier_push::Result<()> {
        self.dispatcher.router().register(provider)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.dispatcher.router().provider_names()
    }

    pub fn skipped_providers(&self) -> &[SkippedProvider] {
        &self.skipped
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn dispatch(&self, message: &Message) -> SendOutcome {
        self.dispatcher.dispatch(message).await
    }

    /// Stop background work. In-flight dispatches finish normally.
    pub fn shutdown(&self) {
        self.dispatcher.admission().shutdown();
        info!("delivery service stopped");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        courier_config::FcmConfig,
        courier_presence::ConnectionTable,
        courier_push::InMemoryDeviceDirectory,
    };

    #[tokio::test]
    async fn misconfigured_provider_is_skipped_and_service_starts() {
        let mut config = CourierConfig::default();
        config.push.fcm = Some(FcmConfig::default());

        let service = DeliveryService::start(
            &config,
            Arc::new(ConnectionTable::new()),
            Arc::new(InMemoryDeviceDirectory::new()),
        )
        .unwrap();

        assert!(service.provider_names().is_empty());
        assert_eq!(service.skipped_providers().len(), 1);
        assert_eq!(service.skipped_providers()[0].name, "fcm");
        assert!(service.dispatcher().admission().is_sweeping());

        service.shutdown();
        assert!(!service.dispatcher().admission().is_sweeping());
    }
}
