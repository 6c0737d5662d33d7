//! Message delivery core.
//!
//! Each accepted message passes a content gate and per-sender admission,
//! then its recipients are split by presence: connected recipients get a
//! live event frame, everyone else a push notification. The sender gets a
//! [`SendOutcome`] either way.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod outcome;
pub mod payload;
pub mod service;

pub use {
    dispatcher::{DispatchSettings, Dispatcher, Partition, partition},
    error::{Error, Result},
    events::{DeliveryEvent, DeliveryEventSink},
    outcome::{
        Channel, DeliveryOutcome, DispatchReport, RecipientDelivery, Rejection, SendOutcome, Stage,
    },
    payload::{MESSAGE_EVENT, PayloadOptions},
    service::{DeliveryService, SkippedProvider},
};
