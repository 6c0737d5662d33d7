//! Configuration loading, validation, and env substitution.
//!
//! Config files: `courier.toml`, `courier.yaml`, or `courier.json`
//! Searched in `./` then `~/.config/courier/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config, load_or_discover},
    schema::{
        AdmissionConfig, ApnsConfig, ApnsEnvironment, CourierConfig, DispatchConfig, FcmConfig,
        GateConfig, MetricsConfig, ModerationRule, PushConfig, SpamConfig, WebPushConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_file},
};
