//! `courier send`: one-shot dispatch through an in-process connection table.

use std::{collections::BTreeSet, sync::Arc};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    clap::Args,
    courier_common::{Identity, Message},
    courier_config::CourierConfig,
    courier_dispatch::DeliveryService,
    courier_metrics::{MetricsRecorderConfig, init_metrics},
    courier_presence::ConnectionTable,
    courier_push::{DeviceRecord, InMemoryDeviceDirectory, NotificationJob, Platform, PushProvider},
    serde_json::{Value, json},
    tracing::info,
};

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Sender identity.
    #[arg(long)]
    from: String,
    /// Recipient identity (repeatable).
    #[arg(long, required = true)]
    to: Vec<String>,
    /// Message text.
    #[arg(long)]
    content: String,
    /// Recipient to treat as connected (repeatable).
    #[arg(long)]
    connected: Vec<String>,
    /// Device for an offline recipient: ID=PLATFORM[:ADDRESS].
    #[arg(long = "device", value_parser = parse_device)]
    devices: Vec<(String, DeviceRecord)>,
    /// Dialog the message belongs to.
    #[arg(long, default_value = "cli")]
    dialog: String,
    /// Message id; random when omitted.
    #[arg(long)]
    message_id: Option<String>,
    /// Log push jobs instead of requiring a configured provider.
    #[arg(long, default_value_t = false)]
    echo_push: bool,
    /// Print Prometheus metrics to stderr after the report.
    #[arg(long, default_value_t = false)]
    metrics: bool,
}

fn parse_platform(raw: &str) -> Result<Platform> {
    Ok(match raw.to_ascii_lowercase().as_str() {
        "ios" => Platform::Ios,
        "android" => Platform::Android,
        "web" => Platform::Web,
        "unknown" => Platform::Unknown,
        other => bail!("unknown platform \"{other}\" (expected ios, android, web or unknown)"),
    })
}

fn parse_device(raw: &str) -> std::result::Result<(String, DeviceRecord), String> {
    let (identity, target) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=PLATFORM[:ADDRESS], got \"{raw}\""))?;
    let (platform, address) = match target.split_once(':') {
        Some((platform, address)) => (platform, Some(address)),
        None => (target, None),
    };
    let platform = parse_platform(platform).map_err(|e| e.to_string())?;
    let record = match address {
        Some(address) => DeviceRecord::new(platform, address),
        None => DeviceRecord {
            platform,
            address: None,
        },
    };
    Ok((identity.to_string(), record))
}

/// Accepts every job and logs it.
struct EchoProvider;

#[async_trait]
impl PushProvider for EchoProvider {
    fn provider_name(&self) -> &str {
        "echo"
    }

    fn supported_channels(&self) -> BTreeSet<Platform> {
        BTreeSet::from([Platform::Ios, Platform::Android, Platform::Web])
    }

    fn validate_config(&self) -> courier_push::Result<()> {
        Ok(())
    }

    async fn send(&self, job: &NotificationJob) -> courier_push::Result<()> {
        info!(
            message_id = %job.message_id,
            recipient_id = %job.recipient_id,
            platform = %job.platform,
            title = %job.payload.title,
            body = %job.payload.body,
            "echo push"
        );
        Ok(())
    }
}

async fn run_send(config: &CourierConfig, args: &SendArgs) -> Result<Value> {
    let table = Arc::new(ConnectionTable::new());
    let mut receivers = Vec::with_capacity(args.connected.len());
    for id in &args.connected {
        let identity = Identity::new(id.as_str());
        let (_conn_id, rx) = table.connect(&identity).await;
        receivers.push((identity, rx));
    }

    let devices = Arc::new(InMemoryDeviceDirectory::new());
    for (id, record) in &args.devices {
        devices.register(Identity::new(id.as_str()), record.clone()).await;
    }

    let service = DeliveryService::start(config, table, devices)?;
    if args.echo_push {
        service.register_provider(Arc::new(EchoProvider))?;
    }

    let message_id = args
        .message_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let message = Message::new(
        message_id,
        args.dialog.as_str(),
        args.from.as_str(),
        args.content.as_str(),
    )
    .with_recipients(args.to.iter().map(String::as_str));
    message.validate()?;
    let outcome = service.dispatch(&message).await;
    service.shutdown();

    let mut frames = serde_json::Map::new();
    for (identity, mut rx) in receivers {
        let mut received = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            received.push(serde_json::from_str::<Value>(&raw)?);
        }
        frames.insert(identity.to_string(), Value::Array(received));
    }

    Ok(json!({
        "outcome": outcome,
        "frames": frames,
    }))
}

pub async fn handle_send(config: &CourierConfig, args: &SendArgs) -> Result<()> {
    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled || args.metrics,
        global_labels: config
            .metrics
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })?;

    let report = run_send(config, args).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.metrics {
        eprintln!("{}", metrics.render());
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::Parser};

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        send: SendArgs,
    }

    fn args(argv: &[&str]) -> SendArgs {
        Harness::try_parse_from(std::iter::once("send").chain(argv.iter().copied()))
            .unwrap()
            .send
    }

    #[test]
    fn parses_device_specs() {
        let (id, record) = parse_device("carol=ios:token-1").unwrap();
        assert_eq!(id, "carol");
        assert_eq!(record, DeviceRecord::new(Platform::Ios, "token-1"));

        let (_, bare) = parse_device("dave=WEB").unwrap();
        assert_eq!(bare.platform, Platform::Web);
        assert!(bare.address.is_none());

        assert!(parse_device("nobody").is_err());
        assert!(parse_device("eve=pager").is_err());
    }

    #[tokio::test]
    async fn reports_frames_and_push_outcomes() {
        let args = args(&[
            "--from", "alice", "--to", "bob", "--to", "carol", "--content", "hello", "--connected",
            "bob", "--device", "carol=android:tok", "--message-id", "m-1", "--echo-push",
        ]);
        let report = run_send(&CourierConfig::default(), &args).await.unwrap();

        assert_eq!(report["outcome"]["result"], "accepted");
        let deliveries = report["outcome"]["detail"]["deliveries"].as_array().unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[1]["recipientId"], "carol");
        assert_eq!(deliveries[1]["outcome"], "queued");
        assert_eq!(deliveries[1]["provider"], "echo");

        let bob_frames = report["frames"]["bob"].as_array().unwrap();
        assert_eq!(bob_frames.len(), 1);
        assert_eq!(bob_frames[0]["payload"]["id"], "m-1");
    }

    #[tokio::test]
    async fn rejected_message_reports_reason() {
        let mut config = CourierConfig::default();
        config.gate.spam.max_length = 3;
        let args = args(&["--from", "alice", "--to", "bob", "--content", "far too long"]);

        let report = run_send(&config, &args).await.unwrap();
        assert_eq!(report["outcome"]["result"], "rejected");
        assert_eq!(report["outcome"]["detail"]["kind"], "spam_detected");
    }
}
