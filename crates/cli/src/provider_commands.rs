use {
    anyhow::Result,
    courier_config::CourierConfig,
    courier_push::{Platform, providers_from_config},
};

/// One row of `courier providers`.
#[derive(Debug, PartialEq, Eq)]
pub struct ProviderStatus {
    pub name: &'static str,
    pub platforms: Vec<Platform>,
    /// `None` when the provider would register.
    pub problem: Option<String>,
}

/// Build and validate every enabled provider without sending anything.
pub fn provider_statuses(config: &CourierConfig) -> Vec<ProviderStatus> {
    providers_from_config(&config.push)
        .into_iter()
        .map(|(name, built)| match built {
            Ok(provider) => ProviderStatus {
                name,
                platforms: provider.supported_channels().into_iter().collect(),
                problem: provider.validate_config().err().map(|e| e.to_string()),
            },
            Err(error) => ProviderStatus {
                name,
                platforms: Vec::new(),
                problem: Some(error.to_string()),
            },
        })
        .collect()
}

pub fn handle_providers(config: &CourierConfig) -> Result<()> {
    let statuses = provider_statuses(config);
    if statuses.is_empty() {
        println!("No push providers enabled.");
        return Ok(());
    }
    for status in &statuses {
        let platforms: Vec<&str> = status.platforms.iter().map(|p| p.as_str()).collect();
        match &status.problem {
            None => println!("  {:<10} ready    [{}]", status.name, platforms.join(", ")),
            Some(problem) => println!("  {:<10} skipped  {problem}", status.name),
        }
    }
    Ok(())
}
