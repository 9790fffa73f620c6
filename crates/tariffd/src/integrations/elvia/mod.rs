mod client;
mod coordinator;
mod diagnostics;
// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod elvia;
#[cfg(test)]
mod fixtures;
mod models;
mod sensor;

use anyhow::Context;
use chrono::Utc;
pub use client::ElviaApi;
pub use client::ReqwestClient;
pub use coordinator::Coordinator;
pub use coordinator::TariffAttributes;
pub use elvia::ElviaIntegration;
pub use elvia::INTEGRATION_NAME;
use linkme::distributed_slice;
pub use models::GridTariff;
pub use models::TariffQuery;
pub use models::TariffRange;
pub use models::TariffType;

use crate::config::ElviaConfig;
use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_elvia(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let elvia_config = if let Some(c) = &ctx.config.integrations.elvia {
        c
    } else {
        return Ok(None);
    };

    let client = ReqwestClient::new(elvia_config).context("Failed to create Elvia API client")?;
    Ok(Some(Box::new(ElviaIntegration::new(client, elvia_config))))
}

/// Check that the API is reachable and accepts the configured key
pub async fn check(config: &ElviaConfig) -> anyhow::Result<()> {
    let client = ReqwestClient::new(config).context("Failed to create Elvia API client")?;
    client.ping().await.context("Elvia API is not reachable")?;
    client
        .secure()
        .await
        .context("Elvia API rejected the API key")?;
    Ok(())
}

/// Refresh once and return the diagnostics dump, whether or not the refresh
/// succeeded
pub async fn fetch_diagnostics(config: &ElviaConfig) -> anyhow::Result<serde_json::Value> {
    let client = ReqwestClient::new(config).context("Failed to create Elvia API client")?;
    let mut coordinator = Coordinator::new(client, config);
    // Failures are recorded in the dump
    let _ = coordinator.refresh(Utc::now()).await;
    Ok(diagnostics::collect(&coordinator))
}

pub async fn tariff_types(config: &ElviaConfig) -> anyhow::Result<Vec<TariffType>> {
    let client = ReqwestClient::new(config).context("Failed to create Elvia API client")?;
    client
        .tariff_types()
        .await
        .context("Failed to fetch tariff types")
}

pub async fn tariff_query(config: &ElviaConfig, query: &TariffQuery) -> anyhow::Result<GridTariff> {
    let client = ReqwestClient::new(config).context("Failed to create Elvia API client")?;
    client
        .tariff_query(query)
        .await
        .with_context(|| format!("Failed to query tariff '{}'", query.tariff_key))
}
