use std::error::Error;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::mpsc;

use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use crate::config::Config;

/// Sensor announcements, readings and failures flow to the engine over a
/// bounded channel, so a stalled engine slows polling down
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Refresh requests from the engine; unbounded so an API handler never waits
/// on a busy integration
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

/// `Ok(None)` when the integration has no config section
pub type IntegrationFactoryResult = anyhow::Result<Option<Box<dyn Integration>>>;

/// What a factory in [`REGISTRY`] gets to build its integration from
pub struct IntegrationContext<'a> {
    pub config: &'a Config,
}

/// Integration factories, collected at link time from each enabled
/// `integration_*` feature
#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// A polled data source that publishes sensors
///
/// The engine drives each integration from its own task: `setup` until it
/// succeeds, then `handle_message` for every command, then `shutdown` once
/// the engine stops.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Name used in sensor ownership, diagnostics and the refresh endpoint
    fn name(&self) -> &str;

    /// Fetch the first data, announce sensors and start polling.
    ///
    /// An error means nothing was announced. The engine calls `setup` again
    /// after a backoff, so it must leave the integration ready for another
    /// attempt.
    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>>;

    /// React to an engine command such as [`ToIntegrationMessage::Refresh`].
    /// Only called after a successful `setup`.
    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// Stop polling. Not called when `setup` never succeeded.
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}
