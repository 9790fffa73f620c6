use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::SensorState;
use super::state::State;
use crate::engine::IntegrationContext;

/// Errors returned when routing a command to an integration
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("No integration named '{0}'")]
    UnknownIntegration(String),

    #[error("Integration '{0}' is no longer accepting commands")]
    ChannelClosed(String),
}

/// tariffd engine
///
/// This structure handles the flow of events from integrations, routes commands to the
/// correct integration, and maintains a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Handles for integration tasks
    integration_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Wait before the first setup retry; doubles after each failure
const SETUP_RETRY_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on the wait between setup retries
const SETUP_RETRY_MAX_DELAY: Duration = Duration::from_secs(300);

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            integration_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register integrations from configuration
    ///
    /// Runs every factory in the integration registry; factories return `None`
    /// when their integration is not configured.
    pub fn register_integrations_from_config(&self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process. A failed setup is retried with backoff
    /// until it succeeds or the engine shuts down; a refresh command retries
    /// it straight away.
    pub fn register_integration(&self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.insert(name.clone(), to_integration_tx);
        }

        let handle = tokio::spawn(async move {
            info!("Setting up integration '{}'", name);
            let mut delay = SETUP_RETRY_INITIAL_DELAY;
            while let Err(e) = integration.setup(from_integration_tx.clone()).await {
                warn!(
                    "Integration '{}' setup failed, retrying in {:?}: {}",
                    name, delay, e
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    msg = to_integration_rx.recv() => match msg {
                        Some(ToIntegrationMessage::Refresh) => {
                            debug!("Retrying setup of '{}' on request", name);
                        }
                        None => {
                            info!("Integration '{}' stopped before setup succeeded", name);
                            return;
                        }
                    },
                }

                delay = (delay * 2).min(SETUP_RETRY_MAX_DELAY);
            }
            info!("Integration '{}' is ready", name);

            // Process commands from engine until the channel closes
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        if let Ok(mut handles) = self.integration_handles.lock() {
            handles.push(handle);
        }
    }

    /// Names of all registered integrations
    pub fn integration_names(&self) -> Vec<String> {
        self.integration_channels
            .lock()
            .map(|channels| channels.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Send a command to an integration by name
    pub fn send_command(
        &self,
        integration_name: &str,
        msg: ToIntegrationMessage,
    ) -> Result<(), CommandError> {
        let channels = self
            .integration_channels
            .lock()
            .map_err(|_| CommandError::ChannelClosed(integration_name.to_string()))?;

        let tx = channels
            .get(integration_name)
            .ok_or_else(|| CommandError::UnknownIntegration(integration_name.to_string()))?;

        tx.send(msg)
            .map_err(|_| CommandError::ChannelClosed(integration_name.to_string()))
    }

    /// Ask an integration to refresh its data immediately
    pub fn request_refresh(&self, integration_name: &str) -> Result<(), CommandError> {
        self.send_command(integration_name, ToIntegrationMessage::Refresh)
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
    }

    /// Stop all integrations and wait for their tasks to finish.
    ///
    /// Dropping the command channels ends each integration's command loop, which
    /// then runs the integration's `shutdown`.
    pub async fn shutdown(&self) {
        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.clear();
        }

        let handles: Vec<JoinHandle<()>> = self
            .integration_handles
            .lock()
            .map(|mut handles| handles.drain(..).collect())
            .unwrap_or_default();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Integration task ended abnormally: {}", e);
            }
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    fn update_state(&self, f: impl FnOnce(&mut State)) {
        let mut state = State::clone(&self.state.load());
        f(&mut state);
        self.state.store(Arc::new(state));
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::SensorDiscovered {
                entity_id,
                description,
                integration_name,
            } => {
                info!(
                    "Sensor discovered: {} (from {})",
                    entity_id, integration_name
                );

                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.insert(entity_id.clone(), integration_name);
                }

                self.update_state(|state| {
                    state.sensors.insert(
                        entity_id,
                        SensorState {
                            name: description.name.to_string(),
                            unique_id: description.key.to_string(),
                            icon: description.icon.map(String::from),
                            device_class: description.device_class,
                            state_class: description.state_class,
                            value: None,
                            unit_of_measurement: None,
                            available: false,
                            last_updated: None,
                        },
                    );
                });
            }
            FromIntegrationMessage::SensorStateChanged {
                entity_id,
                value,
                unit_of_measurement,
                updated_at,
            } => {
                debug!(
                    "Sensor state changed: {} -> {:?} {:?}",
                    entity_id, value, unit_of_measurement
                );

                self.update_state(|state| match state.sensors.get_mut(&entity_id) {
                    Some(sensor) => {
                        sensor.value = value;
                        sensor.unit_of_measurement = unit_of_measurement;
                        sensor.available = true;
                        sensor.last_updated = Some(updated_at);
                    }
                    None => warn!("State change for unknown sensor: {}", entity_id),
                });
            }
            FromIntegrationMessage::UpdateFailed {
                integration_name,
                error,
            } => {
                warn!(
                    "Integration '{}' update failed, marking its sensors unavailable: {}",
                    integration_name, error
                );

                let owned: Vec<String> = self
                    .entity_integration_map
                    .lock()
                    .map(|map| {
                        map.iter()
                            .filter(|(_, owner)| **owner == integration_name)
                            .map(|(entity_id, _)| entity_id.clone())
                            .collect()
                    })
                    .unwrap_or_default();

                self.update_state(|state| {
                    for entity_id in &owned {
                        if let Some(sensor) = state.sensors.get_mut(entity_id) {
                            sensor.available = false;
                        }
                    }
                });
            }
            FromIntegrationMessage::DiagnosticsUpdated {
                integration_name,
                diagnostics,
            } => {
                debug!("Diagnostics updated for {}", integration_name);
                self.update_state(|state| {
                    state.diagnostics.insert(integration_name, diagnostics);
                });
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
