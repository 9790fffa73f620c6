use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;

use super::client::ElviaApi;
use super::coordinator::Coordinator;
use super::coordinator::TariffData;
use super::coordinator::UpdateFailed;
use super::diagnostics;
use super::sensor::SENSORS;
use crate::config::ElviaConfig;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

pub const INTEGRATION_NAME: &str = "elvia";

type SendError = mpsc::error::SendError<FromIntegrationMessage>;

/// Elvia grid tariff integration for tariffd
///
/// Fetches once during setup, then polls on the configured interval from a
/// background task. Refresh commands wake the task early. Between fetches
/// the sensors move to the next price period when the current one ends.
pub struct ElviaIntegration<C: ElviaApi> {
    /// Present until a successful setup hands it to the polling task
    coordinator: Option<Coordinator<C>>,
    clock: fn() -> DateTime<Utc>,
    refresh_tx: Option<mpsc::Sender<()>>,
    poll_task: Option<JoinHandle<()>>,
}

impl<C: ElviaApi + 'static> ElviaIntegration<C> {
    pub fn new(client: C, config: &ElviaConfig) -> Self {
        Self {
            coordinator: Some(Coordinator::new(client, config)),
            clock: Utc::now,
            refresh_tx: None,
            poll_task: None,
        }
    }

    /// Use `clock` instead of the system time to pick the current price period
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Report the outcome of a refresh to the engine
    async fn publish(
        coordinator: &Coordinator<C>,
        tx: &FromIntegrationSender,
        outcome: &Result<Arc<TariffData>, UpdateFailed>,
    ) -> Result<(), SendError> {
        match outcome {
            Ok(data) => {
                for sensor in &SENSORS {
                    tx.send(FromIntegrationMessage::SensorStateChanged {
                        entity_id: sensor.entity_id(),
                        value: sensor.value(&data.attributes),
                        unit_of_measurement: sensor.unit(&data.attributes),
                        updated_at: data.as_of,
                    })
                    .await?;
                }
            }
            Err(e) => {
                tx.send(FromIntegrationMessage::UpdateFailed {
                    integration_name: INTEGRATION_NAME.to_string(),
                    error: e.to_string(),
                })
                .await?;
            }
        }

        tx.send(FromIntegrationMessage::DiagnosticsUpdated {
            integration_name: INTEGRATION_NAME.to_string(),
            diagnostics: diagnostics::collect(coordinator),
        })
        .await
    }

    /// Refresh on every interval tick or refresh request until the request
    /// channel closes or the engine goes away. When a price period starts or
    /// ends, republish from the cached tariff without fetching.
    async fn poll(
        mut coordinator: Coordinator<C>,
        clock: fn() -> DateTime<Utc>,
        tx: FromIntegrationSender,
        mut refresh_rx: mpsc::Receiver<()>,
    ) {
        let period = coordinator.update_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let now = clock();
            let until_period_change = coordinator
                .next_period_change(now)
                .and_then(|at| (at - now).to_std().ok());
            let period_change = async move {
                match until_period_change {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending().await,
                }
            };

            let outcome = tokio::select! {
                _ = ticker.tick() => {
                    debug!("Scheduled Elvia refresh");
                    coordinator.refresh(clock()).await
                }
                request = refresh_rx.recv() => {
                    if request.is_none() {
                        break;
                    }
                    debug!("Requested Elvia refresh");
                    coordinator.refresh(clock()).await
                }
                _ = period_change => {
                    let Some(data) = coordinator.reproject(clock()) else {
                        continue;
                    };
                    debug!("Price period changed, republishing Elvia sensors");
                    Ok(data)
                }
            };

            if Self::publish(&coordinator, &tx, &outcome).await.is_err() {
                debug!("Engine channel closed, stopping Elvia polling");
                break;
            }
        }
    }
}

fn boxed<E: Error + Send + 'static>(e: E) -> Box<dyn Error + Send> {
    Box::new(e)
}

#[async_trait]
impl<C: ElviaApi + 'static> Integration for ElviaIntegration<C> {
    fn name(&self) -> &str {
        INTEGRATION_NAME
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        let mut coordinator = self.coordinator.take().ok_or_else(|| {
            boxed(std::io::Error::other("Elvia integration is already set up"))
        })?;

        // Not ready until the first fetch succeeds
        let first = match coordinator.refresh((self.clock)()).await {
            Ok(first) => first,
            Err(e) => {
                let _ = tx
                    .send(FromIntegrationMessage::DiagnosticsUpdated {
                        integration_name: INTEGRATION_NAME.to_string(),
                        diagnostics: diagnostics::collect(&coordinator),
                    })
                    .await;
                // Kept for the engine's next setup attempt
                self.coordinator = Some(coordinator);
                return Err(boxed(e));
            }
        };

        for sensor in &SENSORS {
            tx.send(FromIntegrationMessage::SensorDiscovered {
                entity_id: sensor.entity_id(),
                description: sensor.description.clone(),
                integration_name: INTEGRATION_NAME.to_string(),
            })
            .await
            .map_err(boxed)?;
        }

        Self::publish(&coordinator, &tx, &Ok(first))
            .await
            .map_err(boxed)?;

        info!(
            "Elvia integration ready, polling every {} minutes",
            coordinator.update_interval().as_secs() / 60
        );

        // One pending request is enough; further requests coalesce into it
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let clock = self.clock;
        self.refresh_tx = Some(refresh_tx);
        self.poll_task = Some(tokio::spawn(Self::poll(
            coordinator,
            clock,
            tx,
            refresh_rx,
        )));

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::Refresh => {
                let Some(refresh_tx) = &self.refresh_tx else {
                    return Err(boxed(std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        "Elvia integration is not running",
                    )));
                };
                match refresh_tx.try_send(()) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
                    Err(e) => Err(boxed(e)),
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Elvia integration shutting down");
        self.refresh_tx = None;
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::config::DEFAULT_ELVIA_API_URL;
    use crate::engine::SensorValue;
    use crate::integrations::elvia::client;
    use crate::integrations::elvia::client::MockElviaClient;
    use crate::integrations::elvia::fixtures;

    fn config() -> ElviaConfig {
        ElviaConfig {
            api_key: "key".to_string(),
            metering_point_id: fixtures::METERING_POINT_ID.to_string(),
            update_interval: Duration::from_secs(300),
            api_url: DEFAULT_ELVIA_API_URL.to_string(),
        }
    }

    /// 2024-01-15 07:30 CET
    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap()
    }

    /// 2024-01-15 02:00 CET, four hours before the day period starts
    fn night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 1, 0, 0).unwrap()
    }

    static PAUSED_START: OnceLock<Instant> = OnceLock::new();

    /// `night()` plus the tokio time elapsed since the first call
    fn paused_clock() -> DateTime<Utc> {
        let start = *PAUSED_START.get_or_init(Instant::now);
        night() + chrono::Duration::from_std(start.elapsed()).unwrap()
    }

    async fn recv(rx: &mut mpsc::Receiver<FromIntegrationMessage>) -> FromIntegrationMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_setup_announces_and_publishes() {
        let mock = MockElviaClient::new();
        mock.push_collections(fixtures::collections());
        let mut integration = ElviaIntegration::new(mock, &config()).with_clock(morning);
        let (tx, mut rx) = mpsc::channel(64);

        integration.setup(tx).await.unwrap();

        for sensor in &SENSORS {
            match recv(&mut rx).await {
                FromIntegrationMessage::SensorDiscovered {
                    entity_id,
                    integration_name,
                    ..
                } => {
                    assert_eq!(entity_id, sensor.entity_id());
                    assert_eq!(integration_name, INTEGRATION_NAME);
                }
                other => panic!("Expected discovery, got {:?}", other),
            }
        }

        let mut states = Vec::new();
        for _ in &SENSORS {
            match recv(&mut rx).await {
                FromIntegrationMessage::SensorStateChanged {
                    entity_id,
                    value,
                    unit_of_measurement,
                    updated_at,
                } => {
                    assert_eq!(updated_at, morning());
                    states.push((entity_id, value, unit_of_measurement));
                }
                other => panic!("Expected state change, got {:?}", other),
            }
        }
        assert!(states.contains(&(
            "sensor.elvia_variable_price_total".to_string(),
            Some(SensorValue::Number(0.464)),
            Some("kr/kWh".to_string()),
        )));
        assert!(states.contains(&(
            "sensor.elvia_fixed_price_level".to_string(),
            Some(SensorValue::Text("2-5".to_string())),
            None,
        )));

        assert!(matches!(
            recv(&mut rx).await,
            FromIntegrationMessage::DiagnosticsUpdated { .. }
        ));

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_fails_when_first_refresh_fails() {
        let mock = MockElviaClient::new();
        mock.push_error(client::Error::InvalidApiKey);
        mock.push_collections(fixtures::collections());
        let mut integration = ElviaIntegration::new(mock.clone(), &config()).with_clock(morning);
        let (tx, mut rx) = mpsc::channel(64);

        assert!(integration.setup(tx.clone()).await.is_err());

        // Only diagnostics, no sensors
        match recv(&mut rx).await {
            FromIntegrationMessage::DiagnosticsUpdated { diagnostics, .. } => {
                assert_eq!(diagnostics["last_update_success"], false);
            }
            other => panic!("Expected diagnostics, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        // A later attempt starts over with the same coordinator
        integration.setup(tx).await.unwrap();
        assert!(matches!(
            recv(&mut rx).await,
            FromIntegrationMessage::SensorDiscovered { .. }
        ));
        assert_eq!(mock.requests().len(), 2);

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_command_reports_failure() {
        let mock = MockElviaClient::new();
        mock.push_collections(fixtures::collections());
        mock.push_error(client::Error::Timeout {
            url: "http://elvia/test".to_string(),
        });
        let mut integration = ElviaIntegration::new(mock.clone(), &config()).with_clock(morning);
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();

        // Discovery, states and diagnostics from setup
        for _ in 0..(2 * SENSORS.len() + 1) {
            recv(&mut rx).await;
        }

        integration
            .handle_message(ToIntegrationMessage::Refresh)
            .await
            .unwrap();

        match recv(&mut rx).await {
            FromIntegrationMessage::UpdateFailed {
                integration_name,
                error,
            } => {
                assert_eq!(integration_name, INTEGRATION_NAME);
                assert!(error.contains("Timeout"));
            }
            other => panic!("Expected update failure, got {:?}", other),
        }
        match recv(&mut rx).await {
            FromIntegrationMessage::DiagnosticsUpdated { diagnostics, .. } => {
                assert_eq!(diagnostics["last_update_success"], false);
            }
            other => panic!("Expected diagnostics, got {:?}", other),
        }
        assert_eq!(mock.requests().len(), 2);

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_before_setup_fails() {
        let mut integration = ElviaIntegration::new(MockElviaClient::new(), &config());
        assert!(integration
            .handle_message(ToIntegrationMessage::Refresh)
            .await
            .is_err());
    }

    /// Drain the discovery, state and diagnostics messages sent by setup
    async fn drain_setup(rx: &mut mpsc::Receiver<FromIntegrationMessage>) {
        for _ in 0..(2 * SENSORS.len() + 1) {
            recv(rx).await;
        }
    }

    /// Collect the states of one publish and check its trailing diagnostics
    async fn recv_states(
        rx: &mut mpsc::Receiver<FromIntegrationMessage>,
    ) -> Vec<(String, Option<SensorValue>, DateTime<Utc>)> {
        let mut states = Vec::new();
        for _ in &SENSORS {
            match recv(rx).await {
                FromIntegrationMessage::SensorStateChanged {
                    entity_id,
                    value,
                    updated_at,
                    ..
                } => states.push((entity_id, value, updated_at)),
                other => panic!("Expected state change, got {:?}", other),
            }
        }
        assert!(matches!(
            recv(rx).await,
            FromIntegrationMessage::DiagnosticsUpdated { .. }
        ));
        states
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_update_interval() {
        let mock = MockElviaClient::new();
        mock.push_collections(fixtures::collections());
        mock.push_collections(fixtures::collections());
        let mut integration = ElviaIntegration::new(mock.clone(), &config()).with_clock(morning);
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();
        drain_setup(&mut rx).await;

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(mock.requests().len(), 1);
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(mock.requests().len(), 2);
        let states = recv_states(&mut rx).await;
        assert!(states.iter().all(|(_, _, updated_at)| *updated_at == morning()));

        integration.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_requests_coalesce() {
        let mock = MockElviaClient::new();
        mock.push_collections(fixtures::collections());
        mock.push_collections(fixtures::collections());
        let mut integration = ElviaIntegration::new(mock.clone(), &config()).with_clock(morning);
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();
        drain_setup(&mut rx).await;

        // The poll task does not run between these, so one request is pending
        for _ in 0..3 {
            integration
                .handle_message(ToIntegrationMessage::Refresh)
                .await
                .unwrap();
        }

        recv_states(&mut rx).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(mock.requests().len(), 2);

        integration.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensors_follow_period_change_without_fetching() {
        let mock = MockElviaClient::new();
        mock.push_collections(fixtures::collections());
        let config = ElviaConfig {
            update_interval: Duration::from_secs(24 * 60 * 60),
            ..config()
        };
        // Pin the clock to night() before setup reads it
        paused_clock();
        let mut integration = ElviaIntegration::new(mock.clone(), &config).with_clock(paused_clock);
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();
        drain_setup(&mut rx).await;

        // The night period ends four hours in
        tokio::time::sleep(Duration::from_secs(4 * 60 * 60 + 1)).await;
        let states = recv_states(&mut rx).await;
        let (_, value, updated_at) = states
            .iter()
            .find(|(entity_id, ..)| entity_id == "sensor.elvia_variable_price_total")
            .unwrap();
        assert_eq!(*value, Some(SensorValue::Number(0.464)));
        let day_start = Utc.with_ymd_and_hms(2024, 1, 15, 5, 0, 0).unwrap();
        assert!(*updated_at >= day_start);
        assert!(*updated_at < day_start + chrono::Duration::seconds(1));
        assert_eq!(mock.requests().len(), 1);

        integration.shutdown().await.unwrap();
    }
}
