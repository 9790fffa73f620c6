// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod engine;
mod integration;
mod message;
mod sensor;
pub mod state;

pub use engine::CommandError;
pub use engine::Engine;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use sensor::SensorDescription;
pub use sensor::SensorDeviceClass;
pub use sensor::SensorStateClass;
pub use state::SensorState;
pub use state::SensorValue;
pub use state::State;
