pub mod api;
pub mod config;
mod engine;
pub mod integrations;

pub use config::format_diagnostics;
pub use config::Config;
pub use config::Diagnostic;
pub use config::Diagnostics;
pub use config::LogLevel;
pub use engine::CommandError;
pub use engine::Engine;
pub use engine::SensorState;
pub use engine::SensorValue;
pub use engine::State;
