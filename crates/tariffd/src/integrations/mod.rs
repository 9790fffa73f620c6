#[cfg(feature = "integration_elvia")]
pub mod elvia;
