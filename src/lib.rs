// Time source for token expiry
pub mod clock;

// Cloud CLI access (identity probes, secret store)
pub mod cloud;

// TOML configuration and environment overlay
pub mod config;

// Connection lifecycle and persisted status
pub mod connection;

// Error taxonomy and remediation copy
pub mod error;

// Credential profile resolution
pub mod profile;

// CRM credential secret lookup
pub mod secret;

// CRM access token broker
pub mod token;

pub use config::{load_config, BrokerConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, StatusStore};
pub use error::BrokerError;
pub use token::{AccessToken, TokenBroker};
