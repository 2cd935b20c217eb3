//! Local relay engine: a loopback reverse proxy in front of AI provider APIs,
//! live takeover of Claude/Codex/Gemini client configs, and usage accounting.

pub mod app_config;
pub mod database;
pub mod error;
pub mod live_config;
pub mod provider;
pub mod proxy;
pub mod services;
pub mod settings;
pub mod store;

pub use app_config::AppType;
pub use error::AppError;
pub use provider::ProviderConfig;
pub use proxy::{ProxyError, ProxyMode, ProxyStatus};
pub use settings::RelaySettings;
pub use store::AppState;
