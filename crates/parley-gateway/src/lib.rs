pub mod connection;
pub mod hub;
pub mod notifier;

pub use connection::GatewayConfig;
pub use hub::ConnectionHub;
pub use notifier::Notifier;
