pub mod client;
pub mod device_controller;
pub mod proto;
pub mod queries;
pub mod site_config;

pub use client::GatewayClient;
pub use device_controller::DeviceControllerResponse;
pub use site_config::{SiteConfigResponse, TariffContent};
