//! Infrastructure layer: configuration, persistence gateway, service orchestration.

pub mod config;
pub mod gateway;
pub mod service;

pub use config::CostingConfig;
pub use gateway::{ChangeSet, GatewayError, InMemoryLedgerGateway, LedgerGateway, WriteCondition};
pub use service::{CostingService, ServiceError};
