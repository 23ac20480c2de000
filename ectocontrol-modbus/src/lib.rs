//! Client for the Ectocontrol Modbus RTU boiler adapter.
//!
//! The adapter sits on a half-duplex RS-485 line at 19200 baud, 8N1, and
//! exposes boiler state as holding registers. This crate polls those
//! registers, decodes them into typed values and writes setpoints and
//! commands back.
//!
//! # Layers
//!
//! - [`transport`] - Serialized register reads and writes with timeouts
//! - [`registers`] - Register map and pure decode/encode rules
//! - [`gateway`] - Cached typed reads, validated writes
//! - [`coordinator`] - Poll cycles, retries and availability
//! - [`diagnostics`] - JSON diagnostics export
//! - [`mock`] - In-memory adapter for tests and `--simulate`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ectocontrol_modbus::{PollSettings, PollingCoordinator, RegisterGateway, TransportClient};
//!
//! let transport = Arc::new(TransportClient::serial("/dev/ttyUSB0"));
//! let gateway = Arc::new(RegisterGateway::new(transport, 1));
//! let coordinator = PollingCoordinator::new(gateway.clone(), PollSettings::default());
//!
//! coordinator.refresh().await;
//! println!("CH temperature: {:?}", gateway.ch_temperature());
//! ```

pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod gateway;
pub mod mock;
pub mod registers;
pub mod transport;

pub use config::{AdapterConfig, ConfigError, DeviceConfig};
pub use coordinator::{
    AvailabilityState, CoordinatorFailure, CoordinatorStatus, PollOutcome, PollSettings,
    PollingCoordinator,
};
pub use diagnostics::Diagnostics;
pub use gateway::{Circuit, DeviceCache, GatewayError, RegisterGateway};
pub use registers::{Field, FieldValue, RegisterDescriptor};
pub use transport::{TransportClient, TransportError, TransportErrorKind};
