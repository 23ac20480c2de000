//! Serialized access to the half-duplex RTU link.
//!
//! [`TransportClient`] owns the link behind a single async mutex. Every
//! wire transaction, including its timeout wait, runs with the gate held,
//! so no two requests ever share the bus. Failures come back as
//! [`TransportError`] values.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_modbus::client::Context;
use tokio_modbus::ExceptionCode;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

/// Fixed line speed of the adapter.
pub const BAUD_RATE: u32 = 19200;

/// Default per-transaction timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Highest slave id the adapter accepts.
pub const MAX_SLAVE_ID: u8 = 32;

/// Protocol limit for a single holding-register read.
pub const MAX_READ_COUNT: u16 = 125;

/// Coarse classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorKind {
    Timeout,
    Protocol,
    Io,
}

/// Failure of a single wire operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Device exception {code:#04x} ({})", exception_name(.code))]
    Exception { code: u8 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Classify this error.
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Timeout(_) => TransportErrorKind::Timeout,
            TransportError::Protocol(_)
            | TransportError::Exception { .. }
            | TransportError::InvalidRequest(_) => TransportErrorKind::Protocol,
            TransportError::Io(_) | TransportError::NotConnected => TransportErrorKind::Io,
        }
    }

    /// Whether retrying the same request can succeed.
    ///
    /// Illegal function/address/value exceptions and malformed requests
    /// are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Exception { code } => !matches!(code, 0x01..=0x03),
            TransportError::InvalidRequest(_) => false,
            _ => true,
        }
    }
}

impl From<tokio_modbus::Error> for TransportError {
    fn from(err: tokio_modbus::Error) -> Self {
        match err {
            tokio_modbus::Error::Transport(e) => TransportError::Io(e.to_string()),
            tokio_modbus::Error::Protocol(e) => TransportError::Protocol(e.to_string()),
        }
    }
}

impl From<ExceptionCode> for TransportError {
    fn from(exception: ExceptionCode) -> Self {
        let code = match exception {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetDevice => 0x0B,
            _ => 0xFF,
        };
        TransportError::Exception { code }
    }
}

fn exception_name(code: &u8) -> &'static str {
    match *code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "server device failure",
        0x05 => "acknowledge",
        0x06 => "server device busy",
        0x08 => "memory parity error",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target device failed to respond",
        _ => "unknown",
    }
}

/// An open session on the bus.
///
/// Implementations perform exactly one request per call and do no locking
/// of their own; [`TransportClient`] serializes callers.
#[async_trait]
pub trait RegisterLink: Send {
    /// Read holding registers (function 0x03).
    async fn read_holding_registers(
        &mut self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    /// Write a single holding register (function 0x06).
    async fn write_single_register(
        &mut self,
        slave: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError>;

    /// Release the underlying resource.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens [`RegisterLink`] sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RegisterLink>, TransportError>;

    /// Human-readable endpoint, e.g. the serial port path.
    fn endpoint(&self) -> String;
}

/// Connector for a real serial port using 19200 baud, 8N1 framing.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self) -> Result<Box<dyn RegisterLink>, TransportError> {
        let builder = tokio_serial::new(&self.port, BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One);

        let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            TransportError::Io(format!("Serial open of '{}' failed: {}", self.port, e))
        })?;

        // Slave id is set per request.
        let ctx = rtu::attach_slave(serial, Slave(1));
        Ok(Box::new(SerialLink { ctx }))
    }

    fn endpoint(&self) -> String {
        self.port.clone()
    }
}

/// RTU session over tokio-modbus.
struct SerialLink {
    ctx: Context,
}

#[async_trait]
impl RegisterLink for SerialLink {
    async fn read_holding_registers(
        &mut self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.ctx.set_slave(Slave(slave));
        Ok(self.ctx.read_holding_registers(address, count).await??)
    }

    async fn write_single_register(
        &mut self,
        slave: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        self.ctx.set_slave(Slave(slave));
        Ok(self.ctx.write_single_register(address, value).await??)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Err(e) = self.ctx.disconnect().await {
            debug!(error = %e, "Error closing serial link");
        }
        Ok(())
    }
}

type Gate = Option<Box<dyn RegisterLink>>;

/// Client that serializes every transaction on the link.
pub struct TransportClient {
    connector: Box<dyn Connector>,
    gate: Mutex<Gate>,
    connected: AtomicBool,
    timeout: Duration,
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("endpoint", &self.connector.endpoint())
            .field("connected", &self.is_connected())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TransportClient {
    /// Create a client over any connector.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            gate: Mutex::new(None),
            connected: AtomicBool::new(false),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client for a serial port.
    pub fn serial(port: impl Into<String>) -> Self {
        Self::new(SerialConnector::new(port))
    }

    /// Set the default per-transaction timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the link. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut gate = self.gate.lock().await;
        if gate.is_some() {
            return Ok(());
        }

        match self.connector.open().await {
            Ok(link) => {
                *gate = Some(link);
                self.connected.store(true, Ordering::SeqCst);
                info!("Opened Modbus link on {}", self.connector.endpoint());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open Modbus link on {}: {}", self.connector.endpoint(), e);
                Err(e)
            }
        }
    }

    /// Release the link. Safe from any state.
    ///
    /// Waits for the in-flight transaction, if any, to finish first.
    pub async fn disconnect(&self) {
        let mut gate = self.gate.lock().await;
        if let Some(mut link) = gate.take() {
            if let Err(e) = link.close().await {
                debug!(error = %e, "Error closing Modbus link");
            }
            info!("Closed Modbus link on {}", self.connector.endpoint());
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Read `count` holding registers starting at `address`.
    pub async fn read_registers(
        &self,
        slave: u8,
        address: u16,
        count: u16,
        timeout: Option<Duration>,
    ) -> Result<Vec<u16>, TransportError> {
        validate_slave(slave)?;
        if count == 0 || count > MAX_READ_COUNT {
            return Err(TransportError::InvalidRequest(format!(
                "register count {} outside 1..={}",
                count, MAX_READ_COUNT
            )));
        }

        let timeout = timeout.unwrap_or(self.timeout);
        let mut gate = self.gate.lock().await;
        self.read_locked(&mut gate, slave, address, count, timeout)
            .await
    }

    /// Write a single holding register.
    pub async fn write_register(
        &self,
        slave: u8,
        address: u16,
        value: u16,
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        validate_slave(slave)?;

        let timeout = timeout.unwrap_or(self.timeout);
        let mut gate = self.gate.lock().await;
        self.write_locked(&mut gate, slave, address, value, timeout)
            .await
    }

    /// Read one register, transform it, and write the result back.
    ///
    /// The gate is held across both transactions so no other request can
    /// land between the read and the write. Returns the written word.
    pub async fn update_register<F>(
        &self,
        slave: u8,
        address: u16,
        timeout: Option<Duration>,
        update: F,
    ) -> Result<u16, TransportError>
    where
        F: FnOnce(u16) -> u16 + Send,
    {
        validate_slave(slave)?;

        let timeout = timeout.unwrap_or(self.timeout);
        let mut gate = self.gate.lock().await;
        let current = self
            .read_locked(&mut gate, slave, address, 1, timeout)
            .await?[0];
        let next = update(current);
        debug!(
            "Slave {}: read-modify-write of {:#06x}: {:#06x} -> {:#06x}",
            slave, address, current, next
        );
        self.write_locked(&mut gate, slave, address, next, timeout)
            .await?;
        Ok(next)
    }

    async fn read_locked(
        &self,
        gate: &mut Gate,
        slave: u8,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, TransportError> {
        let Some(link) = gate.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let result =
            match tokio::time::timeout(timeout, link.read_holding_registers(slave, address, count))
                .await
            {
                Ok(Ok(words)) if words.len() != usize::from(count) => {
                    Err(TransportError::Protocol(format!(
                        "expected {} registers, got {}",
                        count,
                        words.len()
                    )))
                }
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };

        match &result {
            Ok(_) => debug!(slave, address, count, "Read holding registers"),
            Err(e) => debug!(slave, address, count, error = %e, "Read failed"),
        }
        self.settle(gate, &result);
        result
    }

    async fn write_locked(
        &self,
        gate: &mut Gate,
        slave: u8,
        address: u16,
        value: u16,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let Some(link) = gate.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let result =
            match tokio::time::timeout(timeout, link.write_single_register(slave, address, value))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };

        match &result {
            Ok(()) => debug!(slave, address, value, "Wrote holding register"),
            Err(e) => warn!("Slave {}: write of {:#06x} failed: {}", slave, address, e),
        }
        self.settle(gate, &result);
        result
    }

    /// Drop the link after an I/O failure so the next connect reopens it.
    fn settle<T>(&self, gate: &mut Gate, result: &Result<T, TransportError>) {
        if let Err(TransportError::Io(e)) = result {
            warn!(
                "Dropping Modbus link on {} after I/O error: {}",
                self.connector.endpoint(),
                e
            );
            *gate = None;
            self.connected.store(false, Ordering::SeqCst);
        }
    }
}

fn validate_slave(slave: u8) -> Result<(), TransportError> {
    if slave == 0 || slave > MAX_SLAVE_ID {
        return Err(TransportError::InvalidRequest(format!(
            "slave id {} outside 1..={}",
            slave, MAX_SLAVE_ID
        )));
    }
    Ok(())
}
