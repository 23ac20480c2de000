//! In-memory adapter for tests and offline runs.
//!
//! [`MemoryDevice`] behaves like a slave on the bus: it answers holding
//! register reads and writes from a register table, can be scripted to
//! fail, and records every transaction so tests can check ordering and
//! that requests never overlap.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::registers::{BLOCK_COUNT, BLOCK_START};
use crate::transport::{Connector, RegisterLink, TransportError};

/// Scripted failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never answer; the caller's timeout fires.
    NoResponse,
    /// Fail with an I/O error.
    Io,
    /// Answer with a Modbus exception code.
    Exception(u8),
}

/// Kind of a recorded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read { count: u16 },
    Write { value: u16 },
}

/// A transaction seen by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub slave: u8,
    pub address: u16,
    pub operation: Operation,
    pub started: Instant,
    pub finished: Option<Instant>,
}

#[derive(Debug, Default)]
struct DeviceState {
    slave_id: u8,
    registers: BTreeMap<u16, u16>,
    read_faults: VecDeque<Fault>,
    address_faults: BTreeMap<u16, Fault>,
    offline: Option<Fault>,
    open_fails: bool,
    latency: Duration,
    in_flight: usize,
    max_in_flight: usize,
    open_count: usize,
    log: Vec<Transaction>,
}

/// Shared handle to a simulated adapter.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MemoryDevice {
    /// Create an empty device answering to `slave_id`.
    pub fn new(slave_id: u8) -> Self {
        let device = Self::default();
        device.state.lock().slave_id = slave_id;
        device
    }

    /// Create a device preloaded with a plausible boiler state.
    pub fn boiler(slave_id: u8) -> Self {
        let device = Self::new(slave_id);
        {
            let mut state = device.state.lock();
            for address in BLOCK_START..BLOCK_START + BLOCK_COUNT {
                state.registers.insert(address, 0);
            }
            state.registers.extend([
                (0x0010, 0x0001), // status
                (0x0011, 0x0203), // version
                (0x0018, 452),    // CH 45.2 °C
                (0x0019, 388),    // DHW 38.8 °C
                (0x001A, 0x0F00), // 1.5 bar
                (0x001B, 0x0000), // no flow
                (0x001C, 0x2800), // 40 %
                (0x001D, 0x0003), // burner + heating
                (0x001E, 0x0000),
                (0x001F, 0xFFFF),
                (0x0020, 0xFB00), // -5 °C
                (0x0021, 0x0010),
                (0x0022, 0x0042),
                (0x0026, 0x2D00), // 45 °C
                (0x0031, 450),
                (0x0037, 50),
                (0x0038, 100),
                (0x0033, 20),
                (0x0034, 85),
                (0x0039, 0x0003),
                (0x0080, 0),
                (0x0081, 0),
            ]);
        }
        device
    }

    /// Builder form of [`set_register`](Self::set_register).
    pub fn with_registers(self, registers: impl IntoIterator<Item = (u16, u16)>) -> Self {
        self.state.lock().registers.extend(registers);
        self
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().registers.insert(address, value);
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        self.state.lock().registers.get(&address).copied()
    }

    /// Fail the next `n` read requests.
    pub fn fail_next_reads(&self, n: usize, fault: Fault) {
        let mut state = self.state.lock();
        state.read_faults.extend(std::iter::repeat_n(fault, n));
    }

    /// Fail every read that touches `address`.
    pub fn fail_address(&self, address: u16, fault: Fault) {
        self.state.lock().address_faults.insert(address, fault);
    }

    /// Fail every request until cleared with `None`.
    pub fn set_offline(&self, fault: Option<Fault>) {
        self.state.lock().offline = fault;
    }

    /// Remove all scripted faults.
    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.read_faults.clear();
        state.address_faults.clear();
        state.offline = None;
    }

    /// Make opening the link fail.
    pub fn set_open_fails(&self, fails: bool) {
        self.state.lock().open_fails = fails;
    }

    /// Delay applied to every request before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Highest number of requests observed in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().log.clone()
    }

    /// Addresses of single-register reads, in request order.
    pub fn single_reads(&self) -> Vec<u16> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|t| t.operation == Operation::Read { count: 1 })
            .map(|t| t.address)
            .collect()
    }

    /// Values written to `address`, in request order.
    pub fn writes_to(&self, address: u16) -> Vec<u16> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|t| t.address == address)
            .filter_map(|t| match t.operation {
                Operation::Write { value } => Some(value),
                Operation::Read { .. } => None,
            })
            .collect()
    }

    /// Record the start of a request and return its log index.
    fn begin(&self, slave: u8, address: u16, operation: Operation) -> (usize, Duration) {
        let mut state = self.state.lock();
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        state.log.push(Transaction {
            slave,
            address,
            operation,
            started: Instant::now(),
            finished: None,
        });
        (state.log.len() - 1, state.latency)
    }

    fn read_fault(&self, slave: u8, address: u16, count: u16) -> Option<Fault> {
        let mut state = self.state.lock();
        if slave != state.slave_id {
            return Some(Fault::NoResponse);
        }
        if let Some(fault) = state.offline {
            return Some(fault);
        }
        if let Some(fault) = state.read_faults.pop_front() {
            return Some(fault);
        }
        let end = address.saturating_add(count);
        state
            .address_faults
            .range(address..end)
            .next()
            .map(|(_, fault)| *fault)
    }

    fn write_fault(&self, slave: u8) -> Option<Fault> {
        let state = self.state.lock();
        if slave != state.slave_id {
            return Some(Fault::NoResponse);
        }
        state.offline
    }
}

/// Decrements the in-flight counter even when the request is cancelled.
struct InFlight {
    device: MemoryDevice,
    index: usize,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.device.state.lock();
        state.in_flight -= 1;
        if let Some(entry) = state.log.get_mut(self.index) {
            entry.finished = Some(Instant::now());
        }
    }
}

async fn apply(fault: Fault) -> TransportError {
    match fault {
        Fault::NoResponse => std::future::pending().await,
        Fault::Io => TransportError::Io("simulated line failure".to_string()),
        Fault::Exception(code) => TransportError::Exception { code },
    }
}

/// Session on a [`MemoryDevice`].
pub struct MemoryLink {
    device: MemoryDevice,
}

#[async_trait]
impl RegisterLink for MemoryLink {
    async fn read_holding_registers(
        &mut self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let (index, latency) = self.device.begin(slave, address, Operation::Read { count });
        let _guard = InFlight {
            device: self.device.clone(),
            index,
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(fault) = self.device.read_fault(slave, address, count) {
            return Err(apply(fault).await);
        }

        let state = self.device.state.lock();
        (address..address.saturating_add(count))
            .map(|a| {
                state
                    .registers
                    .get(&a)
                    .copied()
                    .ok_or(TransportError::Exception { code: 0x02 })
            })
            .collect()
    }

    async fn write_single_register(
        &mut self,
        slave: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let (index, latency) = self
            .device
            .begin(slave, address, Operation::Write { value });
        let _guard = InFlight {
            device: self.device.clone(),
            index,
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(fault) = self.device.write_fault(slave) {
            return Err(apply(fault).await);
        }

        self.device.set_register(address, value);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryDevice {
    async fn open(&self) -> Result<Box<dyn RegisterLink>, TransportError> {
        let mut state = self.state.lock();
        if state.open_fails {
            return Err(TransportError::Io("simulated port busy".to_string()));
        }
        state.open_count += 1;
        Ok(Box::new(MemoryLink {
            device: self.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}
