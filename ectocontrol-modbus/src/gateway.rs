//! Typed access to the adapter's registers.
//!
//! Reads come from the [`DeviceCache`] filled by the polling coordinator
//! and never touch the wire. Writes go straight to the transport.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::registers::{
    COMMAND_REBOOT, COMMAND_RESET_ERRORS, Field, FieldValue, decode, encode, set_bit,
};
use crate::transport::{TransportClient, TransportError};

/// Errors from gateway writes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("Field '{0}' is not readable")]
    NotReadable(Field),

    #[error("Field '{0}' is not writable")]
    NotWritable(Field),

    #[error("Value {value} for '{field}' outside {min}..={max}")]
    OutOfRange {
        field: Field,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Field '{field}' expects {expected}")]
    InvalidValue {
        field: Field,
        expected: &'static str,
    },

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Snapshot of raw register values keyed by address.
///
/// Readers always see a whole cycle's worth of values: updates swap in a
/// new map under the write lock.
#[derive(Debug, Default)]
pub struct DeviceCache {
    values: RwLock<Arc<BTreeMap<u16, u16>>>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.values.read().get(&address).copied()
    }

    /// Cheap handle to the current map.
    pub fn snapshot(&self) -> Arc<BTreeMap<u16, u16>> {
        self.values.read().clone()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Install a cycle's results.
    ///
    /// `merge = false` replaces the whole map. `merge = true` overlays the
    /// new values and keeps entries for addresses absent from `values`.
    pub(crate) fn replace(&self, values: BTreeMap<u16, u16>, merge: bool) {
        let mut guard = self.values.write();
        if merge {
            let mut next = BTreeMap::clone(&guard);
            next.extend(values);
            *guard = Arc::new(next);
        } else {
            *guard = Arc::new(values);
        }
    }
}

/// Heating circuits controlled through the circuit enable register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Circuit {
    Heating,
    Dhw,
}

impl Circuit {
    fn field(self) -> Field {
        match self {
            Circuit::Heating => Field::HeatingCircuitEnabled,
            Circuit::Dhw => Field::DhwCircuitEnabled,
        }
    }
}

/// High-level adapter for a single boiler slave.
#[derive(Debug)]
pub struct RegisterGateway {
    transport: Arc<TransportClient>,
    slave_id: u8,
    cache: DeviceCache,
}

impl RegisterGateway {
    pub fn new(transport: Arc<TransportClient>, slave_id: u8) -> Self {
        Self {
            transport,
            slave_id,
            cache: DeviceCache::new(),
        }
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn transport(&self) -> &Arc<TransportClient> {
        &self.transport
    }

    /// Current raw cache contents, for diagnostics.
    pub fn cache_snapshot(&self) -> Arc<BTreeMap<u16, u16>> {
        self.cache.snapshot()
    }

    pub(crate) fn replace_cache(&self, values: BTreeMap<u16, u16>, merge: bool) {
        self.cache.replace(values, merge);
    }

    /// Decoded value of a field from the cache.
    ///
    /// `None` when the field is write-only, not cached yet, or reports
    /// "sensor not present".
    pub fn get_scaled(&self, field: Field) -> Option<FieldValue> {
        let descriptor = field.descriptor();
        if !descriptor.access.is_readable() {
            return None;
        }
        self.cache
            .get(descriptor.address)
            .and_then(|raw| decode(raw, descriptor))
    }

    /// Like [`get_scaled`](Self::get_scaled), but rejects write-only fields.
    pub fn read_field(&self, field: Field) -> Result<Option<FieldValue>, GatewayError> {
        if !field.descriptor().access.is_readable() {
            return Err(GatewayError::NotReadable(field));
        }
        Ok(self.get_scaled(field))
    }

    /// Decoded values of every readable field.
    pub fn read_all(&self) -> BTreeMap<Field, Option<FieldValue>> {
        Field::readable()
            .map(|field| (field, self.get_scaled(field)))
            .collect()
    }

    fn float(&self, field: Field) -> Option<f64> {
        self.get_scaled(field).map(|v| v.as_f64())
    }

    fn int(&self, field: Field) -> Option<i64> {
        match self.get_scaled(field)? {
            FieldValue::Int(v) => Some(v),
            _ => None,
        }
    }

    fn flag(&self, field: Field) -> Option<bool> {
        self.get_scaled(field)?.as_bool()
    }

    /// CH (heating circuit) temperature in °C.
    pub fn ch_temperature(&self) -> Option<f64> {
        self.float(Field::ChTemperature)
    }

    /// DHW temperature in °C.
    pub fn dhw_temperature(&self) -> Option<f64> {
        self.float(Field::DhwTemperature)
    }

    /// Pressure in bar.
    pub fn pressure(&self) -> Option<f64> {
        self.float(Field::Pressure)
    }

    /// Flow rate in l/min.
    pub fn flow_rate(&self) -> Option<f64> {
        self.float(Field::FlowRate)
    }

    /// Burner modulation in percent.
    pub fn modulation(&self) -> Option<i64> {
        self.int(Field::Modulation)
    }

    pub fn burner_on(&self) -> Option<bool> {
        self.flag(Field::BurnerOn)
    }

    pub fn heating_active(&self) -> Option<bool> {
        self.flag(Field::HeatingActive)
    }

    pub fn dhw_active(&self) -> Option<bool> {
        self.flag(Field::DhwActive)
    }

    pub fn main_error(&self) -> Option<i64> {
        self.int(Field::MainError)
    }

    pub fn additional_error(&self) -> Option<i64> {
        self.int(Field::AddError)
    }

    /// Outdoor temperature in whole °C.
    pub fn outdoor_temperature(&self) -> Option<i64> {
        self.int(Field::OutdoorTemp)
    }

    /// Setpoint the boiler is currently working to, in °C.
    pub fn ch_setpoint_active(&self) -> Option<f64> {
        self.float(Field::ChSetpointActive)
    }

    /// Write a field.
    ///
    /// Bitfield fields take a boolean and go through a read-modify-write
    /// of their register; other fields take a number in decoded units.
    /// Validation failures are returned before any I/O.
    pub async fn set_scaled(
        &self,
        field: Field,
        value: impl Into<FieldValue>,
    ) -> Result<(), GatewayError> {
        let value = value.into();
        let descriptor = field.descriptor();
        if !descriptor.access.is_writable() {
            return Err(GatewayError::NotWritable(field));
        }

        if let Some(bit) = descriptor.bit {
            let on = value.as_bool().ok_or(GatewayError::InvalidValue {
                field,
                expected: "a boolean",
            })?;
            let written = self
                .transport
                .update_register(self.slave_id, descriptor.address, None, |raw| {
                    set_bit(raw, bit, on)
                })
                .await?;
            info!(
                "Slave {}: set {} = {} (register now {:#06x})",
                self.slave_id, field, on, written
            );
            return Ok(());
        }

        if matches!(value, FieldValue::Bool(_)) {
            return Err(GatewayError::InvalidValue {
                field,
                expected: "a number",
            });
        }
        let numeric = value.as_f64();
        if !numeric.is_finite() {
            return Err(GatewayError::InvalidValue {
                field,
                expected: "a finite number",
            });
        }
        if descriptor.scale == 1.0 && numeric.fract() != 0.0 {
            return Err(GatewayError::InvalidValue {
                field,
                expected: "a whole number",
            });
        }
        if let Some((min, max)) = descriptor.write_range {
            if !descriptor.accepts(numeric) {
                return Err(GatewayError::OutOfRange {
                    field,
                    value: numeric,
                    min,
                    max,
                });
            }
        }

        let raw = encode(numeric, descriptor);
        self.transport
            .write_register(self.slave_id, descriptor.address, raw, None)
            .await?;
        info!(
            "Slave {}: wrote {} = {} (raw {:#06x})",
            self.slave_id, field, numeric, raw
        );
        Ok(())
    }

    /// Set the CH setpoint in °C.
    pub async fn set_ch_setpoint(&self, celsius: f64) -> Result<(), GatewayError> {
        self.set_scaled(Field::ChSetpoint, celsius).await
    }

    /// Set the DHW setpoint in °C.
    pub async fn set_dhw_setpoint(&self, celsius: i64) -> Result<(), GatewayError> {
        self.set_scaled(Field::DhwSetpoint, celsius).await
    }

    /// Set the maximum burner modulation in percent.
    pub async fn set_max_modulation(&self, percent: i64) -> Result<(), GatewayError> {
        self.set_scaled(Field::MaxModulation, percent).await
    }

    /// Set the lower CH setpoint limit in °C.
    pub async fn set_ch_min(&self, celsius: i64) -> Result<(), GatewayError> {
        self.set_scaled(Field::ChMin, celsius).await
    }

    /// Set the upper CH setpoint limit in °C.
    pub async fn set_ch_max(&self, celsius: i64) -> Result<(), GatewayError> {
        self.set_scaled(Field::ChMax, celsius).await
    }

    /// Enable or disable a circuit.
    pub async fn set_circuit_enabled(
        &self,
        circuit: Circuit,
        enabled: bool,
    ) -> Result<(), GatewayError> {
        self.set_scaled(circuit.field(), enabled).await
    }

    /// Set or clear any bit of the circuit enable register.
    pub async fn set_circuit_enable_bit(&self, bit: u8, enabled: bool) -> Result<(), GatewayError> {
        if bit > 15 {
            return Err(GatewayError::InvalidValue {
                field: Field::CircuitEnable,
                expected: "a bit index in 0..=15",
            });
        }
        let address = Field::CircuitEnable.descriptor().address;
        let written = self
            .transport
            .update_register(self.slave_id, address, None, |raw| set_bit(raw, bit, enabled))
            .await?;
        info!(
            "Slave {}: circuit enable bit {} = {} (register now {:#06x})",
            self.slave_id, bit, enabled, written
        );
        Ok(())
    }

    /// Reboot the adapter.
    pub async fn reboot_adapter(&self) -> Result<(), GatewayError> {
        self.set_scaled(Field::Command, i64::from(COMMAND_REBOOT))
            .await
    }

    /// Clear the boiler's error state.
    pub async fn reset_boiler_errors(&self) -> Result<(), GatewayError> {
        self.set_scaled(Field::Command, i64::from(COMMAND_RESET_ERRORS))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Fault, MemoryDevice};

    async fn gateway(device: &MemoryDevice) -> RegisterGateway {
        let transport = Arc::new(TransportClient::new(device.clone()));
        transport.connect().await.unwrap();
        RegisterGateway::new(transport, 1)
    }

    fn offline_gateway() -> RegisterGateway {
        let transport = Arc::new(TransportClient::new(MemoryDevice::new(1)));
        RegisterGateway::new(transport, 1)
    }

    #[test]
    fn test_cache_replace_and_merge() {
        let cache = DeviceCache::new();
        cache.replace(BTreeMap::from([(0x10, 1), (0x11, 2)]), false);
        assert_eq!(cache.len(), 2);

        // Merge keeps 0x10, overwrites 0x11, adds 0x12
        cache.replace(BTreeMap::from([(0x11, 20), (0x12, 30)]), true);
        assert_eq!(cache.get(0x10), Some(1));
        assert_eq!(cache.get(0x11), Some(20));
        assert_eq!(cache.get(0x12), Some(30));

        // Replace drops everything not in the new block
        cache.replace(BTreeMap::from([(0x12, 31)]), false);
        assert_eq!(cache.get(0x10), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_snapshot_is_stable() {
        let cache = DeviceCache::new();
        cache.replace(BTreeMap::from([(0x18, 291)]), false);

        let before = cache.snapshot();
        cache.replace(BTreeMap::from([(0x18, 300)]), false);

        assert_eq!(before.get(&0x18), Some(&291));
        assert_eq!(cache.get(0x18), Some(300));
    }

    #[test]
    fn test_get_scaled_from_cache() {
        let gw = offline_gateway();
        assert_eq!(gw.get_scaled(Field::ChTemperature), None);

        gw.replace_cache(
            BTreeMap::from([(0x0018, 291), (0x001A, 0xFF34), (0x001D, 0x0005)]),
            false,
        );

        assert_eq!(gw.ch_temperature(), Some(29.1));
        assert_eq!(gw.pressure(), None);
        assert_eq!(gw.burner_on(), Some(true));
        assert_eq!(gw.heating_active(), Some(false));
        assert_eq!(gw.dhw_active(), Some(true));
        assert_eq!(gw.dhw_temperature(), None);
    }

    #[test]
    fn test_write_only_fields_never_read() {
        let gw = offline_gateway();
        gw.replace_cache(BTreeMap::from([(0x0031, 450)]), false);
        assert_eq!(gw.get_scaled(Field::ChSetpoint), None);
    }

    #[test]
    fn test_read_field_rejects_write_only() {
        let gw = offline_gateway();
        assert_eq!(
            gw.read_field(Field::Command),
            Err(GatewayError::NotReadable(Field::Command))
        );
        assert_eq!(gw.read_field(Field::Status), Ok(None));
    }

    #[test]
    fn test_read_all_lists_readable_fields() {
        let gw = offline_gateway();
        gw.replace_cache(BTreeMap::from([(0x0020, 0xF812)]), false);

        let all = gw.read_all();
        assert!(!all.contains_key(&Field::Command));
        assert_eq!(all.get(&Field::OutdoorTemp), Some(&Some(FieldValue::Int(-8))));
        assert_eq!(all.get(&Field::Status), Some(&None));
    }

    #[tokio::test]
    async fn test_set_ch_setpoint() {
        let device = MemoryDevice::new(1);
        let gw = gateway(&device).await;

        gw.set_ch_setpoint(45.5).await.unwrap();
        assert_eq!(device.register(0x0031), Some(455));
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let device = MemoryDevice::new(1);
        let gw = gateway(&device).await;

        assert_eq!(
            gw.set_scaled(Field::ChTemperature, 20.0).await,
            Err(GatewayError::NotWritable(Field::ChTemperature))
        );
        assert!(matches!(
            gw.set_ch_setpoint(120.0).await,
            Err(GatewayError::OutOfRange { .. })
        ));
        assert!(matches!(
            gw.set_scaled(Field::Command, 7i64).await,
            Err(GatewayError::OutOfRange { .. })
        ));
        assert!(matches!(
            gw.set_scaled(Field::DhwCircuitEnabled, 1i64).await,
            Err(GatewayError::InvalidValue { .. })
        ));
        assert!(matches!(
            gw.set_scaled(Field::DhwSetpoint, true).await,
            Err(GatewayError::InvalidValue { .. })
        ));
        assert!(matches!(
            gw.set_ch_setpoint(f64::NAN).await,
            Err(GatewayError::InvalidValue { .. })
        ));
        assert!(device.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_integer_fields_reject_fractions() {
        let device = MemoryDevice::new(1);
        let gw = gateway(&device).await;

        for (field, value) in [
            (Field::Command, 2.5),
            (Field::DhwSetpoint, 55.5),
            (Field::MaxModulation, 80.4),
            (Field::ChMax, 70.1),
        ] {
            assert_eq!(
                gw.set_scaled(field, value).await,
                Err(GatewayError::InvalidValue {
                    field,
                    expected: "a whole number"
                }),
                "{}",
                field
            );
        }
        assert!(device.transactions().is_empty());

        // Whole numbers given as floats still go through.
        gw.set_scaled(Field::Command, 3.0).await.unwrap();
        gw.set_ch_setpoint(45.5).await.unwrap();
        assert_eq!(device.writes_to(0x0080), vec![3]);
        assert_eq!(device.register(0x0031), Some(455));
    }

    #[tokio::test]
    async fn test_ch_limits() {
        let device = MemoryDevice::new(1);
        let gw = gateway(&device).await;

        gw.set_ch_min(30).await.unwrap();
        gw.set_ch_max(80).await.unwrap();
        assert_eq!(device.register(0x0033), Some(30));
        assert_eq!(device.register(0x0034), Some(80));

        assert!(matches!(
            gw.set_ch_max(101).await,
            Err(GatewayError::OutOfRange { .. })
        ));
        assert!(matches!(
            gw.set_ch_min(-1).await,
            Err(GatewayError::OutOfRange { .. })
        ));
        assert_eq!(device.writes_to(0x0034), vec![80]);
    }

    #[tokio::test]
    async fn test_commands() {
        let device = MemoryDevice::new(1);
        let gw = gateway(&device).await;

        gw.reboot_adapter().await.unwrap();
        gw.reset_boiler_errors().await.unwrap();
        assert_eq!(device.writes_to(0x0080), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_circuit_read_modify_write() {
        let device = MemoryDevice::new(1).with_registers([(0x0039, 0b01)]);
        let gw = gateway(&device).await;

        gw.set_circuit_enabled(Circuit::Dhw, true).await.unwrap();
        assert_eq!(device.register(0x0039), Some(0b11));

        gw.set_circuit_enabled(Circuit::Heating, false).await.unwrap();
        assert_eq!(device.register(0x0039), Some(0b10));

        gw.set_circuit_enable_bit(4, true).await.unwrap();
        assert_eq!(device.register(0x0039), Some(0b1_0010));
        assert!(gw.set_circuit_enable_bit(16, true).await.is_err());
    }

    #[tokio::test]
    async fn test_write_failure_wrapped() {
        let device = MemoryDevice::new(1);
        device.set_offline(Some(Fault::Exception(0x04)));
        let gw = gateway(&device).await;

        let result = gw.set_dhw_setpoint(55).await;
        assert_eq!(
            result,
            Err(GatewayError::Transport(TransportError::Exception { code: 0x04 }))
        );
    }

    #[tokio::test]
    async fn test_writes_bypass_cache() {
        let device = MemoryDevice::new(1);
        let gw = gateway(&device).await;

        gw.set_max_modulation(80).await.unwrap();
        assert!(gw.cache_snapshot().is_empty());
        assert_eq!(device.register(0x0038), Some(80));
    }
}
