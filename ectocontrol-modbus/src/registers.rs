//! Register map of the Ectocontrol adapter and the pure decoding rules.
//!
//! Every semantic [`Field`] resolves to a static [`RegisterDescriptor`]
//! describing where the value lives and how a raw 16-bit word turns into
//! a typed value. Nothing here performs I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// First address of the block read on every poll cycle.
pub const BLOCK_START: u16 = 0x0010;

/// Number of registers in the polled block (`0x0010..=0x0026`).
pub const BLOCK_COUNT: u16 = 23;

/// Adapter command: reboot the adapter.
pub const COMMAND_REBOOT: u16 = 2;

/// Adapter command: reset boiler errors.
pub const COMMAND_RESET_ERRORS: u16 = 3;

/// Addresses covered by the polled block, in ascending order.
pub fn block_addresses() -> impl Iterator<Item = u16> {
    BLOCK_START..BLOCK_START + BLOCK_COUNT
}

/// Width of the value stored in a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    /// 8-bit value.
    Byte,
    /// Full 16-bit word.
    Word,
}

impl Width {
    /// Value at which a signed interpretation turns negative.
    fn sign_boundary(self) -> i64 {
        match self {
            Width::Byte => 0x80,
            Width::Word => 0x8000,
        }
    }

    /// Modulus subtracted for two's-complement conversion.
    fn modulus(self) -> i64 {
        match self {
            Width::Byte => 0x100,
            Width::Word => 0x10000,
        }
    }

    fn mask(self) -> i64 {
        self.modulus() - 1
    }
}

/// Which part of the word carries the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteSelect {
    /// The whole word.
    Full,
    /// High byte.
    Msb,
    /// Low byte.
    Lsb,
}

/// Access mode of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn is_readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// Static description of one semantic field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterDescriptor {
    /// Holding register address.
    pub address: u16,
    /// Width of the extracted value.
    pub width: Width,
    /// Two's-complement interpretation of the extracted value.
    pub signed: bool,
    /// Byte extraction rule.
    pub byte_select: ByteSelect,
    /// Decoded value = extracted / scale; written raw = value * scale.
    pub scale: f64,
    /// Extracted value meaning "sensor not present".
    pub invalid_marker: Option<u16>,
    /// Access mode.
    pub access: Access,
    /// Bit index for boolean fields carved out of a bitfield register.
    pub bit: Option<u8>,
    /// Inclusive range accepted for writes, in decoded units.
    pub write_range: Option<(f64, f64)>,
}

impl RegisterDescriptor {
    const fn word(address: u16, access: Access) -> Self {
        Self {
            address,
            width: Width::Word,
            signed: false,
            byte_select: ByteSelect::Full,
            scale: 1.0,
            invalid_marker: None,
            access,
            bit: None,
            write_range: None,
        }
    }

    const fn byte(address: u16, byte_select: ByteSelect, access: Access) -> Self {
        Self {
            address,
            width: Width::Byte,
            signed: false,
            byte_select,
            scale: 1.0,
            invalid_marker: None,
            access,
            bit: None,
            write_range: None,
        }
    }

    const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    const fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    const fn invalid(mut self, marker: u16) -> Self {
        self.invalid_marker = Some(marker);
        self
    }

    const fn bit(mut self, bit: u8) -> Self {
        self.bit = Some(bit);
        self
    }

    const fn range(mut self, min: f64, max: f64) -> Self {
        self.write_range = Some((min, max));
        self
    }

    /// Apply the byte extraction rule to a raw word.
    pub fn extract(&self, raw: u16) -> u16 {
        match self.byte_select {
            ByteSelect::Full => raw,
            ByteSelect::Msb => (raw >> 8) & 0xFF,
            ByteSelect::Lsb => raw & 0xFF,
        }
    }

    /// Whether this field is a single bit of a bitfield register.
    pub fn is_bit(&self) -> bool {
        self.bit.is_some()
    }

    /// Whether a value falls inside the declared write range.
    pub fn accepts(&self, value: f64) -> bool {
        match self.write_range {
            Some((min, max)) => value >= min && value <= max,
            None => true,
        }
    }

    fn to_signed(&self, extracted: u16) -> i64 {
        let value = i64::from(extracted);
        if self.signed && value >= self.width.sign_boundary() {
            value - self.width.modulus()
        } else {
            value
        }
    }
}

const STATUS: RegisterDescriptor = RegisterDescriptor::word(0x0010, Access::ReadOnly);
const VERSION: RegisterDescriptor =
    RegisterDescriptor::word(0x0011, Access::ReadOnly).invalid(0xFFFF);
const CH_TEMPERATURE: RegisterDescriptor = RegisterDescriptor::word(0x0018, Access::ReadOnly)
    .signed()
    .scale(10.0)
    .invalid(0x7FFF);
const DHW_TEMPERATURE: RegisterDescriptor = RegisterDescriptor::word(0x0019, Access::ReadOnly)
    .scale(10.0)
    .invalid(0x7FFF);
const PRESSURE: RegisterDescriptor =
    RegisterDescriptor::byte(0x001A, ByteSelect::Msb, Access::ReadOnly)
        .scale(10.0)
        .invalid(0xFF);
const FLOW_RATE: RegisterDescriptor =
    RegisterDescriptor::byte(0x001B, ByteSelect::Msb, Access::ReadOnly)
        .scale(10.0)
        .invalid(0xFF);
const MODULATION: RegisterDescriptor =
    RegisterDescriptor::byte(0x001C, ByteSelect::Msb, Access::ReadOnly).invalid(0xFF);
const STATES: RegisterDescriptor =
    RegisterDescriptor::byte(0x001D, ByteSelect::Lsb, Access::ReadOnly);
const BURNER_ON: RegisterDescriptor = STATES.bit(0);
const HEATING_ACTIVE: RegisterDescriptor = STATES.bit(1);
const DHW_ACTIVE: RegisterDescriptor = STATES.bit(2);
const MAIN_ERROR: RegisterDescriptor =
    RegisterDescriptor::word(0x001E, Access::ReadOnly).invalid(0xFFFF);
const ADD_ERROR: RegisterDescriptor =
    RegisterDescriptor::word(0x001F, Access::ReadOnly).invalid(0xFFFF);
const OUTDOOR_TEMP: RegisterDescriptor =
    RegisterDescriptor::byte(0x0020, ByteSelect::Msb, Access::ReadOnly)
        .signed()
        .invalid(0x7F);
const MANUFACTURER_CODE: RegisterDescriptor =
    RegisterDescriptor::word(0x0021, Access::ReadOnly).invalid(0xFFFF);
const MODEL_CODE: RegisterDescriptor =
    RegisterDescriptor::word(0x0022, Access::ReadOnly).invalid(0xFFFF);
const CH_SETPOINT_ACTIVE: RegisterDescriptor = RegisterDescriptor::word(0x0026, Access::ReadOnly)
    .signed()
    .scale(256.0)
    .invalid(0x7FFF);
const CH_SETPOINT: RegisterDescriptor = RegisterDescriptor::word(0x0031, Access::WriteOnly)
    .signed()
    .scale(10.0)
    .range(-10.0, 100.0);
const DHW_SETPOINT: RegisterDescriptor =
    RegisterDescriptor::byte(0x0037, ByteSelect::Full, Access::WriteOnly).range(0.0, 100.0);
const MAX_MODULATION: RegisterDescriptor =
    RegisterDescriptor::byte(0x0038, ByteSelect::Full, Access::ReadWrite).range(0.0, 100.0);
const CH_MIN: RegisterDescriptor =
    RegisterDescriptor::byte(0x0033, ByteSelect::Full, Access::ReadWrite).range(0.0, 100.0);
const CH_MAX: RegisterDescriptor =
    RegisterDescriptor::byte(0x0034, ByteSelect::Full, Access::ReadWrite).range(0.0, 100.0);
const CIRCUIT_ENABLE: RegisterDescriptor = RegisterDescriptor::word(0x0039, Access::ReadWrite);
const HEATING_CIRCUIT: RegisterDescriptor = CIRCUIT_ENABLE.bit(0);
const DHW_CIRCUIT: RegisterDescriptor = CIRCUIT_ENABLE.bit(1);
const COMMAND: RegisterDescriptor = RegisterDescriptor::word(0x0080, Access::WriteOnly).range(
    COMMAND_REBOOT as f64,
    COMMAND_RESET_ERRORS as f64,
);

/// Semantic fields exposed by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Status,
    Version,
    ChTemperature,
    DhwTemperature,
    Pressure,
    FlowRate,
    Modulation,
    States,
    BurnerOn,
    HeatingActive,
    DhwActive,
    MainError,
    AddError,
    OutdoorTemp,
    ManufacturerCode,
    ModelCode,
    ChSetpointActive,
    ChSetpoint,
    DhwSetpoint,
    MaxModulation,
    ChMin,
    ChMax,
    CircuitEnable,
    HeatingCircuitEnabled,
    DhwCircuitEnabled,
    Command,
}

impl Field {
    /// Every field, in register order.
    pub const ALL: [Field; 26] = [
        Field::Status,
        Field::Version,
        Field::ChTemperature,
        Field::DhwTemperature,
        Field::Pressure,
        Field::FlowRate,
        Field::Modulation,
        Field::States,
        Field::BurnerOn,
        Field::HeatingActive,
        Field::DhwActive,
        Field::MainError,
        Field::AddError,
        Field::OutdoorTemp,
        Field::ManufacturerCode,
        Field::ModelCode,
        Field::ChSetpointActive,
        Field::ChSetpoint,
        Field::DhwSetpoint,
        Field::MaxModulation,
        Field::ChMin,
        Field::ChMax,
        Field::CircuitEnable,
        Field::HeatingCircuitEnabled,
        Field::DhwCircuitEnabled,
        Field::Command,
    ];

    /// Return the wire-level name of this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Status => "status",
            Field::Version => "version",
            Field::ChTemperature => "chTemperature",
            Field::DhwTemperature => "dhwTemperature",
            Field::Pressure => "pressure",
            Field::FlowRate => "flowRate",
            Field::Modulation => "modulation",
            Field::States => "states",
            Field::BurnerOn => "burnerOn",
            Field::HeatingActive => "heatingActive",
            Field::DhwActive => "dhwActive",
            Field::MainError => "mainError",
            Field::AddError => "addError",
            Field::OutdoorTemp => "outdoorTemp",
            Field::ManufacturerCode => "manufacturerCode",
            Field::ModelCode => "modelCode",
            Field::ChSetpointActive => "chSetpointActive",
            Field::ChSetpoint => "chSetpoint",
            Field::DhwSetpoint => "dhwSetpoint",
            Field::MaxModulation => "maxModulation",
            Field::ChMin => "chMin",
            Field::ChMax => "chMax",
            Field::CircuitEnable => "circuitEnable",
            Field::HeatingCircuitEnabled => "heatingCircuitEnabled",
            Field::DhwCircuitEnabled => "dhwCircuitEnabled",
            Field::Command => "command",
        }
    }

    /// Look up the descriptor for this field.
    pub fn descriptor(&self) -> &'static RegisterDescriptor {
        match self {
            Field::Status => &STATUS,
            Field::Version => &VERSION,
            Field::ChTemperature => &CH_TEMPERATURE,
            Field::DhwTemperature => &DHW_TEMPERATURE,
            Field::Pressure => &PRESSURE,
            Field::FlowRate => &FLOW_RATE,
            Field::Modulation => &MODULATION,
            Field::States => &STATES,
            Field::BurnerOn => &BURNER_ON,
            Field::HeatingActive => &HEATING_ACTIVE,
            Field::DhwActive => &DHW_ACTIVE,
            Field::MainError => &MAIN_ERROR,
            Field::AddError => &ADD_ERROR,
            Field::OutdoorTemp => &OUTDOOR_TEMP,
            Field::ManufacturerCode => &MANUFACTURER_CODE,
            Field::ModelCode => &MODEL_CODE,
            Field::ChSetpointActive => &CH_SETPOINT_ACTIVE,
            Field::ChSetpoint => &CH_SETPOINT,
            Field::DhwSetpoint => &DHW_SETPOINT,
            Field::MaxModulation => &MAX_MODULATION,
            Field::ChMin => &CH_MIN,
            Field::ChMax => &CH_MAX,
            Field::CircuitEnable => &CIRCUIT_ENABLE,
            Field::HeatingCircuitEnabled => &HEATING_CIRCUIT,
            Field::DhwCircuitEnabled => &DHW_CIRCUIT,
            Field::Command => &COMMAND,
        }
    }

    /// Fields whose values can be read from the cache.
    pub fn readable() -> impl Iterator<Item = Field> {
        Field::ALL
            .into_iter()
            .filter(|f| f.descriptor().access.is_readable())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown field name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown field '{0}'")]
pub struct UnknownField(pub String);

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

/// A decoded field value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl FieldValue {
    /// Numeric view of the value (`true` = 1).
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Bool(b) => f64::from(u8::from(*b)),
            FieldValue::Int(i) => *i as f64,
            FieldValue::Float(v) => *v,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

/// Decode a raw register word according to a descriptor.
///
/// Returns `None` when the extracted value equals the invalid marker.
/// The marker is compared before sign conversion and scaling.
pub fn decode(raw: u16, descriptor: &RegisterDescriptor) -> Option<FieldValue> {
    let extracted = descriptor.extract(raw);
    if descriptor.invalid_marker == Some(extracted) {
        return None;
    }

    if let Some(bit) = descriptor.bit {
        return Some(FieldValue::Bool(test_bit(extracted, bit)));
    }

    let value = descriptor.to_signed(extracted);
    if descriptor.scale == 1.0 {
        Some(FieldValue::Int(value))
    } else {
        Some(FieldValue::Float(value as f64 / descriptor.scale))
    }
}

/// Encode a value into the raw word written to the device.
///
/// Range validation is the caller's job.
pub fn encode(value: f64, descriptor: &RegisterDescriptor) -> u16 {
    let scaled = (value * descriptor.scale).round() as i64;
    let bits = (scaled & descriptor.width.mask()) as u16;
    match descriptor.byte_select {
        ByteSelect::Msb => bits << 8,
        ByteSelect::Full | ByteSelect::Lsb => bits,
    }
}

/// Test bit `n` of a raw word. Bits past 15 read as clear.
pub fn test_bit(raw: u16, n: u8) -> bool {
    raw.checked_shr(u32::from(n)).is_some_and(|v| v & 1 == 1)
}

/// Return `raw` with bit `n` set or cleared. Bits past 15 leave `raw`
/// unchanged.
pub fn set_bit(raw: u16, n: u8, on: bool) -> u16 {
    let Some(mask) = 1u16.checked_shl(u32::from(n)) else {
        return raw;
    };
    if on { raw | mask } else { raw & !mask }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(field: Field, raw: u16) -> Option<FieldValue> {
        decode(raw, field.descriptor())
    }

    #[test]
    fn test_block_covers_0x10_to_0x26() {
        let addrs: Vec<u16> = block_addresses().collect();
        assert_eq!(addrs.len(), 23);
        assert_eq!(addrs.first(), Some(&0x0010));
        assert_eq!(addrs.last(), Some(&0x0026));
    }

    #[test]
    fn test_readable_fields_live_in_block() {
        for field in Field::readable() {
            let addr = field.descriptor().address;
            if field == Field::MaxModulation
                || field == Field::ChMin
                || field == Field::ChMax
                || field == Field::CircuitEnable
                || field == Field::HeatingCircuitEnabled
                || field == Field::DhwCircuitEnabled
            {
                continue;
            }
            assert!(
                block_addresses().any(|a| a == addr),
                "{} at {:#06x} outside polled block",
                field,
                addr
            );
        }
    }

    #[test]
    fn test_ch_temperature() {
        assert_eq!(
            decoded(Field::ChTemperature, 291),
            Some(FieldValue::Float(29.1))
        );
        // 0xFF9C = -100 -> -10.0
        assert_eq!(
            decoded(Field::ChTemperature, 0xFF9C),
            Some(FieldValue::Float(-10.0))
        );
    }

    #[test]
    fn test_dhw_temperature_is_unsigned() {
        assert_eq!(
            decoded(Field::DhwTemperature, 0x8000),
            Some(FieldValue::Float(3276.8))
        );
        assert_eq!(
            decoded(Field::DhwTemperature, 455),
            Some(FieldValue::Float(45.5))
        );
    }

    #[test]
    fn test_msb_fields() {
        assert_eq!(
            decoded(Field::Pressure, 0x0C34),
            Some(FieldValue::Float(1.2))
        );
        assert_eq!(decoded(Field::Pressure, 0xFF34), None);
        assert_eq!(
            decoded(Field::FlowRate, 0x1E00),
            Some(FieldValue::Float(3.0))
        );
        assert_eq!(decoded(Field::Modulation, 0x4BFF), Some(FieldValue::Int(75)));
        assert_eq!(decoded(Field::Modulation, 0xFF00), None);
    }

    #[test]
    fn test_outdoor_temperature_signed_msb() {
        assert_eq!(decoded(Field::OutdoorTemp, 0xF812), Some(FieldValue::Int(-8)));
        assert_eq!(decoded(Field::OutdoorTemp, 0x1500), Some(FieldValue::Int(21)));
        assert_eq!(decoded(Field::OutdoorTemp, 0x7F00), None);
    }

    #[test]
    fn test_ch_setpoint_active() {
        assert_eq!(
            decoded(Field::ChSetpointActive, 0x1A80),
            Some(FieldValue::Float(26.5))
        );
        assert_eq!(
            decoded(Field::ChSetpointActive, 0xFF00),
            Some(FieldValue::Float(-1.0))
        );
    }

    #[test]
    fn test_state_bits() {
        // LSB = 0b101, MSB noise must be ignored
        let raw = 0xAB05;
        assert_eq!(decoded(Field::States, raw), Some(FieldValue::Int(5)));
        assert_eq!(decoded(Field::BurnerOn, raw), Some(FieldValue::Bool(true)));
        assert_eq!(
            decoded(Field::HeatingActive, raw),
            Some(FieldValue::Bool(false))
        );
        assert_eq!(decoded(Field::DhwActive, raw), Some(FieldValue::Bool(true)));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(decoded(Field::MainError, 0x0102), Some(FieldValue::Int(258)));
        assert_eq!(decoded(Field::MainError, 0xFFFF), None);
        assert_eq!(decoded(Field::AddError, 0xFFFF), None);
        assert_eq!(decoded(Field::Status, 0xFFFF), Some(FieldValue::Int(65535)));
    }

    #[test]
    fn test_invalid_marker_always_absent() {
        for field in Field::ALL {
            let descriptor = field.descriptor();
            let Some(marker) = descriptor.invalid_marker else {
                continue;
            };
            let raw = match descriptor.byte_select {
                ByteSelect::Msb => marker << 8,
                ByteSelect::Lsb | ByteSelect::Full => marker,
            };
            assert_eq!(decode(raw, descriptor), None, "{} marker decoded", field);
        }
    }

    #[test]
    fn test_encode_ch_setpoint() {
        let d = Field::ChSetpoint.descriptor();
        assert_eq!(encode(45.5, d), 455);
        assert_eq!(encode(-5.0, d), 0xFFCE);
    }

    #[test]
    fn test_encode_byte_fields() {
        assert_eq!(encode(55.0, Field::DhwSetpoint.descriptor()), 55);
        assert_eq!(encode(80.4, Field::MaxModulation.descriptor()), 80);
    }

    #[test]
    fn test_write_ranges() {
        let d = Field::ChSetpoint.descriptor();
        assert!(d.accepts(-10.0));
        assert!(d.accepts(100.0));
        assert!(!d.accepts(100.5));
        assert!(!Field::Command.descriptor().accepts(1.0));
        assert!(Field::Command.descriptor().accepts(3.0));
    }

    #[test]
    fn test_bit_helpers() {
        assert!(test_bit(0b0100, 2));
        assert!(!test_bit(0b0100, 1));
        assert_eq!(set_bit(0b0001, 1, true), 0b0011);
        assert_eq!(set_bit(0b0011, 0, false), 0b0010);
        assert_eq!(set_bit(0b0010, 1, true), 0b0010);
    }

    #[test]
    fn test_bit_index_past_word() {
        assert!(!test_bit(0xFFFF, 16));
        assert!(!test_bit(0xFFFF, u8::MAX));
        assert_eq!(set_bit(0x0001, 16, true), 0x0001);
        assert_eq!(set_bit(0xFFFF, 200, false), 0xFFFF);
    }

    #[test]
    fn test_ch_limits() {
        for field in [Field::ChMin, Field::ChMax] {
            let d = field.descriptor();
            assert_eq!(d.width, Width::Byte);
            assert!(d.access.is_writable());
            assert!(d.accepts(0.0) && d.accepts(100.0));
            assert!(!d.accepts(101.0));
            assert_eq!(encode(85.0, d), 85);
        }
        assert_eq!(Field::ChMin.descriptor().address, 0x0033);
        assert_eq!(Field::ChMax.descriptor().address, 0x0034);
        assert_eq!("chMax".parse::<Field>(), Ok(Field::ChMax));
    }

    /// Reference decoding of one raw word, written out longhand.
    fn expected(raw: u16, d: &RegisterDescriptor) -> Option<FieldValue> {
        let extracted = match d.byte_select {
            ByteSelect::Full => raw,
            ByteSelect::Msb => raw >> 8,
            ByteSelect::Lsb => raw & 0x00FF,
        };
        if Some(extracted) == d.invalid_marker {
            return None;
        }
        if let Some(bit) = d.bit {
            return Some(FieldValue::Bool(extracted & (1 << bit) != 0));
        }
        let mut value = i64::from(extracted);
        if d.signed {
            let bits = match d.width {
                Width::Byte => 8,
                Width::Word => 16,
            };
            if value >= 1 << (bits - 1) {
                value -= 1 << bits;
            }
        }
        if d.scale == 1.0 {
            Some(FieldValue::Int(value))
        } else {
            Some(FieldValue::Float(value as f64 / d.scale))
        }
    }

    #[test]
    fn test_decode_every_raw_value() {
        for field in Field::readable() {
            let d = field.descriptor();
            for raw in 0..=u16::MAX {
                assert_eq!(
                    decode(raw, d),
                    expected(raw, d),
                    "{} raw {:#06x}",
                    field,
                    raw
                );
            }
        }
    }

    #[test]
    fn test_field_names_roundtrip() {
        for field in Field::ALL {
            assert_eq!(field.as_str().parse::<Field>(), Ok(field));
        }
        assert_eq!("CHTEMPERATURE".parse::<Field>(), Ok(Field::ChTemperature));
        assert!("boilerColor".parse::<Field>().is_err());
    }

    #[test]
    fn test_access_modes() {
        assert!(!Field::ChSetpoint.descriptor().access.is_readable());
        assert!(Field::MaxModulation.descriptor().access.is_writable());
        assert!(!Field::ChTemperature.descriptor().access.is_writable());
    }
}
