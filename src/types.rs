//! Core data types for mini-scada
//!
//! This module contains the fundamental data structures used throughout
//! the crate for describing tags, samples, and their values.
//!
//! # Main Types
//!
//! - [`Area`] - Controller memory region (data block, inputs, outputs, markers)
//! - [`DataType`] - Supported tag types and their wire widths
//! - [`TagSpec`] - Immutable description of where a tag lives and how to decode it
//! - [`Value`] - Decoded value, or an error marker when the read failed
//! - [`Sample`] - A single timestamped observation of a tag
//!
//! # Type Widths
//!
//! | Type   | Aliases | Bytes | Decoded as       |
//! |--------|---------|-------|------------------|
//! | BOOL   |         | 1     | bool (one bit)   |
//! | BYTE   | USINT   | 1     | unsigned integer |
//! | WORD   | UINT    | 2     | unsigned integer |
//! | DWORD  | UDINT   | 4     | unsigned integer |
//! | INT16  | INT     | 2     | signed integer   |
//! | INT32  | DINT    | 4     | signed integer   |
//! | REAL32 | REAL    | 4     | f32              |
//! | REAL64 | LREAL   | 8     | f64              |
//! | RAW(n) |         | n     | not decodable    |
//!
//! Multi-byte values are big-endian on the wire unless the driver says otherwise.

use crate::error::TagSpecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Controller memory region used for addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Area {
    /// Data block (DBn)
    #[default]
    #[serde(rename = "DB")]
    DataBlock,
    /// Process image of inputs
    #[serde(rename = "I", alias = "E", alias = "PE")]
    Input,
    /// Process image of outputs
    #[serde(rename = "Q", alias = "A", alias = "PA")]
    Output,
    /// Flag / marker memory
    #[serde(rename = "M", alias = "MK")]
    Marker,
}

impl Area {
    /// Whether the area is addressed by block number
    pub fn has_blocks(&self) -> bool {
        matches!(self, Area::DataBlock)
    }

    /// Short mnemonic used in configuration files
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Area::DataBlock => "DB",
            Area::Input => "I",
            Area::Output => "Q",
            Area::Marker => "M",
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

impl FromStr for Area {
    type Err = TagSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DB" => Ok(Area::DataBlock),
            "I" | "E" | "PE" => Ok(Area::Input),
            "Q" | "A" | "PA" => Ok(Area::Output),
            "M" | "MK" => Ok(Area::Marker),
            other => Err(TagSpecError::UnknownArea(other.to_string())),
        }
    }
}

/// Byte order of multi-byte values on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Most significant byte first (S7 convention)
    #[default]
    BigEndian,
    /// Least significant byte first
    LittleEndian,
}

/// Represents the type of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    /// Single bit
    Bool,
    /// 8-bit unsigned integer
    Byte,
    /// 16-bit unsigned integer
    Word,
    /// 32-bit unsigned integer
    DWord,
    /// 16-bit signed integer
    #[default]
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 32-bit floating point
    Real32,
    /// 64-bit floating point
    Real64,
    /// Raw bytes (no scalar interpretation)
    Raw(usize),
}

impl DataType {
    /// Returns the size in bytes of this type on the wire
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::Bool | DataType::Byte => 1,
            DataType::Word | DataType::Int16 => 2,
            DataType::DWord | DataType::Int32 | DataType::Real32 => 4,
            DataType::Real64 => 8,
            DataType::Raw(size) => *size,
        }
    }

    /// Returns true if the type decodes to a scalar [`Value`]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, DataType::Raw(_))
    }

    /// Returns true for floating point types
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Real32 | DataType::Real64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "BOOL"),
            DataType::Byte => write!(f, "BYTE"),
            DataType::Word => write!(f, "WORD"),
            DataType::DWord => write!(f, "DWORD"),
            DataType::Int16 => write!(f, "INT16"),
            DataType::Int32 => write!(f, "INT32"),
            DataType::Real32 => write!(f, "REAL32"),
            DataType::Real64 => write!(f, "REAL64"),
            DataType::Raw(size) => write!(f, "RAW({})", size),
        }
    }
}

impl FromStr for DataType {
    type Err = TagSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let parsed = match upper.as_str() {
            "BOOL" => DataType::Bool,
            "BYTE" | "USINT" => DataType::Byte,
            "WORD" | "UINT" => DataType::Word,
            "DWORD" | "UDINT" => DataType::DWord,
            "INT" | "INT16" => DataType::Int16,
            "DINT" | "INT32" => DataType::Int32,
            "REAL" | "REAL32" => DataType::Real32,
            "LREAL" | "REAL64" => DataType::Real64,
            _ => {
                let size = upper
                    .strip_prefix("RAW(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|n| n.trim().parse::<usize>().ok())
                    .ok_or_else(|| TagSpecError::UnknownDataType(s.trim().to_string()))?;
                DataType::Raw(size)
            }
        };
        Ok(parsed)
    }
}

impl TryFrom<String> for DataType {
    type Error = TagSpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

/// Immutable description of one process variable
///
/// Constructed through [`TagSpec::new`], [`TagSpec::new_bool`] or
/// [`TagSpec::from_parts`], all of which validate the bit offset rules:
/// BOOL tags take a bit in `0..=7`, every other type must use bit 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TagSpecDef")]
pub struct TagSpec {
    name: String,
    area: Area,
    block_index: u16,
    byte_offset: usize,
    bit_offset: u8,
    data_type: DataType,
}

impl TagSpec {
    /// Create a non-boolean tag
    pub fn new(
        name: impl Into<String>,
        area: Area,
        block_index: u16,
        byte_offset: usize,
        data_type: DataType,
    ) -> Result<Self, TagSpecError> {
        Self::from_parts(name, area, block_index, byte_offset, None, data_type)
    }

    /// Create a BOOL tag addressing one bit
    pub fn new_bool(
        name: impl Into<String>,
        area: Area,
        block_index: u16,
        byte_offset: usize,
        bit_offset: u8,
    ) -> Result<Self, TagSpecError> {
        Self::from_parts(
            name,
            area,
            block_index,
            byte_offset,
            Some(bit_offset),
            DataType::Bool,
        )
    }

    /// Create a tag from loosely specified parts, validating all invariants
    pub fn from_parts(
        name: impl Into<String>,
        area: Area,
        block_index: u16,
        byte_offset: usize,
        bit_offset: Option<u8>,
        data_type: DataType,
    ) -> Result<Self, TagSpecError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(TagSpecError::EmptyName);
        }
        if data_type.size_bytes() == 0 {
            return Err(TagSpecError::ZeroWidth(name));
        }

        let bit_offset = bit_offset.unwrap_or(0);
        if bit_offset > 7 {
            return Err(TagSpecError::BitOffsetOutOfRange(bit_offset));
        }
        if data_type != DataType::Bool && bit_offset != 0 {
            return Err(TagSpecError::BitOffsetOnNonBool {
                name,
                data_type,
                bit: bit_offset,
            });
        }

        Ok(Self {
            name,
            area,
            block_index: if area.has_blocks() { block_index } else { 0 },
            byte_offset,
            bit_offset,
            data_type,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn area(&self) -> Area {
        self.area
    }

    pub fn block_index(&self) -> u16 {
        self.block_index
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn bit_offset(&self) -> u8 {
        self.bit_offset
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Number of bytes to fetch for this tag
    pub fn size(&self) -> usize {
        self.data_type.size_bytes()
    }

    /// One past the last byte this tag occupies
    pub fn end_offset(&self) -> usize {
        self.byte_offset + self.size()
    }

    /// Human-readable S7-style address, e.g. `DB1.DBX4.0` or `MW10`
    pub fn address(&self) -> String {
        let width = match self.data_type {
            DataType::Bool => "X",
            DataType::Byte => "B",
            DataType::Word | DataType::Int16 => "W",
            _ => "D",
        };
        match self.area {
            Area::DataBlock if self.data_type == DataType::Bool => format!(
                "DB{}.DBX{}.{}",
                self.block_index, self.byte_offset, self.bit_offset
            ),
            Area::DataBlock => format!("DB{}.DB{}{}", self.block_index, width, self.byte_offset),
            area if self.data_type == DataType::Bool => {
                format!("{}{}.{}", area, self.byte_offset, self.bit_offset)
            }
            area => format!("{}{}{}", area, width, self.byte_offset),
        }
    }
}

/// Wire form of [`TagSpec`], also accepting the legacy `db`/`byte_index`/`bit_index` names
#[derive(Deserialize)]
struct TagSpecDef {
    name: String,
    #[serde(default)]
    area: Area,
    #[serde(default, alias = "db")]
    block_index: u16,
    #[serde(alias = "byte_index")]
    byte_offset: usize,
    #[serde(default, alias = "bit_index")]
    bit_offset: Option<u8>,
    data_type: DataType,
}

impl TryFrom<TagSpecDef> for TagSpec {
    type Error = TagSpecError;

    fn try_from(def: TagSpecDef) -> Result<Self, Self::Error> {
        TagSpec::from_parts(
            def.name,
            def.area,
            def.block_index,
            def.byte_offset,
            def.bit_offset,
            def.data_type,
        )
    }
}

/// Why a sample carries no value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleErrorKind {
    NotConnected,
    AddressOutOfRange,
    Timeout,
    ProtocolError,
    BufferTooShort,
    UnsupportedType,
}

impl SampleErrorKind {
    /// Stable identifier used in persisted records
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleErrorKind::NotConnected => "not_connected",
            SampleErrorKind::AddressOutOfRange => "address_out_of_range",
            SampleErrorKind::Timeout => "timeout",
            SampleErrorKind::ProtocolError => "protocol_error",
            SampleErrorKind::BufferTooShort => "buffer_too_short",
            SampleErrorKind::UnsupportedType => "unsupported_type",
        }
    }
}

impl fmt::Display for SampleErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SampleErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_connected" => Ok(SampleErrorKind::NotConnected),
            "address_out_of_range" => Ok(SampleErrorKind::AddressOutOfRange),
            "timeout" => Ok(SampleErrorKind::Timeout),
            "protocol_error" => Ok(SampleErrorKind::ProtocolError),
            "buffer_too_short" => Ok(SampleErrorKind::BufferTooShort),
            "unsupported_type" => Ok(SampleErrorKind::UnsupportedType),
            other => Err(format!("unknown error kind '{}'", other)),
        }
    }
}

/// A decoded tag value, or the reason there is none
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Error(SampleErrorKind),
}

impl Value {
    /// Numeric view for plotting and CSV export; error markers have none
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(v) => Some(*v),
            Value::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Name of the variant, as stored in the sample log
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Error(_) => "error",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Error(kind) => write!(f, "<error: {}>", kind),
        }
    }
}

/// A single timestamped observation of a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Name of the tag this sample belongs to
    pub tag_name: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Decoded value or error marker
    pub value: Value,
}

impl Sample {
    pub fn new(tag_name: impl Into<String>, timestamp: f64, value: Value) -> Self {
        Self {
            tag_name: tag_name.into(),
            timestamp,
            value,
        }
    }

    /// Create an error-marker sample
    pub fn error(tag_name: impl Into<String>, timestamp: f64, kind: SampleErrorKind) -> Self {
        Self::new(tag_name, timestamp, Value::Error(kind))
    }

    /// Timestamp as a UTC date-time
    pub fn datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1e9).round().min(999_999_999.0) as u32;
        chrono::DateTime::from_timestamp(secs as i64, nanos)
    }
}

/// Connection status as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No session
    #[default]
    Disconnected,
    /// Session being established
    Connecting,
    /// Session open
    Connected,
    /// Last connect or poll failed; call connect again to recover
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Faulted => write!(f, "Faulted"),
        }
    }
}

/// State of the polling service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceState {
    /// Not connected
    #[default]
    Idle,
    /// Connect in progress
    Connecting,
    /// Connected, ready to poll
    Connected,
    /// Acquisition loop running
    Polling,
    /// Connected, polling halted by request
    Stopped,
    /// Driver failure; connect again to recover
    Faulted,
}

impl ServiceState {
    /// Whether a controller session is open in this state
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ServiceState::Connected | ServiceState::Polling | ServiceState::Stopped
        )
    }

    /// Whether `start_polling` is accepted in this state
    pub fn can_start_polling(&self) -> bool {
        matches!(self, ServiceState::Connected | ServiceState::Stopped)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Idle => write!(f, "Idle"),
            ServiceState::Connecting => write!(f, "Connecting"),
            ServiceState::Connected => write!(f, "Connected"),
            ServiceState::Polling => write!(f, "Polling"),
            ServiceState::Stopped => write!(f, "Stopped"),
            ServiceState::Faulted => write!(f, "Faulted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_size() {
        assert_eq!(DataType::Bool.size_bytes(), 1);
        assert_eq!(DataType::Byte.size_bytes(), 1);
        assert_eq!(DataType::Word.size_bytes(), 2);
        assert_eq!(DataType::Int16.size_bytes(), 2);
        assert_eq!(DataType::DWord.size_bytes(), 4);
        assert_eq!(DataType::Int32.size_bytes(), 4);
        assert_eq!(DataType::Real32.size_bytes(), 4);
        assert_eq!(DataType::Real64.size_bytes(), 8);
        assert_eq!(DataType::Raw(16).size_bytes(), 16);
    }

    #[test]
    fn test_data_type_parse_aliases() {
        assert_eq!("REAL".parse::<DataType>().unwrap(), DataType::Real32);
        assert_eq!("real32".parse::<DataType>().unwrap(), DataType::Real32);
        assert_eq!("INT".parse::<DataType>().unwrap(), DataType::Int16);
        assert_eq!("DINT".parse::<DataType>().unwrap(), DataType::Int32);
        assert_eq!("dword".parse::<DataType>().unwrap(), DataType::DWord);
        assert_eq!("RAW(12)".parse::<DataType>().unwrap(), DataType::Raw(12));
        assert!(matches!(
            "STRING".parse::<DataType>(),
            Err(TagSpecError::UnknownDataType(_))
        ));
    }

    #[test]
    fn test_area_parse() {
        assert_eq!("db".parse::<Area>().unwrap(), Area::DataBlock);
        assert_eq!("E".parse::<Area>().unwrap(), Area::Input);
        assert_eq!("Q".parse::<Area>().unwrap(), Area::Output);
        assert_eq!("MK".parse::<Area>().unwrap(), Area::Marker);
        assert!("T".parse::<Area>().is_err());
    }

    #[test]
    fn test_tag_spec_bit_rules() {
        let pump = TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0).unwrap();
        assert_eq!(pump.bit_offset(), 0);
        assert_eq!(pump.size(), 1);

        assert_eq!(
            TagSpec::new_bool("Bad", Area::DataBlock, 1, 4, 8),
            Err(TagSpecError::BitOffsetOutOfRange(8))
        );

        let err = TagSpec::from_parts("Level", Area::DataBlock, 1, 0, Some(3), DataType::Real32)
            .unwrap_err();
        assert!(matches!(err, TagSpecError::BitOffsetOnNonBool { bit: 3, .. }));

        assert_eq!(
            TagSpec::new("  ", Area::DataBlock, 1, 0, DataType::Real32),
            Err(TagSpecError::EmptyName)
        );
        assert!(matches!(
            TagSpec::new("Blob", Area::DataBlock, 1, 0, DataType::Raw(0)),
            Err(TagSpecError::ZeroWidth(_))
        ));
    }

    #[test]
    fn test_tag_spec_non_db_block_is_normalised() {
        let tag = TagSpec::new("Motor", Area::Marker, 7, 10, DataType::Word).unwrap();
        assert_eq!(tag.block_index(), 0);
        assert_eq!(tag.address(), "MW10");
    }

    #[test]
    fn test_tag_spec_address() {
        let level = TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32).unwrap();
        assert_eq!(level.address(), "DB1.DBD0");
        let pump = TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0).unwrap();
        assert_eq!(pump.address(), "DB1.DBX4.0");
        let input = TagSpec::new_bool("Start", Area::Input, 0, 2, 5).unwrap();
        assert_eq!(input.address(), "I2.5");
    }

    #[test]
    fn test_tag_spec_deserialize_legacy_names() {
        let json = r#"{"name":"PumpOn","area":"DB","db":1,"byte_index":4,"bit_index":0,"data_type":"BOOL"}"#;
        let tag: TagSpec = serde_json::from_str(json).unwrap();
        assert_eq!(tag.name(), "PumpOn");
        assert_eq!(tag.block_index(), 1);
        assert_eq!(tag.byte_offset(), 4);
        assert_eq!(tag.data_type(), DataType::Bool);

        let bad = r#"{"name":"X","area":"DB","db":1,"byte_offset":0,"bit_offset":2,"data_type":"REAL"}"#;
        assert!(serde_json::from_str::<TagSpec>(bad).is_err());
    }

    #[test]
    fn test_tag_spec_serialize_roundtrip_through_json() {
        let tag = TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32).unwrap();
        let json = serde_json::to_string(&tag).unwrap();
        assert!(json.contains(r#""data_type":"REAL32""#));
        let parsed: TagSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tag);
    }

    #[test]
    fn test_value_as_f64() {
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::Int(-3).as_f64(), Some(-3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Error(SampleErrorKind::Timeout).as_f64(), None);
        assert!(Value::Error(SampleErrorKind::Timeout).is_error());
    }

    #[test]
    fn test_sample_datetime() {
        let sample = Sample::new("t", 1_700_000_000.5, Value::Int(1));
        let dt = sample.datetime().unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_service_state_predicates() {
        assert!(!ServiceState::Idle.can_start_polling());
        assert!(!ServiceState::Faulted.can_start_polling());
        assert!(ServiceState::Connected.can_start_polling());
        assert!(ServiceState::Stopped.can_start_polling());
        assert!(ServiceState::Polling.is_connected());
        assert!(!ServiceState::Connecting.is_connected());
    }
}
