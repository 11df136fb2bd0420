pub mod client;
pub mod decode;
pub mod fronius;
pub mod transport;

use std::fmt;
use thiserror::Error;

pub type Address = u16;

/// Largest number of holding registers a single Modbus read may return.
pub const MAX_READ_REGISTERS: u16 = 125;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SunspecError {
    #[error("config error: {0}")]
    Config(String),

    #[error("mismatch {name}, expected '{expected}', received '{received}'")]
    RegisterMismatch {
        name: String,
        expected: String,
        received: String,
    },

    #[error("connection error: {0}")]
    Connection(String),
}

impl SunspecError {
    pub fn is_connection(&self) -> bool {
        matches!(self, SunspecError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, SunspecError>;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum RegisterType {
    Uint16,
    Int16,
    Accumulator32,
    Float32,
    String,
    Bitfield16,
    Bitfield32,
    Enum16,
    Count,
    ScaleFactor,
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum Expected {
    Number(f64),
    Text(&'static str),
}

impl Expected {
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Expected::Number(e), Value::Number(v)) => e == v,
            (Expected::Text(e), Value::Text(v)) => e == v,
            _ => false,
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Number(n) => write!(f, "{n}"),
            Expected::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Number(_) => None,
            Value::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// One named entry of a vendor register map. Addresses are 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterSpec {
    pub name: &'static str,
    pub start: Address,
    pub end: Address,
    pub kind: RegisterType,
    pub scale: Option<&'static str>,
    pub expect: Option<Expected>,
    pub enum_map: Option<&'static [(u16, &'static str)]>,
}

impl RegisterSpec {
    pub const fn new(name: &'static str, start: Address, end: Address, kind: RegisterType) -> Self {
        Self {
            name,
            start,
            end,
            kind,
            scale: None,
            expect: None,
            enum_map: None,
        }
    }

    pub const fn scaled(self, scale: &'static str) -> Self {
        Self {
            scale: Some(scale),
            ..self
        }
    }

    pub const fn expect(self, expect: Expected) -> Self {
        Self {
            expect: Some(expect),
            ..self
        }
    }

    pub const fn enums(self, enum_map: &'static [(u16, &'static str)]) -> Self {
        Self {
            enum_map: Some(enum_map),
            ..self
        }
    }

    /// Number of 16 bit registers covered by this spec.
    pub fn len(&self) -> u16 {
        self.end - self.start + 1
    }

    pub fn overlaps(&self, other: &RegisterSpec) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

pub fn find_spec<'a>(map: &'a [RegisterSpec], name: &str) -> Result<&'a RegisterSpec> {
    let mut specs = map.iter().filter(|spec| spec.name == name);

    match (specs.next(), specs.next()) {
        (None, _) => Err(SunspecError::Config(format!("Spec for '{name}' not found"))),
        (Some(spec), None) => Ok(spec),
        (Some(_), Some(_)) => Err(SunspecError::Config(format!("Multiple specs for '{name}'"))),
    }
}

/// Resolves the scale factor spec a value register refers to, if any.
pub fn find_scale<'a>(map: &'a [RegisterSpec], spec: &RegisterSpec) -> Result<Option<&'a RegisterSpec>> {
    let Some(scale) = spec.scale else {
        return Ok(None);
    };

    let scale_spec = find_spec(map, scale)?;

    if scale_spec.kind != RegisterType::ScaleFactor {
        return Err(SunspecError::Config(format!(
            "Unexpected type {:?} for scale {}:{scale}",
            scale_spec.kind, spec.name
        )));
    }

    Ok(Some(scale_spec))
}

/// Checks the static invariants of a register map: one spec per name, and every
/// scale reference resolves to a non-overlapping scale factor register.
pub fn validate_map(map: &[RegisterSpec]) -> Result<()> {
    for spec in map {
        if spec.end < spec.start {
            return Err(SunspecError::Config(format!("{} ends before it starts", spec.name)));
        }

        find_spec(map, spec.name)?;

        if let Some(scale_spec) = find_scale(map, spec)? {
            if scale_spec.overlaps(spec) {
                return Err(SunspecError::Config(format!(
                    "Scale {} overlaps {}",
                    scale_spec.name, spec.name
                )));
            }
        }
    }

    Ok(())
}
