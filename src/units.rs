use num_traits::{FromPrimitive as _, ToPrimitive as _};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{value} {unit} is not plausible: {reason}")]
    OutOfPhysicalRange { value: f64, unit: &'static str, reason: Implausible },
    #[error("percentage scale is zero")]
    DivisionByZero,
    #[error("{raw} does not name any {} state", .kind.name())]
    UnknownEnumerator { kind: StatusKind, raw: i32 },
    #[error("expected {expected}, got {found}")]
    TypeMismatch { expected: &'static str, found: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Implausible {
    /// Reading is at or above the top of the sensor range, the sensor circuit is interrupted.
    OpenCircuit,
    /// Reading is at or below the bottom of the sensor range, the sensor is shorted.
    ShortCircuit,
    Range { min: f64, max: f64 },
}

impl std::fmt::Display for Implausible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Implausible::OpenCircuit => f.write_str("sensor interruption (open circuit)"),
            Implausible::ShortCircuit => f.write_str("sensor short circuit"),
            Implausible::Range { min, max } => {
                f.write_fmt(format_args!("expected a value between {min} and {max}"))
            }
        }
    }
}

const TEMPERATURE_OPEN_CIRCUIT: f64 = 220.0;
const TEMPERATURE_SHORT_CIRCUIT: f64 = -30.0;

/// How the raw register contents translate to a physical quantity.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Unit {
    /// Tenths of a degree Celsius.
    Temperature,
    /// Tenths of a liter per minute.
    VolumeFlow,
    /// Tenths of a volt.
    Voltage,
    /// The raw value divided by `scale`.
    Percentage { scale: f64 },
    /// The raw value is the duty cycle percentage already.
    PwmPercentage,
    /// Milliamps, passed through unchanged.
    Current,
    Status { status: StatusKind },
}

impl Unit {
    pub const PERCENTAGE: Self = Self::Percentage { scale: 100.0 };
    pub const CIRCULATION: Self = Self::Status { status: StatusKind::Circulation };
    pub const ANALOG_OUT: Self = Self::Status { status: StatusKind::AnalogOut };
    pub const FAULTS: Self = Self::Status { status: StatusKind::DigitalInputFaults };

    pub const fn label(&self) -> &'static str {
        match self {
            Unit::Temperature => "°C",
            Unit::VolumeFlow => "l/min",
            Unit::Voltage => "V",
            Unit::Percentage { .. } => "%",
            Unit::PwmPercentage => "% (PWM)",
            Unit::Current => "mA",
            Unit::Status { .. } => "",
        }
    }

    /// The raw value is divided by this to obtain the physical value.
    ///
    /// `None` for units that do not scale at all.
    pub const fn scale(&self) -> Option<f64> {
        match *self {
            Unit::Temperature | Unit::VolumeFlow | Unit::Voltage => Some(10.0),
            Unit::Percentage { scale } => Some(scale),
            Unit::PwmPercentage => Some(1.0),
            Unit::Current | Unit::Status { .. } => None,
        }
    }

    /// Whether the register word holds a two's complement value.
    pub const fn is_signed(&self) -> bool {
        matches!(self, Unit::Temperature | Unit::Voltage)
    }

    pub const fn kind_name(&self) -> &'static str {
        match self {
            Unit::Temperature => "temperature",
            Unit::VolumeFlow => "volume flow",
            Unit::Voltage => "voltage",
            Unit::Percentage { .. } => "percentage",
            Unit::PwmPercentage => "pwm",
            Unit::Current => "current",
            Unit::Status { status } => status.name(),
        }
    }

    /// Scale or map the raw value without checking its plausibility.
    pub fn convert(&self, raw: i32) -> Result<Value, Error> {
        match *self {
            Unit::Current => Ok(Value::Integer(raw)),
            Unit::Status { status } => status.convert(raw),
            _ => {
                let scale = self.scale().unwrap_or(1.0);
                if scale == 0.0 {
                    return Err(Error::DivisionByZero);
                }
                Ok(Value::Number(f64::from(raw) / scale))
            }
        }
    }

    /// Check a physical value against the limits inherent to the quantity.
    pub fn validate(&self, value: f64) -> Result<f64, Error> {
        let reason = match self {
            Unit::Percentage { scale } if *scale == 0.0 => return Err(Error::DivisionByZero),
            Unit::Temperature if value >= TEMPERATURE_OPEN_CIRCUIT => Implausible::OpenCircuit,
            Unit::Temperature if value <= TEMPERATURE_SHORT_CIRCUIT => Implausible::ShortCircuit,
            Unit::PwmPercentage if !(0.0..=100.0).contains(&value) => {
                Implausible::Range { min: 0.0, max: 100.0 }
            }
            _ => return Ok(value),
        };
        Err(Error::OutOfPhysicalRange { value, unit: self.label(), reason })
    }

    /// Convert a raw value to its physical value, then validate it.
    pub fn decode(&self, raw: i32) -> Result<Value, Error> {
        match self.convert(raw)? {
            Value::Number(n) => Ok(Value::Number(self.validate(n)?)),
            other => Ok(other),
        }
    }

    /// Inverse of [`Self::decode`].
    pub fn encode(&self, value: &Value) -> Result<i32, Error> {
        match *self {
            Unit::Current => value.as_integer().ok_or_else(|| mismatch("an integer", value)),
            Unit::Status { status } => status.encode(value),
            _ => {
                let physical = value.as_f64().ok_or_else(|| mismatch("a number", value))?;
                if !physical.is_finite() {
                    return Err(mismatch("a finite number", value));
                }
                let scale = self.scale().unwrap_or(1.0);
                if scale == 0.0 {
                    return Err(Error::DivisionByZero);
                }
                // Validate what the device will actually hold, not what was asked for.
                let raw = (physical * scale).round();
                self.validate(raw / scale)?;
                if raw < f64::from(i32::MIN) || raw > f64::from(i32::MAX) {
                    return Err(mismatch("a number that fits a register", value));
                }
                Ok(raw as i32)
            }
        }
    }

    /// Parse a user supplied physical value.
    pub fn parse(&self, text: &str) -> Result<Value, Error> {
        let text = text.trim();
        match *self {
            Unit::Current => text
                .parse()
                .map(Value::Integer)
                .map_err(|_| Error::TypeMismatch { expected: "an integer", found: text.into() }),
            Unit::Status { status } => status.parse(text),
            _ => text
                .parse()
                .map(Value::Number)
                .map_err(|_| Error::TypeMismatch { expected: "a number", found: text.into() }),
        }
    }
}

fn mismatch(expected: &'static str, found: &Value) -> Error {
    Error::TypeMismatch { expected, found: found.to_string() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Circulation,
    AnalogOut,
    DigitalInputFaults,
}

impl StatusKind {
    pub const fn name(&self) -> &'static str {
        match self {
            StatusKind::Circulation => "circulation mode",
            StatusKind::AnalogOut => "analog output mode",
            StatusKind::DigitalInputFaults => "digital input fault",
        }
    }

    fn convert(self, raw: i32) -> Result<Value, Error> {
        let unknown = Error::UnknownEnumerator { kind: self, raw };
        match self {
            StatusKind::Circulation => {
                CirculationMode::from_i32(raw).map(Value::Circulation).ok_or(unknown)
            }
            StatusKind::AnalogOut => {
                AnalogOutMode::from_i32(raw).map(Value::AnalogOut).ok_or(unknown)
            }
            StatusKind::DigitalInputFaults => {
                let bits = u16::try_from(raw).map_err(|_| unknown.clone())?;
                let mut faults = Vec::new();
                for bit in 0..u16::BITS {
                    if bits & (1 << bit) == 0 {
                        continue;
                    }
                    let fault = DigitalInputFault::from_u32(bit).ok_or_else(|| {
                        Error::UnknownEnumerator { kind: self, raw: 1 << bit }
                    })?;
                    faults.push(fault);
                }
                Ok(Value::Faults(faults))
            }
        }
    }

    fn encode(self, value: &Value) -> Result<i32, Error> {
        let code = match (self, value) {
            (StatusKind::Circulation, Value::Circulation(mode)) => mode.to_i32(),
            (StatusKind::AnalogOut, Value::AnalogOut(mode)) => mode.to_i32(),
            (StatusKind::DigitalInputFaults, Value::Faults(faults)) => {
                Some(faults.iter().fold(0, |bits, fault| bits | fault.bit()))
            }
            _ => None,
        };
        code.ok_or_else(|| mismatch(self.name(), value))
    }

    fn parse(self, text: &str) -> Result<Value, Error> {
        let mismatch = || Error::TypeMismatch { expected: self.name(), found: text.into() };
        match self {
            StatusKind::Circulation => {
                text.parse().map(Value::Circulation).map_err(|_| mismatch())
            }
            StatusKind::AnalogOut => text.parse().map(Value::AnalogOut).map_err(|_| mismatch()),
            StatusKind::DigitalInputFaults => text
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| name.parse().map_err(|_| mismatch()))
                .collect::<Result<Vec<DigitalInputFault>, _>>()
                .map(Value::Faults),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    num_derive::FromPrimitive,
    num_derive::ToPrimitive,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CirculationMode {
    Off = 0,
    Pulse = 1,
    Timed = 2,
    PulseTimed = 3,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    num_derive::FromPrimitive,
    num_derive::ToPrimitive,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalogOutMode {
    AutoPwm = 0,
    ManualPwm = 1,
    AutoAnalog = 2,
    ManualAnalog = 3,
}

/// Meaning of the individual bits of the digital input fault register.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    num_derive::FromPrimitive,
    num_derive::ToPrimitive,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DigitalInputFault {
    FusePowerSupplyModule = 0,
    BurnerFault = 1,
    BurnerLockout = 2,
    HeatingPressure = 3,
    NotDefined = 4,
    SolarPressure = 5,
}

impl DigitalInputFault {
    pub fn bit(self) -> i32 {
        1 << (self as i32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    Number(f64),
    Circulation(CirculationMode),
    AnalogOut(AnalogOutMode),
    Faults(Vec<DigitalInputFault>),
    /// Register contents this crate does not interpret.
    Words(Vec<u16>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Integer(n) => Some(f64::from(n)),
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match *self {
            Value::Integer(n) => Some(n),
            Value::Number(n) if n.fract() == 0.0 && n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) => {
                Some(n as i32)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(n) => f.write_fmt(format_args!("{n}")),
            Value::Number(n) => f.write_fmt(format_args!("{n}")),
            Value::Circulation(m) => f.write_str(m.into()),
            Value::AnalogOut(m) => f.write_str(m.into()),
            Value::Faults(faults) => {
                for (index, fault) in faults.iter().enumerate() {
                    if index != 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(fault.into())?;
                }
                Ok(())
            }
            Value::Words(words) => f.write_fmt(format_args!("{words:?}")),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq as _;
        match self {
            Value::Integer(n) => serializer.serialize_i32(*n),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Circulation(m) => serializer.serialize_str(m.into()),
            Value::AnalogOut(m) => serializer.serialize_str(m.into()),
            Value::Faults(faults) => {
                let mut seq = serializer.serialize_seq(Some(faults.len()))?;
                for fault in faults {
                    seq.serialize_element(<&'static str>::from(fault))?;
                }
                seq.end()
            }
            Value::Words(words) => words.serialize(serializer),
        }
    }
}
