use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use crate::registers::{Mode, RegisterIndex};
use crate::units::{self, Unit, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("there is no register {0}")]
    UnknownRegister(RegisterKey),
    #[error("raw value {raw} of register {name} is outside of the configured range {range}")]
    OutOfConfiguredRange { name: &'static str, raw: i32, range: RangeDisplay },
    #[error("could not interpret the value of register {name}")]
    Unit {
        name: &'static str,
        #[source]
        source: units::Error,
    },
    #[error("register {0} is not writable")]
    NotWritable(&'static str),
    #[error("raw value {raw} does not fit register {name}")]
    WordOverflow { name: &'static str, raw: i32 },
    #[error("register {name} spans {expected} words, got {found}")]
    WordCount { name: &'static str, expected: u16, found: usize },
    #[error("register {name} must be a single word to have a unit")]
    MultiWordUnit { name: &'static str },
    #[error("address {0} is defined more than once")]
    DuplicateAddress(u16),
    #[error("name `{0}` is used by more than one register")]
    DuplicateName(&'static str),
}

impl Error {
    /// The transformer failure underlying this error, if any.
    pub fn unit_error(&self) -> Option<&units::Error> {
        match self {
            Error::Unit { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// How a register was asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterKey {
    Address(u16),
    Name(String),
}

impl std::fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterKey::Address(address) => f.write_fmt(format_args!("at address {address}")),
            RegisterKey::Name(name) => f.write_fmt(format_args!("named `{name}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeDisplay(pub Option<i32>, pub Option<i32>);

impl std::fmt::Display for RangeDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(min) = self.0 {
            f.write_fmt(format_args!("{min}"))?;
        }
        f.write_str("..=")?;
        if let Some(max) = self.1 {
            f.write_fmt(format_args!("{max}"))?;
        }
        Ok(())
    }
}

/// Everything there is to know about a single register.
///
/// Bounds are inclusive and expressed in raw register units, i.e. before the unit transform is
/// applied. A temperature register bounded by `max = 4200` accepts physical values of up to
/// 420.0 °C.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RegisterDefinition {
    pub address: u16,
    pub name: &'static str,
    pub description: &'static str,
    pub mode: Mode,
    /// Number of consecutive 16-bit words this register spans.
    pub length: u16,
    pub minimum: Option<i32>,
    pub maximum: Option<i32>,
    pub unit: Option<Unit>,
}

/// A decoded physical value along with the label of its unit.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Reading {
    pub value: Value,
    pub unit: &'static str,
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.unit.is_empty() {
            f.write_fmt(format_args!("{}", self.value))
        } else {
            f.write_fmt(format_args!("{} {}", self.value, self.unit))
        }
    }
}

impl RegisterDefinition {
    pub const fn new(address: u16, name: &'static str, description: &'static str) -> Self {
        Self {
            address,
            name,
            description,
            mode: Mode::R,
            length: 1,
            minimum: None,
            maximum: None,
            unit: None,
        }
    }

    pub const fn with_bounds(mut self, minimum: Option<i32>, maximum: Option<i32>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn with_length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    pub fn unit_label(&self) -> &'static str {
        self.unit.as_ref().map(Unit::label).unwrap_or("")
    }

    fn is_signed(&self) -> bool {
        self.unit.as_ref().is_some_and(Unit::is_signed)
    }

    fn check_bounds(&self, raw: i32) -> Result<(), Error> {
        let below = self.minimum.is_some_and(|min| raw < min);
        let above = self.maximum.is_some_and(|max| raw > max);
        if below || above {
            return Err(Error::OutOfConfiguredRange {
                name: self.name,
                raw,
                range: RangeDisplay(self.minimum, self.maximum),
            });
        }
        Ok(())
    }

    fn unit_error(&self, source: units::Error) -> Error {
        Error::Unit { name: self.name, source }
    }

    /// Interpret the words read out of this register.
    ///
    /// The configured bounds are checked before the unit transform, so a reading that is both
    /// outside of the configured range and physically implausible reports the former.
    pub fn decode(&self, words: &[u16]) -> Result<Reading, Error> {
        if words.len() != usize::from(self.length) {
            return Err(Error::WordCount {
                name: self.name,
                expected: self.length,
                found: words.len(),
            });
        }
        let [word] = words else {
            return Ok(Reading { value: Value::Words(words.to_vec()), unit: "" });
        };
        let raw = if self.is_signed() { i32::from(*word as i16) } else { i32::from(*word) };
        self.check_bounds(raw)?;
        let value = match &self.unit {
            None => Value::Integer(raw),
            Some(unit) => unit.decode(raw).map_err(|e| self.unit_error(e))?,
        };
        Ok(Reading { value, unit: self.unit_label() })
    }

    /// Produce the words to write to this register.
    ///
    /// Fails before anything would be sent to the device if the value is not acceptable.
    pub fn encode(&self, value: &Value) -> Result<Vec<u16>, Error> {
        if !self.mode.is_writable() {
            return Err(Error::NotWritable(self.name));
        }
        if self.length != 1 {
            let Value::Words(words) = value else {
                return Err(self.unit_error(units::Error::TypeMismatch {
                    expected: "a sequence of words",
                    found: value.to_string(),
                }));
            };
            if words.len() != usize::from(self.length) {
                return Err(Error::WordCount {
                    name: self.name,
                    expected: self.length,
                    found: words.len(),
                });
            }
            return Ok(words.clone());
        }
        let raw = match &self.unit {
            Some(unit) => unit.encode(value).map_err(|e| self.unit_error(e))?,
            None => value.as_integer().ok_or_else(|| {
                self.unit_error(units::Error::TypeMismatch {
                    expected: "an integer",
                    found: value.to_string(),
                })
            })?,
        };
        self.check_bounds(raw)?;
        let word = if self.is_signed() {
            i16::try_from(raw).map(|v| v as u16).ok()
        } else {
            u16::try_from(raw).ok()
        };
        let word = word.ok_or(Error::WordOverflow { name: self.name, raw })?;
        Ok(vec![word])
    }

    /// Parse a user supplied value in the representation appropriate for this register.
    pub fn parse(&self, text: &str) -> Result<Value, Error> {
        match &self.unit {
            Some(unit) => unit.parse(text).map_err(|e| self.unit_error(e)),
            None => text.trim().parse().map(Value::Integer).map_err(|_| {
                self.unit_error(units::Error::TypeMismatch {
                    expected: "an integer",
                    found: text.into(),
                })
            }),
        }
    }
}

/// Immutable set of register definitions keyed by address, with a name index.
#[derive(Debug, Clone)]
pub struct RegisterTable {
    /// Sorted by address.
    definitions: Vec<RegisterDefinition>,
    by_name: HashMap<&'static str, usize>,
}

static CATALOG: LazyLock<Arc<RegisterTable>> = LazyLock::new(|| Arc::new(RegisterTable::from_catalog()));

impl RegisterTable {
    /// The process-wide table built from the static catalog.
    pub fn catalog() -> Arc<RegisterTable> {
        Arc::clone(&CATALOG)
    }

    pub fn from_catalog() -> RegisterTable {
        let definitions = RegisterIndex::all().map(|r| r.definition()).collect::<Vec<_>>();
        let by_name = definitions.iter().enumerate().map(|(i, d)| (d.name, i)).collect();
        RegisterTable { definitions, by_name }
    }

    pub fn builder() -> RegisterTableBuilder {
        RegisterTableBuilder::default()
    }

    /// A builder pre-populated with the definitions of this table.
    pub fn to_builder(&self) -> RegisterTableBuilder {
        RegisterTableBuilder {
            definitions: self.definitions.iter().map(|d| (d.address, d.clone())).collect(),
        }
    }

    pub fn lookup_by_address(&self, address: u16) -> Result<&RegisterDefinition, Error> {
        let index = self.definitions.partition_point(|d| d.address < address);
        self.definitions
            .get(index)
            .filter(|d| d.address == address)
            .ok_or(Error::UnknownRegister(RegisterKey::Address(address)))
    }

    pub fn lookup_by_name(&self, name: &str) -> Result<&RegisterDefinition, Error> {
        self.by_name
            .get(name)
            .map(|&index| &self.definitions[index])
            .ok_or_else(|| Error::UnknownRegister(RegisterKey::Name(name.to_string())))
    }

    pub fn lookup(&self, register: RegisterIndex) -> Result<&RegisterDefinition, Error> {
        self.lookup_by_address(register.address())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct RegisterTableBuilder {
    definitions: BTreeMap<u16, RegisterDefinition>,
}

impl RegisterTableBuilder {
    pub fn insert(&mut self, definition: RegisterDefinition) -> Result<&mut Self, Error> {
        if self.definitions.contains_key(&definition.address) {
            return Err(Error::DuplicateAddress(definition.address));
        }
        self.definitions.insert(definition.address, definition);
        Ok(self)
    }

    /// Insert the definition, returning the one previously defined at the same address.
    pub fn replace(&mut self, definition: RegisterDefinition) -> Option<RegisterDefinition> {
        self.definitions.insert(definition.address, definition)
    }

    pub fn remove(&mut self, address: u16) -> Option<RegisterDefinition> {
        self.definitions.remove(&address)
    }

    pub fn build(self) -> Result<RegisterTable, Error> {
        let definitions = self.definitions.into_values().collect::<Vec<_>>();
        let mut by_name = HashMap::with_capacity(definitions.len());
        for (index, definition) in definitions.iter().enumerate() {
            if definition.unit.is_some() && definition.length != 1 {
                return Err(Error::MultiWordUnit { name: definition.name });
            }
            if by_name.insert(definition.name, index).is_some() {
                return Err(Error::DuplicateName(definition.name));
            }
        }
        Ok(RegisterTable { definitions, by_name })
    }
}
