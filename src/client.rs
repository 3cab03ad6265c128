use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{DeviceValues, RegisterBitmask};
use crate::connection::{self, Transport};
use crate::modbus::MAX_SAFE_READ_COUNT;
use crate::registers::RegisterIndex;
use crate::schema::{self, Reading, RegisterDefinition, RegisterTable};
use crate::units::Value;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Register(#[from] schema::Error),
    #[error("could not exchange data with the device")]
    Transport(#[from] connection::Error),
}

impl Error {
    /// Whether repeating the same call could succeed.
    ///
    /// Validation failures are deterministic, only transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Typed access to the registers of a single controller.
pub struct Client<T> {
    transport: T,
    table: Arc<RegisterTable>,
    values: DeviceValues,
}

impl<T: Transport> Client<T> {
    /// A client working with the built-in register catalog.
    pub fn new(transport: T) -> Self {
        Self::with_table(transport, RegisterTable::catalog())
    }

    pub fn with_table(transport: T, table: Arc<RegisterTable>) -> Self {
        Self { transport, table, values: DeviceValues::new() }
    }

    pub fn table(&self) -> &Arc<RegisterTable> {
        &self.table
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open the connection ahead of the first request.
    ///
    /// Not required, the transport opens itself when needed.
    pub async fn connect(&mut self) -> Result<(), Error> {
        self.transport.open().await?;
        Ok(())
    }

    pub async fn get_by_name(&mut self, name: &str) -> Result<Reading, Error> {
        let definition = self.table.lookup_by_name(name)?.clone();
        self.read_register(&definition).await
    }

    /// Read `length` words at `address` and interpret them per the register defined there.
    ///
    /// The address must be a known register spanning exactly `length` words.
    pub async fn get_by_address(&mut self, address: u16, length: u16) -> Result<Reading, Error> {
        let definition = self.table.lookup_by_address(address)?.clone();
        if definition.length != length {
            return Err(schema::Error::WordCount {
                name: definition.name,
                expected: definition.length,
                found: usize::from(length),
            }
            .into());
        }
        self.read_register(&definition).await
    }

    pub async fn get(&mut self, register: RegisterIndex) -> Result<Reading, Error> {
        let definition = self.table.lookup(register)?.clone();
        self.read_register(&definition).await
    }

    async fn read_register(&mut self, definition: &RegisterDefinition) -> Result<Reading, Error> {
        let words = self.transport.read(definition.address, definition.length).await?;
        self.values.set_values(definition.address, &words);
        let reading = definition.decode(&words);
        if let Err(error) = &reading {
            warn!(
                message = "implausible register value",
                register.address = definition.address,
                register.name = definition.name,
                ?words,
                error = (error as &dyn std::error::Error)
            );
        }
        Ok(reading?)
    }

    /// Validate `value` and write it to the register called `name`.
    ///
    /// Nothing is sent to the device if the value is unacceptable. Returns whether the device
    /// acknowledged the write.
    pub async fn set_by_name(&mut self, name: &str, value: &Value) -> Result<bool, Error> {
        let definition = self.table.lookup_by_name(name)?;
        let words = definition.encode(value)?;
        let address = definition.address;
        debug!(message = "writing", register.address = address, register.name = name, %value);
        let acknowledged = self.transport.write(address, &words).await?;
        if acknowledged {
            self.values.set_values(address, &words);
        } else {
            warn!(message = "device did not acknowledge the write", register.address = address);
        }
        Ok(acknowledged)
    }

    /// [`Self::set_by_name`] with the value given in its textual form, as in `"45.5"` or
    /// `"PULSE_TIMED"`.
    pub async fn set_text_by_name(&mut self, name: &str, text: &str) -> Result<bool, Error> {
        let value = self.table.lookup_by_name(name)?.parse(text)?;
        self.set_by_name(name, &value).await
    }

    /// Read every readable register matching `filter`, in as few requests as possible.
    ///
    /// Requests may span addresses that aren't defined when `allow_gaps` is set. A register
    /// whose value does not decode is reported alongside the others rather than failing the
    /// whole batch.
    pub async fn read_all(
        &mut self,
        filter: impl Fn(&RegisterDefinition) -> bool,
        allow_gaps: bool,
    ) -> Result<Vec<(RegisterDefinition, Result<Reading, schema::Error>)>, Error> {
        let selected = self
            .table
            .iter()
            .filter(|d| d.mode.is_readable() && filter(d))
            .cloned()
            .collect::<Vec<_>>();
        let mut mask = RegisterBitmask::new();
        for definition in &selected {
            mask.set_range(definition.address, definition.length);
        }
        for range in mask.find_ranges(MAX_SAFE_READ_COUNT, allow_gaps) {
            let (start, end) = range.into_inner();
            let words = self.transport.read(start, end - start + 1).await?;
            let changed = self.values.set_values(start, &words);
            debug!(message = "read range", start, end, changed);
        }
        Ok(selected
            .into_iter()
            .map(|definition| {
                let reading = self
                    .values
                    .reading_of(&definition)
                    .unwrap_or_else(|| definition.decode(&[]));
                (definition, reading)
            })
            .collect())
    }

    /// The value of register `name` as of the most recent read, without touching the device.
    pub fn last_value(&self, name: &str) -> Result<Option<Reading>, Error> {
        let definition = self.table.lookup_by_name(name)?;
        Ok(self.values.reading_of(definition).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::registers::Mode;
    use crate::units::{CirculationMode, Unit};

    /// Register storage standing in for a device.
    #[derive(Default)]
    struct FakeTransport {
        registers: HashMap<u16, u16>,
        open: bool,
        reads: Vec<(u16, u16)>,
        writes: Vec<(u16, Vec<u16>)>,
        fail: bool,
    }

    impl FakeTransport {
        fn with(registers: &[(u16, u16)]) -> Self {
            Self { registers: registers.iter().copied().collect(), ..Self::default() }
        }
    }

    impl Transport for FakeTransport {
        async fn open(&mut self) -> Result<(), connection::Error> {
            self.open = true;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn read(&mut self, address: u16, count: u16) -> Result<Vec<u16>, connection::Error> {
            self.open = true;
            if self.fail {
                return Err(connection::Error::Closed);
            }
            self.reads.push((address, count));
            (address..address + count)
                .map(|a| {
                    self.registers
                        .get(&a)
                        .copied()
                        .ok_or(connection::Error::Exception { address: a, code: 2 })
                })
                .collect()
        }

        async fn write(&mut self, address: u16, words: &[u16]) -> Result<bool, connection::Error> {
            self.open = true;
            self.writes.push((address, words.to_vec()));
            for (a, &word) in (address..).zip(words) {
                self.registers.insert(a, word);
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn get_temperature_by_name() {
        let mut client = Client::new(FakeTransport::with(&[(33024, 420)]));
        let reading = client.get_by_name("TEMP_S1").await.unwrap();
        assert_eq!(reading.value, Value::Number(42.0));
        assert_eq!(reading.unit, "°C");
        assert!(client.transport().is_open());
    }

    #[tokio::test]
    async fn get_by_index_and_address() {
        let mut client = Client::new(FakeTransport::with(&[(2049, 3), (33536, 1234)]));
        let circulation = client.get(RegisterIndex::CIRCULATION_MODE).await.unwrap();
        assert_eq!(circulation.value, Value::Circulation(CirculationMode::PulseTimed));
        let runtime = client.get_by_address(33536, 1).await.unwrap();
        assert_eq!(runtime.value, Value::Integer(1234));
        assert_eq!(runtime.unit, "");
    }

    #[tokio::test]
    async fn unknown_registers_do_not_reach_the_device() {
        let mut client = Client::new(FakeTransport::default());
        let error = client.get_by_name("INVALID_REGISTER").await.unwrap_err();
        assert!(matches!(
            error,
            Error::Register(schema::Error::UnknownRegister(schema::RegisterKey::Name(_)))
        ));
        let error = client.get_by_address(12345, 1).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Register(schema::Error::UnknownRegister(schema::RegisterKey::Address(12345)))
        ));
        let error = client.get_by_address(33024, 2).await.unwrap_err();
        assert!(matches!(error, Error::Register(schema::Error::WordCount { .. })));
        assert!(!error.is_retryable());
        assert!(client.transport().reads.is_empty());
    }

    #[tokio::test]
    async fn implausible_reading_is_an_error() {
        let mut client = Client::new(FakeTransport::with(&[(33024, 2200), (33025, (-300i16) as u16)]));
        let error = client.get_by_name("TEMP_S1").await.unwrap_err();
        let Error::Register(error) = error else { panic!("expected a register error") };
        assert!(matches!(
            error.unit_error(),
            Some(crate::units::Error::OutOfPhysicalRange { .. })
        ));
        assert!(client.get_by_name("TEMP_S2").await.is_err());
        // The words are kept even though they did not decode.
        assert!(client.last_value("TEMP_S1").is_err());
    }

    #[tokio::test]
    async fn transport_errors_are_retryable() {
        let mut transport = FakeTransport::default();
        transport.fail = true;
        let mut client = Client::new(transport);
        let error = client.get_by_name("TEMP_S1").await.unwrap_err();
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let mut client = Client::new(FakeTransport::with(&[(2049, 0)]));
        let value = Value::Circulation(CirculationMode::Timed);
        assert!(client.set_by_name("CIRCULATION_MODE", &value).await.unwrap());
        assert_eq!(client.transport().writes, [(2049, vec![2])]);
        assert_eq!(client.last_value("CIRCULATION_MODE").unwrap().unwrap().value, value);
        assert!(client.set_text_by_name("CIRCULATION_MODE", "PULSE").await.unwrap());
        let reading = client.get_by_name("CIRCULATION_MODE").await.unwrap();
        assert_eq!(reading.value, Value::Circulation(CirculationMode::Pulse));
    }

    #[tokio::test]
    async fn invalid_writes_do_not_reach_the_device() {
        let mut client = Client::new(FakeTransport::default());
        let error = client.set_by_name("TEMP_S1", &Value::Number(40.0)).await.unwrap_err();
        assert!(matches!(error, Error::Register(schema::Error::NotWritable("TEMP_S1"))));
        let error = client.set_by_name("SETUP_1", &Value::Integer(4)).await.unwrap_err();
        assert!(matches!(error, Error::Register(schema::Error::OutOfConfiguredRange { .. })));
        let error = client.set_text_by_name("CIRCULATION_MODE", "SOMETIMES").await.unwrap_err();
        assert!(matches!(error, Error::Register(schema::Error::Unit { .. })));
        assert!(client.transport().writes.is_empty());
    }

    #[tokio::test]
    async fn read_all_plans_ranges() {
        let registers = (33024..33040).map(|a| (a, 200)).collect::<Vec<_>>();
        let mut client = Client::new(FakeTransport::with(&registers));
        let readings = client.read_all(|d| d.name.starts_with("TEMP_"), false).await.unwrap();
        assert_eq!(readings.len(), 16);
        assert_eq!(client.transport().reads, [(33024, 16)]);
        for (definition, reading) in readings {
            assert_eq!(reading.unwrap().value, Value::Number(20.0), "{}", definition.name);
        }
        let reading = client.last_value("TEMP_S16").unwrap().unwrap();
        assert_eq!(reading.value, Value::Number(20.0));
        assert!(client.last_value("OUTPUT_A1").unwrap().is_none());
    }

    #[tokio::test]
    async fn read_all_with_gaps() {
        let mut builder = RegisterTable::builder();
        builder.insert(RegisterDefinition::new(10, "A", "a").with_mode(Mode::RW)).unwrap();
        builder.insert(RegisterDefinition::new(12, "B", "b")).unwrap();
        let table = builder.build().unwrap();
        let transport = FakeTransport::with(&[(10, 1), (11, 0), (12, 2)]);
        let mut client = Client::with_table(transport, Arc::new(table));
        let readings = client.read_all(|_| true, true).await.unwrap();
        assert_eq!(client.transport().reads, [(10, 3)]);
        let values = readings.into_iter().map(|(_, r)| r.unwrap().value).collect::<Vec<_>>();
        assert_eq!(values, [Value::Integer(1), Value::Integer(2)]);
    }

    #[tokio::test]
    async fn custom_table() {
        let mut builder = RegisterTable::catalog().to_builder();
        let previous = builder.replace(
            RegisterDefinition::new(33040, "VOLUME_FLOW_S17", "flow")
                .with_unit(Unit::VolumeFlow)
                .with_bounds(Some(0), Some(100)),
        );
        assert!(previous.is_some());
        let table = Arc::new(builder.build().unwrap());
        let mut client = Client::with_table(FakeTransport::with(&[(33040, 150)]), table);
        let error = client.get_by_name("VOLUME_FLOW_S17").await.unwrap_err();
        assert!(matches!(error, Error::Register(schema::Error::OutOfConfiguredRange { .. })));
    }
}
