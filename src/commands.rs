fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

/// Render an error along with all of its causes on a single line.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut cause = error.source();
    while let Some(e) = cause {
        message.push_str(": ");
        message.push_str(&e.to_string());
        cause = e.source();
    }
    message
}

pub mod registers {
    use crate::output::{self, Record};
    use crate::schema::{RegisterDefinition, RegisterTable};

    /// Search and output known modbus registers.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        /// Only list registers whose name, description or address contains this text.
        filter: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the register list")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    #[serde(transparent)]
    struct RegisterRow<'a>(&'a RegisterDefinition);

    impl Record for RegisterRow<'_> {
        const HEADERS: &'static [&'static str] =
            &["Address", "Name", "Mode", "Unit", "Min", "Max", "Description"];

        fn cells(&self) -> Vec<String> {
            let definition = self.0;
            let unit = match &definition.unit {
                None => String::new(),
                Some(unit) if unit.label().is_empty() => unit.kind_name().to_string(),
                Some(unit) => format!("{} ({})", unit.kind_name(), unit.label()),
            };
            vec![
                definition.address.to_string(),
                definition.name.to_string(),
                definition.mode.to_string(),
                unit,
                definition.minimum.map(|v| v.to_string()).unwrap_or_default(),
                definition.maximum.map(|v| v.to_string()).unwrap_or_default(),
                definition.description.to_string(),
            ]
        }
    }

    pub fn is_match(definition: &RegisterDefinition, pattern: &str) -> bool {
        let pattern = pattern.to_uppercase();
        definition.name.contains(&pattern)
            || definition.description.to_uppercase().contains(&pattern)
            || definition.address.to_string().contains(&pattern)
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let table = RegisterTable::catalog();
        let mut output = args.output.to_output::<RegisterRow>().map_err(Error::Output)?;
        for definition in table.iter() {
            if let Some(pattern) = &args.filter {
                if !is_match(definition, pattern) {
                    continue;
                }
            }
            output.record(&RegisterRow(definition)).map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn filters() {
            let table = RegisterTable::catalog();
            let temp = table.lookup_by_name("TEMP_S1").unwrap();
            assert!(is_match(temp, "temp_s"));
            assert!(is_match(temp, "storage tank"));
            assert!(is_match(temp, "3302"));
            assert!(!is_match(temp, "burner"));
            let count = table.iter().filter(|d| is_match(d, "MESSAGE_")).count();
            assert_eq!(count, 40);
        }

        #[test]
        fn register_cells() {
            let table = RegisterTable::catalog();
            let cells = RegisterRow(table.lookup_by_name("CIRCULATION_MODE").unwrap()).cells();
            assert_eq!(cells[..5], ["2049", "CIRCULATION_MODE", "RW", "circulation mode", "0"]);
            let cells = RegisterRow(table.lookup_by_name("TEMP_S1").unwrap()).cells();
            assert_eq!(cells[2..4], ["R-", "temperature (°C)"]);
        }
    }
}

pub mod read {
    use super::{error_chain, runtime};
    use crate::client::{self, Client};
    use crate::connection::{self, TcpTransport};
    use crate::output::{self, Record};
    use crate::schema::{self, Reading, RegisterDefinition, RegisterTable};
    use crate::units::Value;
    use std::collections::BTreeSet;

    /// Read and decode register values from the controller.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        /// Registers to read, given by name (`TEMP_S1`) or by address (`33024`).
        #[arg(env = "SOLVIS_REG_ADDRESS", required_unless_present = "all")]
        registers: Vec<String>,
        /// Read all known registers, regardless of those listed.
        #[arg(long)]
        all: bool,
        /// Let a single request span addresses no register is defined at.
        ///
        /// Fewer requests are needed this way, but some devices refuse such reads.
        #[arg(long)]
        allow_gaps: bool,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("`{0}` does not identify a register")]
        Resolve(String, #[source] schema::Error),
        #[error("could not read the registers")]
        Client(#[source] client::Error),
        #[error("could not output the register values")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    struct ReadingRow {
        address: u16,
        name: &'static str,
        value: Option<Value>,
        unit: &'static str,
        error: Option<String>,
    }

    impl ReadingRow {
        fn new(definition: &RegisterDefinition, reading: Result<Reading, schema::Error>) -> Self {
            let (value, unit, error) = match reading {
                Ok(Reading { value, unit }) => (Some(value), unit, None),
                Err(e) => (None, definition.unit_label(), Some(error_chain(&e))),
            };
            ReadingRow { address: definition.address, name: definition.name, value, unit, error }
        }
    }

    impl Record for ReadingRow {
        const HEADERS: &'static [&'static str] = &["Address", "Name", "Value", "Unit", "Error"];

        fn cells(&self) -> Vec<String> {
            vec![
                self.address.to_string(),
                self.name.to_string(),
                self.value.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                self.unit.to_string(),
                self.error.clone().unwrap_or_default(),
            ]
        }
    }

    /// Find the register named or numbered by `spec`.
    pub fn resolve<'a>(table: &'a RegisterTable, spec: &str) -> Result<&'a RegisterDefinition, Error> {
        let result = match spec.parse::<u16>() {
            Ok(address) => table.lookup_by_address(address),
            Err(_) => table.lookup_by_name(&spec.to_uppercase()),
        };
        result.map_err(|e| Error::Resolve(spec.to_string(), e))
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let table = RegisterTable::catalog();
        let selected = args
            .registers
            .iter()
            .map(|spec| resolve(&table, spec).map(|d| d.address))
            .collect::<Result<BTreeSet<_>, _>>()?;
        let (all, allow_gaps) = (args.all, args.allow_gaps);
        let transport = TcpTransport::new(args.connection);
        let runtime = runtime().map_err(Error::Runtime)?;
        let readings = runtime.block_on(async {
            let mut client = Client::with_table(transport, table.clone());
            client.read_all(|d| all || selected.contains(&d.address), allow_gaps).await
        });
        let readings = readings.map_err(Error::Client)?;
        let mut output = args.output.to_output::<ReadingRow>().map_err(Error::Output)?;
        for (definition, reading) in readings {
            output.record(&ReadingRow::new(&definition, reading)).map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::units::Unit;

        #[test]
        fn registers_from_the_environment() {
            use clap::Parser as _;
            // SAFETY: no other test reads or writes this variable.
            unsafe { std::env::set_var("SOLVIS_REG_ADDRESS", "33025") };
            let from_env = Args::try_parse_from(["read"]);
            let explicit = Args::try_parse_from(["read", "TEMP_S1"]);
            let all = Args::try_parse_from(["read", "--all"]);
            unsafe { std::env::remove_var("SOLVIS_REG_ADDRESS") };
            assert_eq!(from_env.unwrap().registers, ["33025"]);
            assert_eq!(explicit.unwrap().registers, ["TEMP_S1"]);
            assert!(all.unwrap().all);
            assert!(Args::try_parse_from(["read"]).is_err());
        }

        #[test]
        fn resolve_names_and_addresses() {
            let table = RegisterTable::catalog();
            assert_eq!(resolve(&table, "TEMP_S1").unwrap().address, 33024);
            assert_eq!(resolve(&table, "temp_s2").unwrap().address, 33025);
            assert_eq!(resolve(&table, "2049").unwrap().name, "CIRCULATION_MODE");
            assert!(matches!(resolve(&table, "12345"), Err(Error::Resolve(..))));
            assert!(matches!(resolve(&table, "NOPE"), Err(Error::Resolve(..))));
        }

        #[test]
        fn rows_carry_the_failure() {
            let definition =
                RegisterDefinition::new(33024, "TEMP_S1", "Temp S1").with_unit(Unit::Temperature);
            let row = ReadingRow::new(&definition, definition.decode(&[2200]));
            assert!(row.value.is_none());
            assert_eq!(row.unit, "°C");
            let error = row.error.unwrap();
            assert!(error.starts_with("could not interpret the value of register TEMP_S1: "));
            let row = ReadingRow::new(&definition, definition.decode(&[215]));
            assert_eq!(row.cells(), ["33024", "TEMP_S1", "21.5", "°C", ""]);
        }
    }
}

pub mod write {
    use super::runtime;
    use crate::client::{self, Client};
    use crate::connection::{self, TcpTransport};
    use tracing::info;

    /// Validate a value and write it into a register of the controller.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// Name of the register to write, e.g. `CIRCULATION_MODE`.
        name: String,
        /// The value in its physical unit or the enumerator name, e.g. `45.5` or `PULSE_TIMED`.
        value: String,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not write {1} into register {0}")]
        Client(String, String, #[source] client::Error),
        #[error("the device did not acknowledge the write into register {0}")]
        NotAcknowledged(String),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = runtime().map_err(Error::Runtime)?;
        let name = args.name.to_uppercase();
        let value = args.value;
        let mut client = Client::new(TcpTransport::new(args.connection));
        let acknowledged = runtime.block_on(client.set_text_by_name(&name, &value));
        match acknowledged {
            Ok(true) => {
                info!(message = "value written", register.name = %name, %value);
                Ok(())
            }
            Ok(false) => Err(Error::NotAcknowledged(name)),
            Err(e) => Err(Error::Client(name, value, e)),
        }
    }
}
