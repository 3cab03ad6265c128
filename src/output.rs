use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

/// Something that can be printed as a single row of output.
///
/// Tables and CSV use the textual cells, JSON lines use the serde representation.
pub trait Record: serde::Serialize {
    const HEADERS: &'static [&'static str];

    fn cells(&self) -> Vec<String>;
}

impl Args {
    pub fn to_output<R: Record>(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<dyn std::io::Write>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        Ok(Output::new::<R>(io, self.format, self.output))
    }
}

pub struct Output {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv { headers: Option<&'static [&'static str]> },
    Table { comfy: comfy_table::Table },
    Jsonl,
}

impl Output {
    fn new<R: Record>(io: Box<dyn std::io::Write>, format: Format, path: Option<PathBuf>) -> Self {
        let formatter = match format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy
                    .set_header(R::HEADERS.to_vec())
                    .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table { comfy }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { headers: Some(R::HEADERS) },
        };
        Output { path, io, formatter }
    }

    pub fn record<R: Record>(&mut self, record: &R) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { headers } => {
                if let Some(headers) = headers.take() {
                    self.write_csv_row(headers)?;
                }
                self.write_csv_row(&record.cells())?;
            }
            Formatter::Table { comfy } => {
                comfy.add_row(record.cells());
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, record).map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_csv_row<S: AsRef<str>>(&mut self, values: &[S]) -> Result<(), Error> {
        let mut writer = csv_core::Writer::new();
        let mut buffer = [0; 1024];
        for (index, value) in values.iter().enumerate() {
            if index != 0 {
                let (_, written) = writer.delimiter(&mut buffer);
                self.write_all(&buffer[..written])?;
            }
            let mut input = value.as_ref().as_bytes();
            loop {
                let (result, read, written) = writer.field(input, &mut buffer);
                self.write_all(&buffer[..written])?;
                input = &input[read..];
                if let WriteResult::InputEmpty = result {
                    break;
                }
            }
        }
        let (_, written) = writer.terminator(&mut buffer);
        self.write_all(&buffer[..written])
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.io.write_all(bytes).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        match &self.formatter {
            // Headers are still written when no record was.
            Formatter::Csv { headers: Some(headers) } => {
                let headers = *headers;
                self.write_csv_row(headers)?;
            }
            Formatter::Csv { headers: None } | Formatter::Jsonl => {}
            Formatter::Table { comfy } => {
                let rendered = format!("{comfy}\n");
                self.write_all(rendered.as_bytes())?;
            }
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}
