use crate::modbus::{self, ModbusTCPCodec, Operation, Request, Response, ResponseKind};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("the device closed the connection")]
    Closed,
    #[error("no response to request {0} within the read timeout")]
    Timeout(u16),
    #[error("the device responded with exception code {code} to a request for register {address}")]
    Exception { address: u16, code: u8 },
    #[error("the device responded with {found} words, requested {expected}")]
    ShortResponse { expected: u16, found: usize },
    #[error("the device sent a response of the wrong kind")]
    UnexpectedResponse,
}

/// Moves raw register words to and from the device.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Establish the connection, if it isn't established already.
    async fn open(&mut self) -> Result<(), Error>;

    fn is_open(&self) -> bool;

    /// Read `count` consecutive holding registers starting at `address`.
    async fn read(&mut self, address: u16, count: u16) -> Result<Vec<u16>, Error>;

    /// Write consecutive holding registers starting at `address`.
    ///
    /// Returns whether the device acknowledged exactly the requested registers.
    async fn write(&mut self, address: u16, words: &[u16]) -> Result<bool, Error>;
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Host name or IP address of the controller's Modbus TCP interface.
    #[arg(long, env = "SOLVIS_HOST", default_value = "localhost")]
    host: String,

    /// Modbus TCP port.
    #[arg(long, env = "SOLVIS_PORT", default_value_t = 502)]
    port: u16,

    /// The modbus unit (device) ID.
    #[arg(long, short = 'i', env = "SOLVIS_UNIT_ID", default_value_t = 101)]
    unit_id: u8,

    /// If the modbus response isn't received in this amount of time, consider the request
    /// failed.
    #[arg(long, default_value = "1s")]
    read_timeout: humantime::Duration,

    /// Reconnect to the modbus server after the specified number of consecutive reads time out.
    #[arg(long, default_value = "3")]
    reconnect_after_timeouts: usize,

    /// The amount of additional time to wait after receiving a server busy exception.
    ///
    /// When busy, modbus gateways can respond with an exception code 6. Give the device this
    /// amount of time to finish its current work before retrying.
    #[arg(long, default_value = "25ms")]
    server_busy_retry_delay: humantime::Duration,

    /// How many times a request answered with the server busy exception is retried.
    #[arg(long, default_value = "5")]
    server_busy_retries: usize,
}

impl Args {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

type TcpIo = Framed<TcpStream, ModbusTCPCodec>;

/// [`Transport`] over Modbus TCP.
///
/// The connection is opened on first use and dropped whenever it misbehaves, so that the
/// following request will reconnect.
pub struct TcpTransport {
    args: Args,
    io: Option<TcpIo>,
    transaction_id: u16,
    reconnect_countdown: usize,
}

impl TcpTransport {
    pub fn new(args: Args) -> Self {
        let reconnect_countdown = args.reconnect_after_timeouts;
        Self { args, io: None, transaction_id: 0, reconnect_countdown }
    }

    fn new_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    async fn connect(&mut self) -> Result<TcpIo, Error> {
        let address = self.args.address();
        info!(message = "connecting...", %address);
        let addresses = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| Error::LookupHost(e, address.clone()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let socket =
            TcpStream::connect(&*addresses).await.map_err(|e| Error::Connect(e, address.clone()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        info!(message = "connected");
        self.reconnect_countdown = self.args.reconnect_after_timeouts;
        Ok(Framed::new(socket, ModbusTCPCodec {}))
    }

    /// Send a single request and wait for its response.
    async fn send(&mut self, operation: Operation) -> Result<Response, Error> {
        self.open().await?;
        let transaction_id = self.new_transaction_id();
        let request = Request { device_id: self.args.unit_id, transaction_id, operation };
        let Some(io) = self.io.as_mut() else {
            return Err(Error::Closed);
        };
        let outcome = tokio::time::timeout(*self.args.read_timeout, exchange(io, &request)).await;
        match outcome {
            Ok(Ok(response)) => {
                self.reconnect_countdown = self.args.reconnect_after_timeouts;
                Ok(response)
            }
            Ok(Err(error)) => {
                warn!(
                    message = "modbus exchange failed, will reconnect",
                    error = (&error as &dyn std::error::Error)
                );
                self.io = None;
                Err(error)
            }
            Err(_) => {
                debug!(
                    message = "request timed out",
                    transaction_id,
                    reconnect_countdown = self.reconnect_countdown
                );
                self.reconnect_countdown = self.reconnect_countdown.saturating_sub(1);
                if self.reconnect_countdown == 0 {
                    warn!("too many requests timed out, will reconnect");
                    self.io = None;
                }
                Err(Error::Timeout(transaction_id))
            }
        }
    }

    /// [`Self::send`] but retries `Server Busy` exceptions and reports other exceptions as
    /// errors.
    async fn send_retrying(&mut self, operation: Operation) -> Result<ResponseKind, Error> {
        let mut retries = self.args.server_busy_retries;
        loop {
            let response = self.send(operation.clone()).await?;
            if response.is_server_busy() && retries > 0 {
                retries -= 1;
                tokio::time::sleep(*self.args.server_busy_retry_delay).await;
                continue;
            }
            if let Some(code) = response.exception_code() {
                return Err(Error::Exception { address: operation.address(), code });
            }
            return Ok(response.kind);
        }
    }
}

async fn exchange(io: &mut TcpIo, request: &Request) -> Result<Response, Error> {
    io.send(request).await.map_err(Error::Send)?;
    loop {
        let response = io.next().await.ok_or(Error::Closed)?.map_err(Error::Receive)?;
        if response.transaction_id == request.transaction_id {
            trace!(message = "decoded a response", transaction = response.transaction_id);
            return Ok(response);
        }
        debug!(
            message = "a response we were not expecting",
            transaction = response.transaction_id
        );
    }
}

impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<(), Error> {
        if self.io.is_none() {
            let io = self.connect().await?;
            self.io = Some(io);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.io.is_some()
    }

    async fn read(&mut self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        let operation = modbus::Operation::GetHoldings { address, count };
        match self.send_retrying(operation).await? {
            ResponseKind::GetHoldings { values } if values.len() == usize::from(count) => {
                debug!(message = "read registers", address, ?values);
                Ok(values)
            }
            ResponseKind::GetHoldings { values } => {
                Err(Error::ShortResponse { expected: count, found: values.len() })
            }
            _ => Err(Error::UnexpectedResponse),
        }
    }

    async fn write(&mut self, address: u16, words: &[u16]) -> Result<bool, Error> {
        let operation = modbus::Operation::SetHoldings { address, values: words.to_vec() };
        match self.send_retrying(operation).await? {
            ResponseKind::SetHoldings { address: a, count } => {
                debug!(message = "wrote registers", address, ?words);
                Ok(a == address && usize::from(count) == words.len())
            }
            _ => Err(Error::UnexpectedResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    fn args(port: u16) -> Args {
        args_with(port, &[])
    }

    fn args_with(port: u16, extra: &[&str]) -> Args {
        let port = port.to_string();
        let mut arguments = vec!["test", "--host", "127.0.0.1", "--port", port.as_str(), "--unit-id", "7"];
        arguments.extend(["--server-busy-retry-delay", "1ms"]);
        arguments.extend(extra);
        Args::parse_from(arguments)
    }

    async fn request(socket: &mut TcpStream) -> Vec<u8> {
        let mut header = [0; 6];
        socket.read_exact(&mut header).await.unwrap();
        let length = u16::from_be_bytes([header[4], header[5]]);
        let mut rest = vec![0; usize::from(length)];
        socket.read_exact(&mut rest).await.unwrap();
        [&header[..], &rest[..]].concat()
    }

    #[tokio::test]
    async fn read_and_write_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let read = request(&mut socket).await;
            assert_eq!(&read[2..], [0, 0, 0, 6, 7, 3, 0x81, 0x00, 0, 2]);
            let (t0, t1) = (read[0], read[1]);
            // A busy response first, the client is expected to retry.
            socket.write_all(&[t0, t1, 0, 0, 0, 3, 7, 0x83, 6]).await.unwrap();
            let retry = request(&mut socket).await;
            let (t0, t1) = (retry[0], retry[1]);
            socket.write_all(&[t0, t1, 0, 0, 0, 7, 7, 3, 4, 0x01, 0xA4, 0xFE, 0xD4]).await.unwrap();
            let write = request(&mut socket).await;
            assert_eq!(&write[6..], [7, 0x10, 0x08, 0x01, 0, 1, 2, 0, 3]);
            let (t0, t1) = (write[0], write[1]);
            socket.write_all(&[t0, t1, 0, 0, 0, 6, 7, 0x10, 0x08, 0x01, 0, 1]).await.unwrap();
            let denied = request(&mut socket).await;
            let (t0, t1) = (denied[0], denied[1]);
            socket.write_all(&[t0, t1, 0, 0, 0, 3, 7, 0x90, 2]).await.unwrap();
        });

        let mut transport = TcpTransport::new(args(port));
        assert!(!transport.is_open());
        assert_eq!(transport.read(33024, 2).await.unwrap(), [420, 0xFED4]);
        assert!(transport.is_open());
        assert!(transport.write(2049, &[3]).await.unwrap());
        let error = transport.write(2049, &[3]).await.unwrap_err();
        assert!(matches!(error, Error::Exception { address: 2049, code: 2 }));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_configured_number_of_timeouts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = tokio::spawn(async move {
            // Accept, then never answer.
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            drop(socket);
        });
        let extra = ["--read-timeout", "20ms", "--reconnect-after-timeouts", "2"];
        let mut transport = TcpTransport::new(args_with(port, &extra));
        assert!(matches!(transport.read(0, 1).await, Err(Error::Timeout(_))));
        assert!(transport.is_open());
        assert!(matches!(transport.read(0, 1).await, Err(Error::Timeout(_))));
        assert!(!transport.is_open());
        device.abort();
    }

    #[tokio::test]
    async fn connection_refused_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut transport = TcpTransport::new(args(port));
        assert!(matches!(transport.read(0, 1).await, Err(Error::Connect(..))));
        assert!(!transport.is_open());
    }
}
