use tokio_util::bytes::{Buf as _, BufMut as _, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// The largest number of holding registers a single read may request.
pub const MAX_SAFE_READ_COUNT: u16 = 123;
/// The largest number of holding registers a single write may carry.
pub const MAX_SAFE_WRITE_COUNT: u16 = 123;

const READ_HOLDINGS: u8 = 0x03;
const WRITE_HOLDINGS: u8 = 0x10;
const EXCEPTION_FLAG: u8 = 0x80;
const SERVER_BUSY: u8 = 0x06;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetHoldings { address: u16, count: u16 },
    SetHoldings { address: u16, values: Vec<u16> },
}

impl Operation {
    pub fn address(&self) -> u16 {
        match self {
            Operation::GetHoldings { address, .. } | Operation::SetHoldings { address, .. } => {
                *address
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub device_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::ErrorCode(c) => Some(*c),
            ResponseKind::GetHoldings { .. } | ResponseKind::SetHoldings { .. } => None,
        }
    }

    pub fn is_server_busy(&self) -> bool {
        self.exception_code() == Some(SERVER_BUSY)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseKind {
    ErrorCode(u8),
    GetHoldings { values: Vec<u16> },
    SetHoldings { address: u16, count: u16 },
}

/// Modbus TCP framing for the holding register functions.
#[derive(Debug, Default)]
pub struct ModbusTCPCodec {}

impl Encoder<&Request> for ModbusTCPCodec {
    type Error = std::io::Error;

    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let pdu_length = match &req.operation {
            Operation::GetHoldings { .. } => 5,
            Operation::SetHoldings { values, .. } => {
                if values.is_empty() || values.len() > usize::from(MAX_SAFE_WRITE_COUNT) {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("cannot write {} registers in one request", values.len()),
                    ));
                }
                6 + 2 * values.len() as u16
            }
        };
        dst.reserve(7 + usize::from(pdu_length));
        dst.put_u16(req.transaction_id);
        dst.put_u16(0);
        dst.put_u16(pdu_length + 1);
        dst.put_u8(req.device_id);
        match &req.operation {
            Operation::GetHoldings { address, count } => {
                dst.put_u8(READ_HOLDINGS);
                dst.put_u16(*address);
                dst.put_u16(*count);
            }
            Operation::SetHoldings { address, values } => {
                dst.put_u8(WRITE_HOLDINGS);
                dst.put_u16(*address);
                dst.put_u16(values.len() as u16);
                dst.put_u8(2 * values.len() as u8);
                for value in values {
                    dst.put_u16(*value);
                }
            }
        }
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for ModbusTCPCodec {
    type Item = Response;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempt at decoding", buffer = ?src);
            let Some((header, remainder)) = src.split_first_chunk::<6>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes([header[0], header[1]]);
            let proto = u16::from_be_bytes([header[2], header[3]]);
            let required_length = u16::from_be_bytes([header[4], header[5]]);
            if proto != 0 || required_length < 3 {
                src.advance(1);
                continue;
            }
            let Some((data, _)) = remainder.split_at_checked(required_length.into()) else {
                return Ok(None);
            };
            let [device_id, function_code, payload @ ..] = data else {
                unreachable!("length checked above");
            };
            let (device_id, function_code) = (*device_id, *function_code);
            let kind = if function_code & EXCEPTION_FLAG != 0 {
                ResponseKind::ErrorCode(payload[0])
            } else {
                match (function_code, payload) {
                    (READ_HOLDINGS, [byte_count, values @ ..])
                        if usize::from(*byte_count) == values.len() && values.len() % 2 == 0 =>
                    {
                        let values = values
                            .chunks_exact(2)
                            .map(|word| u16::from_be_bytes([word[0], word[1]]))
                            .collect();
                        ResponseKind::GetHoldings { values }
                    }
                    (WRITE_HOLDINGS, [a0, a1, c0, c1]) => ResponseKind::SetHoldings {
                        address: u16::from_be_bytes([*a0, *a1]),
                        count: u16::from_be_bytes([*c0, *c1]),
                    },
                    _ => {
                        trace!(message = "skipping an unexpected frame", function_code);
                        src.advance(6 + usize::from(required_length));
                        continue;
                    }
                }
            };
            src.advance(6 + usize::from(required_length));
            return Ok(Some(Response { device_id, transaction_id, kind }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::bytes::BufMut as _;

    fn encode(request: Request) -> Vec<u8> {
        let mut buffer = BytesMut::new();
        ModbusTCPCodec {}.encode(&request, &mut buffer).unwrap();
        buffer.to_vec()
    }

    #[test]
    fn encode_read_request() {
        let request = Request {
            device_id: 101,
            transaction_id: 0x0102,
            operation: Operation::GetHoldings { address: 33024, count: 16 },
        };
        assert_eq!(encode(request), [0x01, 0x02, 0, 0, 0, 6, 101, 3, 0x81, 0x00, 0, 16]);
    }

    #[test]
    fn encode_write_request() {
        let request = Request {
            device_id: 1,
            transaction_id: 7,
            operation: Operation::SetHoldings { address: 2049, values: vec![2, 0xFED4] },
        };
        assert_eq!(
            encode(request),
            [0, 7, 0, 0, 0, 11, 1, 0x10, 0x08, 0x01, 0, 2, 4, 0, 2, 0xFE, 0xD4]
        );
    }

    #[test]
    fn refuse_empty_write() {
        let request = Request {
            device_id: 1,
            transaction_id: 7,
            operation: Operation::SetHoldings { address: 2049, values: vec![] },
        };
        let mut buffer = BytesMut::new();
        assert!(ModbusTCPCodec {}.encode(&request, &mut buffer).is_err());
    }

    #[test]
    fn decode_read_response() {
        let mut src = BytesMut::from(&[0, 9, 0, 0, 0, 7, 101, 3, 4, 0x01, 0xA4, 0xFE, 0xD4][..]);
        let response = ModbusTCPCodec {}.decode(&mut src).unwrap().unwrap();
        assert_eq!(
            response,
            Response {
                device_id: 101,
                transaction_id: 9,
                kind: ResponseKind::GetHoldings { values: vec![420, 0xFED4] },
            }
        );
        assert!(src.is_empty());
    }

    #[test]
    fn decode_partial_frames() {
        let frame = [0, 9, 0, 0, 0, 5, 101, 3, 2, 0x01, 0xA4];
        let mut codec = ModbusTCPCodec {};
        let mut src = BytesMut::new();
        for &byte in &frame[..frame.len() - 1] {
            src.put_u8(byte);
            assert_eq!(codec.decode(&mut src).unwrap(), None);
        }
        src.put_u8(frame[frame.len() - 1]);
        let response = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(response.kind, ResponseKind::GetHoldings { values: vec![420] });
    }

    #[test]
    fn decode_write_response_and_exception() {
        let mut src = BytesMut::from(
            &[
                0, 1, 0, 0, 0, 6, 1, 0x10, 0x08, 0x01, 0, 1, // write acknowledged
                0, 2, 0, 0, 0, 3, 1, 0x83, 0x06, // server busy
            ][..],
        );
        let mut codec = ModbusTCPCodec {};
        let write = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(write.kind, ResponseKind::SetHoldings { address: 2049, count: 1 });
        assert_eq!(write.exception_code(), None);
        let busy = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(busy.transaction_id, 2);
        assert!(busy.is_server_busy());
        assert_eq!(codec.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn decode_skips_garbage() {
        let mut src = BytesMut::from(&[0xFF, 0, 3, 0, 0, 0, 5, 1, 3, 2, 0, 42][..]);
        let response = ModbusTCPCodec {}.decode(&mut src).unwrap().unwrap();
        assert_eq!(response.transaction_id, 3);
        assert_eq!(response.kind, ResponseKind::GetHoldings { values: vec![42] });
    }
}
