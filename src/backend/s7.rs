//! ISO-on-TCP / S7comm driver
//!
//! Speaks the subset of the S7 protocol needed for block reads and writes:
//!
//! 1. TCP connect to port 102
//! 2. COTP connection request (TPKT framed, RFC 1006) with the CPU's TSAP
//! 3. S7 "setup communication" to negotiate the PDU size
//! 4. "read var" / "write var" jobs with S7ANY item addressing
//!
//! Every socket operation carries the configured timeout. Any I/O failure
//! closes the socket so [`Driver::is_connected`] reports the link as down.

use crate::error::{ConnectError, ReadError, WriteError};
use crate::types::Area;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::driver::{ConnectTarget, Driver, DriverStats};

/// PDU size requested during setup communication
pub const REQUESTED_PDU_SIZE: u16 = 480;

/// Default read/write timeout
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 2000;

const TPKT_VERSION: u8 = 0x03;
const TPKT_HEADER_LEN: usize = 4;
const COTP_CR: u8 = 0xE0;
const COTP_CC: u8 = 0xD0;
const COTP_DR: u8 = 0x80;
const COTP_DT_HEADER: [u8; 3] = [0x02, 0xF0, 0x80];

const S7_PROTOCOL_ID: u8 = 0x32;
const S7_JOB: u8 = 0x01;
const S7_ACK_DATA: u8 = 0x03;
const S7_JOB_HEADER_LEN: usize = 10;
const S7_ACK_HEADER_LEN: usize = 12;

const FN_SETUP_COMM: u8 = 0xF0;
const FN_READ_VAR: u8 = 0x04;
const FN_WRITE_VAR: u8 = 0x05;

const TRANSPORT_BYTE: u8 = 0x02;
const DATA_TRANSPORT_BYTE: u8 = 0x04;
const RETURN_OK: u8 = 0xFF;

/// Overhead of a read response around the payload
const READ_OVERHEAD: usize = S7_ACK_HEADER_LEN + 2 + 4;
/// Overhead of a write request around the payload
const WRITE_OVERHEAD: usize = S7_JOB_HEADER_LEN + 14 + 4;

/// S7 area code for the ANY pointer
pub fn area_code(area: Area) -> u8 {
    match area {
        Area::DataBlock => 0x84,
        Area::Input => 0x81,
        Area::Output => 0x82,
        Area::Marker => 0x83,
    }
}

/// Wrap a payload in a TPKT header
fn tpkt(payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + TPKT_HEADER_LEN) as u16;
    let mut frame = Vec::with_capacity(len as usize);
    frame.extend_from_slice(&[TPKT_VERSION, 0x00]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// COTP connection request with local TSAP 0x0100 and the CPU's remote TSAP
pub fn connection_request(rack: u16, slot: u16) -> Vec<u8> {
    let remote_tsap = ((rack as u8) << 5) | (slot as u8 & 0x1F);
    let cotp = [
        0x11, // length of the rest of the header
        COTP_CR,
        0x00,
        0x00, // destination reference
        0x00,
        0x01, // source reference
        0x00, // class 0
        0xC0,
        0x01,
        0x0A, // TPDU size 1024
        0xC1,
        0x02,
        0x01,
        0x00, // calling TSAP
        0xC2,
        0x02,
        0x01,
        remote_tsap, // called TSAP
    ];
    tpkt(&cotp)
}

/// S7 job: COTP DT header, S7 header, parameters, data
fn job(pdu_ref: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(3 + S7_JOB_HEADER_LEN + params.len() + data.len());
    payload.extend_from_slice(&COTP_DT_HEADER);
    payload.extend_from_slice(&[S7_PROTOCOL_ID, S7_JOB, 0x00, 0x00]);
    payload.extend_from_slice(&pdu_ref.to_be_bytes());
    payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
    payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
    payload.extend_from_slice(params);
    payload.extend_from_slice(data);
    tpkt(&payload)
}

pub fn setup_communication(pdu_ref: u16, pdu_size: u16) -> Vec<u8> {
    let size = pdu_size.to_be_bytes();
    let params = [FN_SETUP_COMM, 0x00, 0x00, 0x01, 0x00, 0x01, size[0], size[1]];
    job(pdu_ref, &params, &[])
}

/// S7ANY item: byte transport, `count` bytes at `byte_offset`
fn any_item(area: Area, block: u16, byte_offset: usize, count: usize) -> [u8; 12] {
    let bit_address = (byte_offset as u32) * 8;
    let addr = bit_address.to_be_bytes();
    let count = (count as u16).to_be_bytes();
    let db = if area.has_blocks() { block } else { 0 }.to_be_bytes();
    [
        0x12,
        0x0A,
        0x10,
        TRANSPORT_BYTE,
        count[0],
        count[1],
        db[0],
        db[1],
        area_code(area),
        addr[1],
        addr[2],
        addr[3],
    ]
}

pub fn read_request(pdu_ref: u16, area: Area, block: u16, offset: usize, length: usize) -> Vec<u8> {
    let mut params = vec![FN_READ_VAR, 0x01];
    params.extend_from_slice(&any_item(area, block, offset, length));
    job(pdu_ref, &params, &[])
}

pub fn write_request(pdu_ref: u16, area: Area, block: u16, offset: usize, data: &[u8]) -> Vec<u8> {
    let mut params = vec![FN_WRITE_VAR, 0x01];
    params.extend_from_slice(&any_item(area, block, offset, data.len()));
    let bits = ((data.len() * 8) as u16).to_be_bytes();
    let mut payload = vec![0x00, DATA_TRANSPORT_BYTE, bits[0], bits[1]];
    payload.extend_from_slice(data);
    job(pdu_ref, &params, &payload)
}

/// Parsed S7 ack-data response
#[derive(Debug)]
struct AckData<'a> {
    pdu_ref: u16,
    error_class: u8,
    error_code: u8,
    params: &'a [u8],
    data: &'a [u8],
}

/// Parse a TPKT payload (COTP DT + S7 ack-data)
fn parse_ack(payload: &[u8]) -> Result<AckData<'_>, String> {
    let s7 = payload
        .get(3..)
        .filter(|_| payload.get(1) == Some(&0xF0))
        .ok_or_else(|| "not a COTP data frame".to_string())?;
    if s7.len() < S7_ACK_HEADER_LEN || s7[0] != S7_PROTOCOL_ID {
        return Err("missing S7 header".to_string());
    }
    if s7[1] != S7_ACK_DATA {
        return Err(format!("unexpected S7 message type 0x{:02X}", s7[1]));
    }
    let pdu_ref = u16::from_be_bytes([s7[4], s7[5]]);
    let param_len = u16::from_be_bytes([s7[6], s7[7]]) as usize;
    let data_len = u16::from_be_bytes([s7[8], s7[9]]) as usize;
    let body = &s7[S7_ACK_HEADER_LEN..];
    if body.len() < param_len + data_len {
        return Err("truncated S7 response".to_string());
    }
    Ok(AckData {
        pdu_ref,
        error_class: s7[10],
        error_code: s7[11],
        params: &body[..param_len],
        data: &body[param_len..param_len + data_len],
    })
}

/// Map an item return code to a read error
fn item_error(code: u8, area: Area, block: u16, offset: usize, length: usize) -> ReadError {
    match code {
        0x05 | 0x0A => ReadError::AddressOutOfRange {
            area,
            block,
            offset,
            length,
        },
        other => ReadError::ProtocolError(format!("item return code 0x{:02X}", other)),
    }
}

fn io_to_read_error(err: &io::Error) -> ReadError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ReadError::Timeout,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ReadError::NotConnected,
        _ => ReadError::ProtocolError(err.to_string()),
    }
}

/// Driver for Siemens S7 controllers over ISO-on-TCP
pub struct S7Driver {
    stream: Option<TcpStream>,
    io_timeout: Duration,
    pdu_size: u16,
    pdu_ref: u16,
    stats: DriverStats,
}

impl S7Driver {
    /// Create a driver whose reads and writes time out after `io_timeout`
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            stream: None,
            io_timeout,
            pdu_size: REQUESTED_PDU_SIZE,
            pdu_ref: 0,
            stats: DriverStats::default(),
        }
    }

    /// PDU size negotiated with the CPU
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    /// Largest payload a single read job can return
    pub fn max_read_chunk(&self) -> usize {
        (self.pdu_size as usize).saturating_sub(READ_OVERHEAD).max(1)
    }

    /// Largest payload a single write job can carry
    pub fn max_write_chunk(&self) -> usize {
        (self.pdu_size as usize).saturating_sub(WRITE_OVERHEAD).max(1)
    }

    fn next_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    /// Send a frame and wait for one TPKT payload back
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, ReadError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ReadError::NotConnected);
        };
        let result = send_and_receive(stream, frame);
        if let Err(ref e) = result {
            tracing::warn!("S7 link error, closing socket: {}", e);
            self.close();
        }
        result.map_err(|e| io_to_read_error(&e))
    }

    fn read_chunk(
        &mut self,
        area: Area,
        block: u16,
        offset: usize,
        length: usize,
    ) -> Result<Vec<u8>, ReadError> {
        let pdu_ref = self.next_ref();
        let response = self.exchange(&read_request(pdu_ref, area, block, offset, length))?;
        let ack = parse_ack(&response).map_err(ReadError::ProtocolError)?;
        if ack.pdu_ref != pdu_ref {
            return Err(ReadError::ProtocolError(format!(
                "response for PDU {} while waiting for {}",
                ack.pdu_ref, pdu_ref
            )));
        }
        if ack.error_class != 0 || ack.error_code != 0 {
            return Err(ReadError::ProtocolError(format!(
                "job rejected (class 0x{:02X}, code 0x{:02X})",
                ack.error_class, ack.error_code
            )));
        }
        let (code, item) = match ack.data {
            [code, _transport, _, _, rest @ ..] => (*code, rest),
            [code, ..] => (*code, &[][..]),
            [] => return Err(ReadError::ProtocolError("empty read response".to_string())),
        };
        if code != RETURN_OK {
            return Err(item_error(code, area, block, offset, length));
        }
        if item.len() < length {
            return Err(ReadError::ProtocolError(format!(
                "short read: {} of {} bytes",
                item.len(),
                length
            )));
        }
        Ok(item[..length].to_vec())
    }

    fn write_chunk(
        &mut self,
        area: Area,
        block: u16,
        offset: usize,
        data: &[u8],
    ) -> Result<(), WriteError> {
        let pdu_ref = self.next_ref();
        let response = self.exchange(&write_request(pdu_ref, area, block, offset, data))?;
        let ack = parse_ack(&response).map_err(WriteError::ProtocolError)?;
        if ack.error_class != 0 || ack.error_code != 0 {
            return Err(WriteError::ProtocolError(format!(
                "job rejected (class 0x{:02X}, code 0x{:02X})",
                ack.error_class, ack.error_code
            )));
        }
        match ack.data.first() {
            Some(&RETURN_OK) => Ok(()),
            Some(&code) => Err(item_error(code, area, block, offset, data.len()).into()),
            None => Err(WriteError::ProtocolError("empty write response".to_string())),
        }
    }

    fn open(&mut self, target: &ConnectTarget, timeout: Duration) -> Result<(), ConnectError> {
        let unreachable_err = |message: String| ConnectError::Unreachable {
            address: target.socket_address(),
            message,
        };
        let addrs: Vec<SocketAddr> = target
            .socket_address()
            .to_socket_addrs()
            .map_err(|e| unreachable_err(e.to_string()))?
            .collect();
        let Some(addr) = addrs.first() else {
            return Err(unreachable_err("address did not resolve".to_string()));
        };

        let deadline = Instant::now() + timeout;
        let stream = TcpStream::connect_timeout(addr, timeout).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectError::Timeout(timeout),
            _ => unreachable_err(e.to_string()),
        })?;
        let _ = stream.set_nodelay(true);

        // handshake shares what is left of the connect timeout
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1));
        let io_err = |e: io::Error| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectError::Timeout(timeout),
            _ => ConnectError::ProtocolMismatch(e.to_string()),
        };
        stream.set_read_timeout(Some(remaining)).map_err(io_err)?;
        stream.set_write_timeout(Some(remaining)).map_err(io_err)?;
        let mut stream = stream;

        let cc = send_and_receive(&mut stream, &connection_request(target.rack, target.slot))
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => {
                    ConnectError::AuthRejected(format!(
                        "connection closed during COTP handshake (rack {}, slot {})",
                        target.rack, target.slot
                    ))
                }
                _ => io_err(e),
            })?;
        match cc.get(1) {
            Some(&COTP_CC) => {}
            Some(&COTP_DR) => {
                return Err(ConnectError::AuthRejected(format!(
                    "COTP disconnect for rack {}, slot {}",
                    target.rack, target.slot
                )))
            }
            _ => {
                return Err(ConnectError::ProtocolMismatch(
                    "no COTP connection confirm".to_string(),
                ))
            }
        }

        let pdu_ref = self.next_ref();
        let setup = send_and_receive(&mut stream, &setup_communication(pdu_ref, REQUESTED_PDU_SIZE))
            .map_err(io_err)?;
        let ack = parse_ack(&setup).map_err(ConnectError::ProtocolMismatch)?;
        if ack.error_class != 0 || ack.error_code != 0 {
            return Err(ConnectError::AuthRejected(format!(
                "setup communication rejected (class 0x{:02X}, code 0x{:02X})",
                ack.error_class, ack.error_code
            )));
        }
        let negotiated = match ack.params {
            [FN_SETUP_COMM, _, _, _, _, _, hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => {
                return Err(ConnectError::ProtocolMismatch(
                    "malformed setup communication response".to_string(),
                ))
            }
        };
        if negotiated < 64 {
            return Err(ConnectError::ProtocolMismatch(format!(
                "unusable PDU size {}",
                negotiated
            )));
        }
        self.pdu_size = negotiated.min(REQUESTED_PDU_SIZE);

        stream
            .set_read_timeout(Some(self.io_timeout))
            .map_err(io_err)?;
        stream
            .set_write_timeout(Some(self.io_timeout))
            .map_err(io_err)?;
        self.stream = Some(stream);
        Ok(())
    }
}

fn send_and_receive(stream: &mut TcpStream, frame: &[u8]) -> io::Result<Vec<u8>> {
    stream.write_all(frame)?;
    let mut header = [0u8; TPKT_HEADER_LEN];
    stream.read_exact(&mut header)?;
    if header[0] != TPKT_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad TPKT version {}", header[0]),
        ));
    }
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    if len < TPKT_HEADER_LEN + 2 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad TPKT length {}", len),
        ));
    }
    let mut payload = vec![0u8; len - TPKT_HEADER_LEN];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

impl Default for S7Driver {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_IO_TIMEOUT_MS))
    }
}

impl Driver for S7Driver {
    fn connect(&mut self, target: &ConnectTarget, timeout: Duration) -> Result<(), ConnectError> {
        if self.stream.is_some() {
            return Ok(());
        }
        tracing::info!("Connecting to S7 controller at {}", target);
        match self.open(target, timeout) {
            Ok(()) => {
                tracing::info!("S7 session open, PDU size {}", self.pdu_size);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        if self.stream.is_some() {
            self.close();
            tracing::info!("S7 session closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn read_block(
        &mut self,
        area: Area,
        block_index: u16,
        byte_offset: usize,
        length: usize,
    ) -> Result<Vec<u8>, ReadError> {
        let start = Instant::now();
        let chunk = self.max_read_chunk();
        let mut out = Vec::with_capacity(length);
        let mut result = Ok(());
        while out.len() < length {
            let at = byte_offset + out.len();
            let n = chunk.min(length - out.len());
            match self.read_chunk(area, block_index, at, n) {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if length == 0 && self.stream.is_none() {
            result = Err(ReadError::NotConnected);
        }

        match result {
            Ok(()) => {
                let elapsed = start.elapsed().as_micros().max(1) as u64;
                self.stats.record_success(elapsed, out.len() as u64);
                Ok(out)
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }

    fn write_block(
        &mut self,
        area: Area,
        block_index: u16,
        byte_offset: usize,
        data: &[u8],
    ) -> Result<(), WriteError> {
        let chunk = self.max_write_chunk();
        let mut result = Ok(());
        for (i, part) in data.chunks(chunk).enumerate() {
            result = self.write_chunk(area, block_index, byte_offset + i * chunk, part);
            if result.is_err() {
                break;
            }
        }
        self.stats.record_write(result.is_ok());
        result
    }

    fn stats(&self) -> &DriverStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut DriverStats {
        &mut self.stats
    }
}
