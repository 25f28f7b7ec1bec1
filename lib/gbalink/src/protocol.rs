//! GBA Link wire framing (§3.2, §4.4.5).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use netcommon::{ErrorType, NetworkError, NetworkResult};
use std::io::{self, Write};

pub const HEADER_SIZE: usize = 1 + 2 + 2;
pub const MAX_PAYLOAD_SIZE: usize = 2048;

pub const HOST_CLIENT_ID: u16 = 0;
pub const PEER_CLIENT_ID: u16 = 1;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Command {
    SioData = 0,
    Ready = 1,
    Heartbeat = 2,
    Disconnect = 3,
    Ping = 4,
    Pong = 5,
}

impl Command {
    pub fn from_u8(value: u8) -> NetworkResult<Command> {
        Ok(match value {
            0 => Command::SioData,
            1 => Command::Ready,
            2 => Command::Heartbeat,
            3 => Command::Disconnect,
            4 => Command::Ping,
            5 => Command::Pong,
            _ => return Err(NetworkError::Fatal(ErrorType::ProtocolError)),
        })
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Header {
    pub cmd: Command,
    pub size: u16,
    pub client_id: u16,
}

impl Header {
    pub fn write<W: Write>(&self, mut out: W) -> io::Result<()> {
        out.write_u8(self.cmd as u8)?;
        out.write_u16::<BigEndian>(self.size)?;
        out.write_u16::<BigEndian>(self.client_id)
    }

    /// Parses a header from an in-memory slice (used by the streaming
    /// parser, which never reads a header directly off the socket).
    pub fn parse(buf: &[u8]) -> NetworkResult<Header> {
        if buf.len() < HEADER_SIZE {
            return Err(NetworkError::Wait);
        }

        let cmd = Command::from_u8(buf[0])?;
        let size = u16::from_be_bytes([buf[1], buf[2]]);
        let client_id = u16::from_be_bytes([buf[3], buf[4]]);

        Ok(Header { cmd, size, client_id })
    }
}

/// Writes a full packet (header + payload) to `stream`.
pub fn write_packet<W: Write>(mut stream: W, cmd: Command, client_id: u16, payload: &[u8]) -> io::Result<()> {
    Header {
        cmd,
        size: payload.len() as u16,
        client_id,
    }
    .write(&mut stream)?;

    if !payload.is_empty() {
        stream.write_all(payload)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_a_buffer() {
        let header = Header {
            cmd: Command::SioData,
            size: 16,
            client_id: PEER_CLIENT_ID,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        let decoded = Header::parse(&buf).unwrap();
        assert_eq!(decoded.size, 16);
        assert_eq!(decoded.client_id, PEER_CLIENT_ID);
        assert_eq!(decoded.cmd, Command::SioData);
    }

    #[test]
    fn short_buffer_requests_more_data() {
        let err = Header::parse(&[0, 0]).unwrap_err();
        assert_eq!(err, NetworkError::Wait);
    }

    #[test]
    fn unknown_command_byte_is_a_protocol_error() {
        let buf = [0xff, 0, 0, 0, 0];
        let err = Header::parse(&buf).unwrap_err();
        assert_eq!(err, NetworkError::Fatal(ErrorType::ProtocolError));
    }
}
