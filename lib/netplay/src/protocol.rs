//! Netplay wire framing (§3.2, §4.3.5).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use netcommon::{ErrorType, NetworkError, NetworkResult};
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

pub const HEADER_SIZE: usize = 1 + 4 + 2;
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// Once a header has been consumed its bytes can't be un-read, so a packet
/// read can't be abandoned mid-payload without desyncing the stream. This
/// bounds how long [`read_packet`] keeps retrying a transient timeout to
/// finish a packet it has already started, independent of whatever
/// per-attempt read timeout the caller has configured on the socket.
const PACKET_READ_BUDGET: Duration = Duration::from_millis(250);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Command {
    Input = 0,
    StateHdr = 1,
    StateData = 2,
    StateAck = 3,
    Ready = 4,
    Disconnect = 5,
    Pause = 6,
    Resume = 7,
    Keepalive = 8,
}

impl Command {
    fn from_u8(value: u8) -> NetworkResult<Command> {
        Ok(match value {
            0 => Command::Input,
            1 => Command::StateHdr,
            2 => Command::StateData,
            3 => Command::StateAck,
            4 => Command::Ready,
            5 => Command::Disconnect,
            6 => Command::Pause,
            7 => Command::Resume,
            8 => Command::Keepalive,
            _ => return Err(NetworkError::Fatal(ErrorType::ProtocolError)),
        })
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Header {
    pub cmd: Command,
    pub frame: u32,
    pub size: u16,
}

impl Header {
    pub fn write<W: Write>(&self, mut out: W) -> io::Result<()> {
        out.write_u8(self.cmd as u8)?;
        out.write_u32::<BigEndian>(self.frame)?;
        out.write_u16::<BigEndian>(self.size)
    }

    pub fn read<R: Read>(mut input: R) -> NetworkResult<Header> {
        let cmd = Command::from_u8(input.read_u8()?)?;
        let frame = input.read_u32::<BigEndian>()?;
        let size = input.read_u16::<BigEndian>()?;

        if size as usize > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::Fatal(ErrorType::ProtocolError));
        }

        Ok(Header { cmd, frame, size })
    }
}

/// Writes a full packet (header + payload) to `stream`.
pub fn write_packet<W: Write>(mut stream: W, cmd: Command, frame: u32, payload: &[u8]) -> io::Result<()> {
    Header {
        cmd,
        frame,
        size: payload.len() as u16,
    }
    .write(&mut stream)?;

    if !payload.is_empty() {
        stream.write_all(payload)?;
    }

    Ok(())
}

/// Reads one full packet (header + payload) from `stream`, blocking until
/// either the whole packet or an error/timeout arrives. Header and payload
/// are read under the same deadline so a slow payload can't strand an
/// already-consumed header (see [`PACKET_READ_BUDGET`]).
pub fn read_packet<R: Read>(mut stream: R) -> NetworkResult<(Header, Vec<u8>)> {
    let deadline = Instant::now() + PACKET_READ_BUDGET;

    // `must_complete = false`: no header bytes have arrived at all yet is
    // the ordinary "nothing to read this attempt" case and must return
    // `Wait` immediately, the same as before, or every per-frame poll would
    // block for the whole budget.
    let mut header_buf = [0u8; HEADER_SIZE];
    read_fully(&mut stream, &mut header_buf, deadline, false)?;
    let header = Header::read(&header_buf[..])?;

    // The header is already consumed and can't be un-read, so the payload
    // read must not give up just because its first byte hasn't shown up
    // yet -- `must_complete = true`.
    let mut payload = vec![0u8; header.size as usize];
    if header.size > 0 {
        read_fully(&mut stream, &mut payload, deadline, true)?;
    }
    Ok((header, payload))
}

/// Fills `buf` completely, retrying a transient timeout until `deadline`
/// instead of giving up after a single `Wait` and losing whatever partial
/// progress was already made. `must_complete` forces a retry even before
/// the first byte arrives, for reads that can no longer be abandoned.
fn read_fully<R: Read>(stream: &mut R, buf: &mut [u8], deadline: Instant, must_complete: bool) -> NetworkResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(NetworkError::Fatal(ErrorType::PeerDisconnected)),
            Ok(count) => filled += count,
            Err(err) => {
                let err: NetworkError = err.into();
                let committed = must_complete || filled > 0;
                if err == NetworkError::Wait && committed && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trips() {
        let header = Header {
            cmd: Command::Input,
            frame: 42,
            size: 2,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        let decoded = Header::read(Cursor::new(&buf)).unwrap();
        assert_eq!(decoded.frame, 42);
        assert_eq!(decoded.size, 2);
        assert_eq!(decoded.cmd, Command::Input);
    }

    #[test]
    fn oversize_header_is_rejected() {
        let mut buf = Vec::new();
        buf.write_u8(Command::Input as u8).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u16::<BigEndian>((MAX_PAYLOAD_SIZE + 1) as u16).unwrap();

        let err = Header::read(Cursor::new(&buf)).unwrap_err();
        assert_eq!(err, NetworkError::Fatal(ErrorType::ProtocolError));
    }

    #[test]
    fn packet_round_trips_through_a_buffer() {
        let mut buf = Vec::new();
        write_packet(&mut buf, Command::Input, 7, &[0x00, 0x01]).unwrap();

        let (header, payload) = read_packet(Cursor::new(&buf)).unwrap();
        assert_eq!(header.frame, 7);
        assert_eq!(payload, vec![0x00, 0x01]);
    }
}
