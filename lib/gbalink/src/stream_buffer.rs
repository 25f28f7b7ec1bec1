//! The GBA Link receive-side stream buffer (§3.4): a linear byte buffer
//! with separate read/write indices and lazy compaction.

use crate::protocol::{Command, Header, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use netcommon::{ErrorType, NetworkError, NetworkResult};

const COMPACT_FREE_THRESHOLD: usize = 1024;

pub struct StreamBuffer {
    data: Vec<u8>,
    read_idx: usize,
    write_idx: usize,
}

impl StreamBuffer {
    pub fn new(capacity: usize) -> StreamBuffer {
        StreamBuffer {
            data: vec![0u8; capacity],
            read_idx: 0,
            write_idx: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn available(&self) -> usize {
        self.write_idx - self.read_idx
    }

    fn free_tail(&self) -> usize {
        self.data.len() - self.write_idx
    }

    /// Compacts `[read_idx..write_idx)` down to offset 0 if free tail space
    /// is below the threshold and more than half the buffer is already
    /// consumed. Called before appending new bytes from the socket.
    pub fn maybe_compact(&mut self) {
        if self.free_tail() < COMPACT_FREE_THRESHOLD && self.read_idx > self.data.len() / 2 {
            let len = self.available();
            self.data.copy_within(self.read_idx..self.write_idx, 0);
            self.read_idx = 0;
            self.write_idx = len;
        }
    }

    /// The writable tail slice a caller should `recv` into after a
    /// `maybe_compact` call.
    pub fn write_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.write_idx..]
    }

    /// Records that `count` bytes were written into the tail slice.
    pub fn commit_write(&mut self, count: usize) {
        self.write_idx += count;
    }

    /// Parses and removes one packet from the front of the buffer, if a
    /// complete one is available (§4.4.7 steps 2-5). A malformed size
    /// resets the whole buffer (protocol error, discard).
    pub fn try_take_packet(&mut self) -> NetworkResult<Option<(Header, Vec<u8>)>> {
        let available = self.available();
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let header = match Header::parse(&self.data[self.read_idx..self.write_idx]) {
            Ok(header) => header,
            Err(NetworkError::Wait) => return Ok(None),
            Err(err) => return Err(err),
        };

        if header.size as usize > MAX_PAYLOAD_SIZE {
            self.read_idx = 0;
            self.write_idx = 0;
            return Err(NetworkError::Fatal(ErrorType::ProtocolError));
        }

        let total = HEADER_SIZE + header.size as usize;
        if available < total {
            return Ok(None);
        }

        let payload_start = self.read_idx + HEADER_SIZE;
        let payload = self.data[payload_start..payload_start + header.size as usize].to_vec();

        self.read_idx += total;
        if self.read_idx == self.write_idx {
            self.read_idx = 0;
            self.write_idx = 0;
        }

        Ok(Some((header, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::write_packet;

    #[test]
    fn parses_a_packet_written_in_one_piece() {
        let mut buf = StreamBuffer::new(4096);
        let mut wire = Vec::new();
        write_packet(&mut wire, Command::SioData, 1, b"hello").unwrap();

        buf.maybe_compact();
        let tail = buf.write_slice();
        tail[..wire.len()].copy_from_slice(&wire);
        buf.commit_write(wire.len());

        let (header, payload) = buf.try_take_packet().unwrap().unwrap();
        assert_eq!(header.client_id, 1);
        assert_eq!(payload, b"hello");
        assert!(buf.try_take_packet().unwrap().is_none());
    }

    #[test]
    fn partial_header_yields_no_packet_yet() {
        let mut buf = StreamBuffer::new(4096);
        let tail = buf.write_slice();
        tail[0] = Command::SioData as u8;
        buf.commit_write(1);

        assert!(buf.try_take_packet().unwrap().is_none());
    }

    #[test]
    fn oversize_declared_payload_resets_the_buffer() {
        let mut buf = StreamBuffer::new(4096);
        let mut wire = Vec::new();
        Header {
            cmd: Command::SioData,
            size: (MAX_PAYLOAD_SIZE + 1) as u16,
            client_id: 0,
        }
        .write(&mut wire)
        .unwrap();

        let tail = buf.write_slice();
        tail[..wire.len()].copy_from_slice(&wire);
        buf.commit_write(wire.len());

        let err = buf.try_take_packet().unwrap_err();
        assert_eq!(err, NetworkError::Fatal(ErrorType::ProtocolError));
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn compaction_only_fires_past_half_capacity_with_little_tail_room() {
        let mut buf = StreamBuffer::new(2048);

        // Consume past the halfway point while a second packet is still
        // pending, so read_idx > capacity/2 but write_idx < write_idx.
        buf.read_idx = 1200;
        buf.write_idx = 1200;
        let mut second = Vec::new();
        write_packet(&mut second, Command::SioData, 1, &[0u8; 100]).unwrap();
        buf.data[1200..1200 + second.len()].copy_from_slice(&second);
        buf.write_idx += second.len();

        assert!(buf.free_tail() < COMPACT_FREE_THRESHOLD);
        buf.maybe_compact();

        assert_eq!(buf.read_idx, 0);
        assert_eq!(buf.write_idx, second.len());

        let (header, payload) = buf.try_take_packet().unwrap().unwrap();
        assert_eq!(header.client_id, 1);
        assert_eq!(payload.len(), 100);
    }

    #[test]
    fn compaction_is_skipped_with_plenty_of_tail_room() {
        let mut buf = StreamBuffer::new(4096);
        buf.read_idx = 10;
        buf.write_idx = 20;

        buf.maybe_compact();

        assert_eq!(buf.read_idx, 10, "tail room is plentiful, no compaction needed");
    }
}
