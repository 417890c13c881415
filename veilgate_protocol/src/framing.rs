// Length-delimited frame reassembly for peer TCP streams.
//
// Every stream is a sequence of frames: a 4-byte little-endian length prefix
// followed by that many payload bytes. `FrameQueue` is the receive-side
// accumulator: the transport appends whatever the socket produced (frames
// may straddle reads anywhere, including inside the prefix) and whole
// payloads come back out in order. `make_frame` is the send-side inverse.
//
// A prefix above `MAX_FRAME_LEN` can never be satisfied; `packet_ready`
// reports such a queue as ready so that the next `read_packet` surfaces the
// error and the caller can drop the stream.

use crate::error::PacketError;

/// Sanity cap on a single frame's payload length.
pub const MAX_FRAME_LEN: usize = 65536;

const PREFIX_LEN: usize = 4;

/// Receive-side reassembler for one peer's byte stream.
#[derive(Debug, Default)]
pub struct FrameQueue {
    buf: Vec<u8>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the stream.
    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// True once a complete frame is buffered, or once the buffered prefix
    /// is malformed (the error is reported by [`read_packet`](Self::read_packet)).
    pub fn packet_ready(&self) -> bool {
        match self.peek_len() {
            None => false,
            Some(len) if len > MAX_FRAME_LEN => true,
            Some(len) => self.buf.len() - PREFIX_LEN >= len,
        }
    }

    /// Pop the next payload, prefix stripped. Fails with
    /// [`PacketError::FrameNotReady`] when no complete frame is buffered and
    /// with [`PacketError::OversizedFrame`] when the prefix is malformed.
    pub fn read_packet(&mut self) -> Result<Vec<u8>, PacketError> {
        let len = self.peek_len().ok_or(PacketError::FrameNotReady)?;
        if len > MAX_FRAME_LEN {
            return Err(PacketError::OversizedFrame(len));
        }
        if self.buf.len() - PREFIX_LEN < len {
            return Err(PacketError::FrameNotReady);
        }
        let payload = self.buf[PREFIX_LEN..PREFIX_LEN + len].to_vec();
        self.buf.drain(..PREFIX_LEN + len);
        Ok(payload)
    }

    /// Build the wire frame for one payload: length prefix plus the bytes.
    pub fn make_frame(payload: &[u8]) -> Result<Vec<u8>, PacketError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(PacketError::OversizedFrame(payload.len()));
        }
        let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    fn peek_len(&self) -> Option<usize> {
        let prefix: [u8; PREFIX_LEN] = self.buf.get(..PREFIX_LEN)?.try_into().ok()?;
        Some(u32::from_le_bytes(prefix) as usize)
    }
}
