//! Stream frame encoding and the byte-at-a-time receive state machine

use heapless::{Deque, Vec};

use super::crc::crc8;
use super::service::ServiceId;
use super::{FrameError, Payload};
use crate::config::link::{
    MAX_PAYLOAD, MAX_STREAM_FRAME, START_MARKER, START_MASK, STREAM_FOOTER_SIZE,
    STREAM_HEADER_SIZE, STREAM_OVERHEAD,
};

/// One encoded stream frame.
pub type StreamFrame = Vec<u8, MAX_STREAM_FRAME>;

/// Encode `payload` for `service` into a stream frame.
pub fn encode_frame(service: ServiceId, payload: &[u8]) -> Result<StreamFrame, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::TooLong);
    }
    Ok(encode_unchecked(service, payload))
}

/// Encode an already bounded payload.
pub fn encode_payload(service: ServiceId, payload: &Payload) -> StreamFrame {
    encode_unchecked(service, payload)
}

fn encode_unchecked(service: ServiceId, payload: &[u8]) -> StreamFrame {
    let mut frame = StreamFrame::new();
    let total = payload.len() + STREAM_OVERHEAD;

    // Capacity is MAX_STREAM_FRAME, payload is at most MAX_PAYLOAD
    let _ = frame.push(service.start_byte());
    let _ = frame.push(total as u8);
    let _ = frame.extend_from_slice(payload);
    let crc = crc8(&frame);
    let _ = frame.push(crc);

    frame
}

/// Decode exactly one complete stream frame.
pub fn decode_frame(frame: &[u8]) -> Result<(ServiceId, &[u8]), FrameError> {
    if frame.len() < STREAM_OVERHEAD {
        return Err(FrameError::TooShort);
    }
    if frame[0] & START_MASK != START_MARKER {
        return Err(FrameError::BadStart);
    }
    let service = ServiceId::from_start_byte(frame[0]).ok_or(FrameError::BadService)?;

    let length = frame[1] as usize;
    if length != frame.len() || length > MAX_STREAM_FRAME {
        return Err(FrameError::BadLength);
    }

    let (body, footer) = frame.split_at(length - STREAM_FOOTER_SIZE);
    if crc8(body) != footer[0] {
        return Err(FrameError::CrcMismatch);
    }

    Ok((service, &body[STREAM_HEADER_SIZE..]))
}

/// Receive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    AwaitStart,
    AwaitLength,
    Payload,
    AwaitCrc,
}

/// Outcome of feeding one byte.
enum Step {
    Pending,
    Complete,
    Rejected,
}

/// Streaming decoder for the UART link.
///
/// Bytes are fed one at a time. A bad length or CRC does not surface as an
/// error: the bytes of the rejected candidate after its start byte are
/// scanned again, so a real frame that began inside a false start is still
/// found.
///
/// A false start may announce a length reaching past the real frame that
/// follows it. The real frame is then held until later bytes break the false
/// candidate, or until the line goes quiet and [`StreamDecoder::idle`] runs.
/// Candidates are never cut short while bytes keep arriving, so a payload
/// that happens to contain a valid frame is still delivered whole.
pub struct StreamDecoder {
    state: RxState,
    service: ServiceId,
    expected: usize,
    buf: Vec<u8, MAX_STREAM_FRAME>,
    replay: Deque<u8, MAX_STREAM_FRAME>,
}

impl StreamDecoder {
    /// Create a decoder waiting for a start byte.
    pub fn new() -> Self {
        Self {
            state: RxState::AwaitStart,
            service: ServiceId::Data,
            expected: 0,
            buf: Vec::new(),
            replay: Deque::new(),
        }
    }

    /// Feed a chunk of received bytes.
    pub fn feed(&mut self, data: &[u8], mut on_frame: impl FnMut(ServiceId, &[u8])) {
        for &byte in data {
            self.push(byte, &mut on_frame);
        }
    }

    /// Feed one received byte; `on_frame` runs for every frame it completes.
    pub fn push(&mut self, byte: u8, on_frame: &mut impl FnMut(ServiceId, &[u8])) {
        let _ = self.replay.push_back(byte);
        self.drain(on_frame);
    }

    /// The line went quiet.
    ///
    /// A partial candidate buffered now is not a frame still arriving, so a
    /// valid frame inside it is delivered and the bytes after that frame are
    /// scanned again. A candidate holding no complete frame stays pending.
    pub fn idle(&mut self, mut on_frame: impl FnMut(ServiceId, &[u8])) {
        while let Some((start, end)) = self.nested_frame() {
            log::trace!("stream rx: dropped false start of {} bytes", start);

            if let Some(service) = ServiceId::from_start_byte(self.buf[start]) {
                let payload = &self.buf[start + STREAM_HEADER_SIZE..end - STREAM_FOOTER_SIZE];
                on_frame(service, payload);
            }
            self.rescan_from(end);
            self.drain(&mut on_frame);
        }
    }

    fn drain(&mut self, on_frame: &mut impl FnMut(ServiceId, &[u8])) {
        while let Some(byte) = self.replay.pop_front() {
            match self.step(byte) {
                Step::Pending => {}
                Step::Complete => {
                    let end = self.buf.len() - STREAM_FOOTER_SIZE;
                    on_frame(self.service, &self.buf[STREAM_HEADER_SIZE..end]);
                    self.restart();
                }
                Step::Rejected => {
                    log::trace!("stream rx: dropped candidate of {} bytes", self.buf.len());
                    // Re-scan everything after the rejected start byte
                    self.rescan_from(1);
                }
            }
        }
    }

    /// Discard any partial frame.
    pub fn reset(&mut self) {
        self.restart();
        self.replay.clear();
    }

    /// True if no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == RxState::AwaitStart
    }

    /// Bounds of the first valid frame buffered after the candidate's own
    /// start byte.
    fn nested_frame(&self) -> Option<(usize, usize)> {
        (1..self.buf.len().saturating_sub(1)).find_map(|start| {
            let end = start + self.buf[start + 1] as usize;
            let frame = self.buf.get(start..end)?;
            decode_frame(frame).ok().map(|_| (start, end))
        })
    }

    /// Queue the buffered bytes from `from` on for scanning and drop the
    /// candidate.
    fn rescan_from(&mut self, from: usize) {
        for &b in self.buf[from..].iter().rev() {
            let _ = self.replay.push_front(b);
        }
        self.restart();
    }

    fn restart(&mut self) {
        self.state = RxState::AwaitStart;
        self.expected = 0;
        self.buf.clear();
    }

    fn step(&mut self, byte: u8) -> Step {
        match self.state {
            RxState::AwaitStart => {
                if let Some(service) = ServiceId::from_start_byte(byte) {
                    self.service = service;
                    self.buf.clear();
                    let _ = self.buf.push(byte);
                    self.state = RxState::AwaitLength;
                }
                Step::Pending
            }
            RxState::AwaitLength => {
                let _ = self.buf.push(byte);
                let length = byte as usize;
                if !(STREAM_OVERHEAD..=MAX_STREAM_FRAME).contains(&length) {
                    return Step::Rejected;
                }
                self.expected = length;
                self.state = if length == STREAM_OVERHEAD {
                    RxState::AwaitCrc
                } else {
                    RxState::Payload
                };
                Step::Pending
            }
            RxState::Payload => {
                let _ = self.buf.push(byte);
                if self.buf.len() == self.expected - STREAM_FOOTER_SIZE {
                    self.state = RxState::AwaitCrc;
                }
                Step::Pending
            }
            RxState::AwaitCrc => {
                let valid = crc8(&self.buf) == byte;
                let _ = self.buf.push(byte);
                if valid {
                    Step::Complete
                } else {
                    Step::Rejected
                }
            }
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
