//! Incremental inbound frame parser
//!
//! The transport hands over bytes in whatever chunks the network produced.
//! A frame header can be split anywhere, including inside the extended
//! length or the mask key, and a payload can span any number of chunks.
//!
//! [`FrameReceiver`] holds the only mutable parse state for a connection as
//! an explicit [`ParseState`]. Data payloads are unmasked in place and
//! handed to the consumer as they arrive, without buffering whole frames.
//! Control payloads (at most 125 bytes) are collected and delivered once
//! complete.

use crate::MAX_FRAME_HEADER_SIZE;
use crate::error::{Error, Result};
use crate::frame::{FrameHeader, OpCode};
use crate::mask::apply_mask_offset;

/// Parser state between chunks
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParseState {
    /// No partial frame
    #[default]
    Idle,
    /// Header bytes seen so far, awaiting the rest
    AwaitingHeader {
        buf: [u8; MAX_FRAME_HEADER_SIZE],
        len: usize,
    },
    /// Header decoded, payload bytes remaining
    InPayload { header: FrameHeader, consumed: u64 },
}

/// Metadata attached to every data delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Opcode of the first frame of the logical message (Text or Binary)
    pub message_opcode: OpCode,
    /// Opcode of the current frame (Continuation after the first frame)
    pub opcode: OpCode,
    /// Sequence id of the logical message, starting at 1
    pub message_seq: u64,
    /// Frame number within the message, 0 for the first frame
    pub num: u32,
    /// Offset of this slice within the current frame's payload
    pub index: u64,
    /// Offset of this slice within the logical message
    pub message_offset: u64,
    /// Declared payload length of the current frame
    pub frame_len: u64,
    /// FIN flag of the current frame
    pub fin: bool,
    /// This slice completes the current frame
    pub frame_complete: bool,
}

impl FrameInfo {
    /// This slice is the last one of the logical message
    #[inline]
    pub fn is_message_end(&self) -> bool {
        self.fin && self.frame_complete
    }
}

/// One unit handed to the consumer
#[derive(Debug, PartialEq, Eq)]
pub enum Received<'a> {
    /// Slice of a data frame payload, already unmasked
    Data { info: FrameInfo, payload: &'a [u8] },
    /// Complete Close payload
    Close(&'a [u8]),
    /// Complete Ping payload
    Ping(&'a [u8]),
    /// Complete Pong payload
    Pong(&'a [u8]),
}

/// Per-connection incremental frame parser
#[derive(Debug)]
pub struct FrameReceiver {
    state: ParseState,
    max_frame_size: u64,
    /// Opcode of the data message in progress, if any
    message_opcode: Option<OpCode>,
    message_seq: u64,
    num: u32,
    message_offset: u64,
    /// Whether the current message still expects continuation frames
    in_fragmented_message: bool,
    control: Vec<u8>,
}

impl FrameReceiver {
    /// Create a receiver that rejects frames declaring more than `max_frame_size` bytes
    pub fn new(max_frame_size: u64) -> Self {
        Self {
            state: ParseState::Idle,
            max_frame_size,
            message_opcode: None,
            message_seq: 0,
            num: 0,
            message_offset: 0,
            in_fragmented_message: false,
            control: Vec::new(),
        }
    }

    /// Current parse state
    #[inline]
    pub fn state(&self) -> &ParseState {
        &self.state
    }

    /// True when no frame is partially parsed
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state == ParseState::Idle
    }

    /// Sequence id of the most recently started data message
    #[inline]
    pub fn message_seq(&self) -> u64 {
        self.message_seq
    }

    /// Drop any partial frame and message state
    pub fn reset(&mut self) {
        self.state = ParseState::Idle;
        self.message_opcode = None;
        self.num = 0;
        self.message_offset = 0;
        self.in_fragmented_message = false;
        self.control.clear();
    }

    /// Feed one inbound chunk.
    ///
    /// Payload bytes in `data` are unmasked in place and passed to `sink`
    /// as they complete. On a protocol violation the rest of the chunk is
    /// discarded, the parser returns to `Idle` and the error is returned;
    /// the next chunk is parsed as the start of a new frame.
    pub fn feed<F>(&mut self, data: &mut [u8], mut sink: F) -> Result<()>
    where
        F: FnMut(Received<'_>),
    {
        let mut pos = 0;

        loop {
            match std::mem::take(&mut self.state) {
                ParseState::Idle if pos == data.len() => return Ok(()),
                ParseState::Idle => {
                    pos = self.read_header(data, pos, [0; MAX_FRAME_HEADER_SIZE], 0)?;
                }
                ParseState::AwaitingHeader { buf, len } => {
                    if pos == data.len() {
                        self.state = ParseState::AwaitingHeader { buf, len };
                        return Ok(());
                    }
                    pos = self.read_header(data, pos, buf, len)?;
                }
                ParseState::InPayload { header, consumed } => {
                    let Some(remaining) = header.payload_len.checked_sub(consumed) else {
                        self.reset();
                        return Err(Error::Protocol("frame consumed past its length"));
                    };
                    let available = (data.len() - pos) as u64;
                    if remaining > 0 && available == 0 {
                        self.state = ParseState::InPayload { header, consumed };
                        return Ok(());
                    }

                    let take = remaining.min(available) as usize;
                    let chunk = &mut data[pos..pos + take];
                    if let Some(mask) = header.mask {
                        apply_mask_offset(chunk, mask, consumed);
                    }
                    pos += take;

                    let consumed_now = consumed + take as u64;
                    let complete = consumed_now == header.payload_len;
                    if header.opcode.is_control() {
                        self.control.extend_from_slice(chunk);
                        if complete {
                            let payload = std::mem::take(&mut self.control);
                            match header.opcode {
                                OpCode::Close => sink(Received::Close(&payload)),
                                OpCode::Ping => sink(Received::Ping(&payload)),
                                _ => sink(Received::Pong(&payload)),
                            }
                            self.control = payload;
                            self.control.clear();
                        }
                    } else {
                        let info = FrameInfo {
                            message_opcode: self.message_opcode.unwrap_or(header.opcode),
                            opcode: header.opcode,
                            message_seq: self.message_seq,
                            num: self.num,
                            index: consumed,
                            message_offset: self.message_offset,
                            frame_len: header.payload_len,
                            fin: header.fin,
                            frame_complete: complete,
                        };
                        self.message_offset += take as u64;
                        sink(Received::Data {
                            info,
                            payload: chunk,
                        });
                        if complete && header.fin {
                            self.in_fragmented_message = false;
                        }
                    }

                    if !complete {
                        self.state = ParseState::InPayload {
                            header,
                            consumed: consumed_now,
                        };
                    }
                }
            }
        }
    }

    /// Assemble and decode a header from `partial` plus the chunk at `pos`.
    ///
    /// Returns the chunk position just past the header. If the header is
    /// still incomplete every remaining byte is buffered and the returned
    /// position is the end of the chunk.
    fn read_header(
        &mut self,
        data: &[u8],
        pos: usize,
        mut buf: [u8; MAX_FRAME_HEADER_SIZE],
        len: usize,
    ) -> Result<usize> {
        let take = (MAX_FRAME_HEADER_SIZE - len).min(data.len() - pos);
        buf[len..len + take].copy_from_slice(&data[pos..pos + take]);
        let have = len + take;

        match FrameHeader::decode(&buf[..have], self.max_frame_size) {
            Ok(None) => {
                self.state = ParseState::AwaitingHeader { buf, len: have };
                Ok(data.len())
            }
            Ok(Some((header, used))) => {
                self.begin_frame(&header)?;
                self.state = ParseState::InPayload {
                    header,
                    consumed: 0,
                };
                Ok(pos + (used - len))
            }
            Err(e) => {
                tracing::warn!(error = %e, discarded = data.len() - pos, "Malformed frame header");
                self.reset();
                Err(e)
            }
        }
    }

    /// Update message tracking for a freshly decoded header
    fn begin_frame(&mut self, header: &FrameHeader) -> Result<()> {
        match header.opcode {
            OpCode::Continuation => {
                if !self.in_fragmented_message {
                    self.reset();
                    return Err(Error::Protocol("continuation frame without a message"));
                }
                self.num += 1;
            }
            OpCode::Text | OpCode::Binary => {
                if self.in_fragmented_message {
                    self.reset();
                    return Err(Error::Protocol("expected continuation frame"));
                }
                self.message_opcode = Some(header.opcode);
                self.message_seq += 1;
                self.num = 0;
                self.message_offset = 0;
                self.in_fragmented_message = !header.fin;
            }
            OpCode::Close | OpCode::Ping | OpCode::Pong => {}
        }
        tracing::trace!(
            opcode = ?header.opcode,
            len = header.payload_len,
            fin = header.fin,
            masked = header.masked,
            "Frame header decoded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_header;
    use crate::mask::apply_mask;
    use bytes::{BufMut, BytesMut};
    use proptest::prelude::*;

    /// Owned copy of a delivery for assertions
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Data(FrameInfo, Vec<u8>),
        Close(Vec<u8>),
        Ping(Vec<u8>),
        Pong(Vec<u8>),
    }

    fn record(events: &mut Vec<Event>) -> impl FnMut(Received<'_>) + '_ {
        move |item| {
            events.push(match item {
                Received::Data { info, payload } => Event::Data(info, payload.to_vec()),
                Received::Close(p) => Event::Close(p.to_vec()),
                Received::Ping(p) => Event::Ping(p.to_vec()),
                Received::Pong(p) => Event::Pong(p.to_vec()),
            })
        }
    }

    fn wire_frame(fin: bool, opcode: OpCode, payload: &[u8], masked: bool) -> Vec<u8> {
        let mut buf = BytesMut::new();
        let key = encode_header(&mut buf, fin, opcode, payload.len() as u64, masked);
        let start = buf.len();
        buf.put_slice(payload);
        if let Some(key) = key {
            apply_mask(&mut buf[start..], key);
        }
        buf.to_vec()
    }

    /// Concatenate the payload of every data delivery
    fn data_bytes(events: &[Event]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Data(_, p) => Some(p.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn feed_chunks(rx: &mut FrameReceiver, wire: &[u8], splits: &[usize]) -> Vec<Event> {
        let mut events = Vec::new();
        let mut start = 0;
        for &end in splits.iter().chain(std::iter::once(&wire.len())) {
            let mut chunk = wire[start..end].to_vec();
            rx.feed(&mut chunk, record(&mut events)).unwrap();
            start = end;
        }
        events
    }

    #[test]
    fn test_single_chunk_text() {
        let mut rx = FrameReceiver::new(1 << 20);
        let mut wire = wire_frame(true, OpCode::Text, b"HELLO", false);
        let mut events = Vec::new();

        rx.feed(&mut wire, record(&mut events)).unwrap();

        assert_eq!(events.len(), 1);
        let Event::Data(info, payload) = &events[0] else {
            panic!("expected data");
        };
        assert_eq!(payload, b"HELLO");
        assert_eq!(info.opcode, OpCode::Text);
        assert_eq!(info.message_seq, 1);
        assert!(info.is_message_end());
        assert!(rx.is_idle());
    }

    #[test]
    fn test_header_then_payload_later() {
        let mut rx = FrameReceiver::new(1 << 20);
        let mut events = Vec::new();

        rx.feed(&mut [0x81, 0x05], record(&mut events)).unwrap();
        assert!(events.is_empty());
        assert!(matches!(rx.state(), ParseState::InPayload { consumed: 0, .. }));

        rx.feed(&mut b"HELLO".to_vec(), record(&mut events)).unwrap();
        assert_eq!(data_bytes(&events), b"HELLO");
        assert!(rx.is_idle());
    }

    #[test]
    fn test_header_split_one_byte_at_a_time() {
        let payload = vec![0x5Au8; 300];
        let wire = wire_frame(true, OpCode::Binary, &payload, true);
        let mut rx = FrameReceiver::new(1 << 20);

        // 8-byte header (4 + mask), fed byte by byte, then the payload
        let splits: Vec<usize> = (1..=8).collect();
        let events = feed_chunks(&mut rx, &wire, &splits);

        assert_eq!(data_bytes(&events), payload);
        assert!(rx.is_idle());
    }

    #[test]
    fn test_payload_slices_carry_offsets() {
        let payload: Vec<u8> = (0..20).collect();
        let wire = wire_frame(true, OpCode::Binary, &payload, true);
        let mut rx = FrameReceiver::new(1 << 20);

        let events = feed_chunks(&mut rx, &wire, &[10, 16]);

        let infos: Vec<FrameInfo> = events
            .iter()
            .map(|e| match e {
                Event::Data(info, _) => *info,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[0].index, 0);
        assert_eq!(infos[1].index, 4);
        assert_eq!(infos[2].index, 10);
        assert!(!infos[1].frame_complete);
        assert!(infos[2].frame_complete);
        assert_eq!(data_bytes(&events), payload);
    }

    #[test]
    fn test_fragmented_message_tracking() {
        let mut wire = wire_frame(false, OpCode::Text, b"Hel", false);
        wire.extend(wire_frame(false, OpCode::Continuation, b"lo ", false));
        wire.extend(wire_frame(true, OpCode::Continuation, b"world", false));
        wire.extend(wire_frame(true, OpCode::Binary, b"\x01", false));

        let mut rx = FrameReceiver::new(1 << 20);
        let events = feed_chunks(&mut rx, &wire, &[]);

        let infos: Vec<FrameInfo> = events
            .iter()
            .map(|e| match e {
                Event::Data(info, _) => *info,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(infos.len(), 4);
        assert_eq!(infos[1].opcode, OpCode::Continuation);
        assert_eq!(infos[1].message_opcode, OpCode::Text);
        assert_eq!(infos[2].num, 2);
        assert_eq!(infos[2].message_offset, 6);
        assert!(infos[2].is_message_end());
        assert_eq!(infos[3].message_seq, 2);
        assert_eq!(infos[3].num, 0);
    }

    #[test]
    fn test_control_interleaved_with_fragments() {
        let mut wire = wire_frame(false, OpCode::Text, b"ab", true);
        wire.extend(wire_frame(true, OpCode::Ping, &[1, 2, 3, 4], true));
        wire.extend(wire_frame(true, OpCode::Continuation, b"cd", true));

        let mut rx = FrameReceiver::new(1 << 20);
        let events = feed_chunks(&mut rx, &wire, &[3, 9, 11]);

        assert!(events.contains(&Event::Ping(vec![1, 2, 3, 4])));
        assert_eq!(data_bytes(&events), b"abcd");
    }

    #[test]
    fn test_control_payload_split_across_chunks() {
        let wire = wire_frame(true, OpCode::Close, &[0x03, 0xE8, b'b', b'y', b'e'], true);
        let mut rx = FrameReceiver::new(1 << 20);

        let events = feed_chunks(&mut rx, &wire, &[7, 9]);

        assert_eq!(events, vec![Event::Close(vec![0x03, 0xE8, b'b', b'y', b'e'])]);
    }

    #[test]
    fn test_empty_frames_delivered() {
        let mut wire = wire_frame(true, OpCode::Text, b"", false);
        wire.extend(wire_frame(true, OpCode::Pong, b"", false));
        let mut rx = FrameReceiver::new(1 << 20);

        let events = feed_chunks(&mut rx, &wire, &[]);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::Data(info, p) if p.is_empty() && info.frame_complete));
        assert_eq!(events[1], Event::Pong(vec![]));
    }

    #[test]
    fn test_violation_discards_chunk_and_recovers() {
        let mut rx = FrameReceiver::new(1 << 20);
        let mut events = Vec::new();

        // Continuation with no message in progress, followed by junk
        let mut bad = wire_frame(true, OpCode::Continuation, b"xx", false);
        bad.extend_from_slice(&[0xFF, 0xFF]);
        assert!(rx.feed(&mut bad, record(&mut events)).is_err());
        assert!(rx.is_idle());
        assert!(events.is_empty());

        let mut good = wire_frame(true, OpCode::Text, b"ok", false);
        rx.feed(&mut good, record(&mut events)).unwrap();
        assert_eq!(data_bytes(&events), b"ok");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut rx = FrameReceiver::new(100);
        let mut wire = wire_frame(true, OpCode::Binary, &[0u8; 200], false);

        assert_eq!(
            rx.feed(&mut wire, |_| {}),
            Err(Error::FrameTooLarge(200))
        );
        assert!(rx.is_idle());
    }

    #[test]
    fn test_64bit_length_frame() {
        let payload = vec![7u8; 70_000];
        let wire = wire_frame(true, OpCode::Binary, &payload, true);
        let mut rx = FrameReceiver::new(1 << 20);

        let events = feed_chunks(&mut rx, &wire, &[3, 9, 13, 40_000]);

        assert_eq!(data_bytes(&events).len(), 70_000);
        assert!(rx.is_idle());
    }

    proptest! {
        #[test]
        fn prop_any_split_reproduces_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..400),
            masked in any::<bool>(),
            binary in any::<bool>(),
            mut cuts in proptest::collection::vec(0usize..420, 0..6),
        ) {
            let opcode = if binary { OpCode::Binary } else { OpCode::Text };
            let wire = wire_frame(true, opcode, &payload, masked);
            cuts.iter_mut().for_each(|c| *c %= wire.len() + 1);
            cuts.sort_unstable();

            let mut rx = FrameReceiver::new(1 << 20);
            let events = feed_chunks(&mut rx, &wire, &cuts);

            prop_assert_eq!(data_bytes(&events), payload);
            for event in &events {
                if let Event::Data(info, _) = event {
                    prop_assert_eq!(info.opcode, opcode);
                    prop_assert!(info.fin);
                }
            }
            prop_assert!(rx.is_idle());
        }

        #[test]
        fn prop_every_header_split_point(len in 0usize..300, masked in any::<bool>()) {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let wire = wire_frame(true, OpCode::Binary, &payload, masked);
            let header_len = crate::frame::header_length(masked && len > 0, len as u64);

            for split in 1..header_len {
                let mut rx = FrameReceiver::new(1 << 20);
                let events = feed_chunks(&mut rx, &wire, &[split]);
                prop_assert_eq!(data_bytes(&events), payload.clone());
            }
        }
    }
}
