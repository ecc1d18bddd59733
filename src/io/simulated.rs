// src/io/simulated.rs
//
// In-memory board emulator implementing Transport.
// Parses the frames the host sends, answers the way the firmware does, and can
// be scripted to misbehave at a chosen point of the exchange.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{IoError, Transport};
use crate::tlog;
use crate::transfer::{BoardMessage, HostMessage, Message, SLOT_COUNT};

const DEVICE: &str = "sim";

/// Scripted board behaviour. Chunk indices count DATA messages with a payload, from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoardBehavior {
    /// PERMIT, CHUNK_ACK for every chunk, RECORDED.
    #[default]
    Accept,
    Refuse,
    AbortOnStart,
    SilentOnStart,
    AbortAtChunk(usize),
    SilentAtChunk(usize),
    /// Answer the chunk with a message that is not valid there.
    GarbageAtChunk(usize),
    /// The host's write of this chunk fails.
    FailWriteAtChunk(usize),
    SilentAfterEnd,
    AbortAfterEnd,
    /// Behave like `Accept` but with every reply's checksum off by one.
    CorruptChecksums,
}

#[derive(Default)]
struct SimState {
    behavior: BoardBehavior,
    connected: bool,
    rx: VecDeque<u8>,
    parse_buf: Vec<u8>,
    host_frames: Vec<Message>,
    bad_host_checksums: usize,
    receiving: Option<usize>,
    incoming: Vec<u8>,
    chunk_index: usize,
    stored: [Option<Vec<u8>>; SLOT_COUNT],
}

impl SimState {
    fn reply(&mut self, kind: BoardMessage) {
        let mut frame = Message::board(kind).encode();
        if self.behavior == BoardBehavior::CorruptChecksums {
            if let Some(last) = frame.last_mut() {
                *last = last.wrapping_add(1);
            }
        }
        tlog!("[sim] -> {}", kind.name());
        self.rx.extend(frame);
    }

    fn handle(&mut self, msg: &Message) {
        match msg.host_kind() {
            Some(HostMessage::Start) => self.on_start(msg),
            Some(HostMessage::Data) if msg.payload.is_empty() => self.on_end(),
            Some(HostMessage::Data) => self.on_chunk(msg),
            Some(HostMessage::Abort) => {
                tlog!("[sim] Host aborted");
                self.receiving = None;
                self.incoming.clear();
            }
            None => tlog!("[sim] Ignoring unknown frame {}", msg.kind_name()),
        }
    }

    fn on_start(&mut self, msg: &Message) {
        let slot = msg.payload.first().copied().unwrap_or(0) as usize & 0x03;
        self.chunk_index = 0;
        self.incoming.clear();
        match self.behavior {
            BoardBehavior::Refuse => self.reply(BoardMessage::Refuse),
            BoardBehavior::AbortOnStart => self.reply(BoardMessage::DeviceAbort),
            BoardBehavior::SilentOnStart => {}
            _ => {
                self.receiving = Some(slot);
                self.reply(BoardMessage::Permit);
            }
        }
    }

    fn on_chunk(&mut self, msg: &Message) {
        let index = self.chunk_index;
        self.chunk_index += 1;
        match self.behavior {
            BoardBehavior::AbortAtChunk(n) if n == index => self.reply(BoardMessage::DeviceAbort),
            BoardBehavior::SilentAtChunk(n) if n == index => {}
            BoardBehavior::GarbageAtChunk(n) if n == index => self.reply(BoardMessage::Permit),
            _ => {
                self.incoming.extend_from_slice(&msg.payload);
                self.reply(BoardMessage::ChunkAck);
            }
        }
    }

    fn on_end(&mut self) {
        match self.behavior {
            BoardBehavior::SilentAfterEnd => {}
            BoardBehavior::AbortAfterEnd => self.reply(BoardMessage::DeviceAbort),
            _ => {
                if let Some(slot) = self.receiving.take() {
                    self.stored[slot] = Some(std::mem::take(&mut self.incoming));
                }
                self.reply(BoardMessage::Recorded);
            }
        }
    }

    /// Whether the next write carries the chunk scripted to fail.
    fn write_should_fail(&self, bytes: &[u8]) -> bool {
        match self.behavior {
            BoardBehavior::FailWriteAtChunk(n) => {
                self.parse_buf.is_empty()
                    && bytes.first() == Some(&HostMessage::Data.code())
                    && bytes.len() > 5
                    && self.chunk_index == n
            }
            _ => false,
        }
    }
}

/// A board living in memory. Replies are queued synchronously while the host
/// frame is written, so tests need no extra threads.
pub struct SimulatedBoard {
    state: Mutex<SimState>,
    arrived: Condvar,
}

impl SimulatedBoard {
    pub fn new(behavior: BoardBehavior) -> Self {
        Self {
            state: Mutex::new(SimState {
                behavior,
                connected: true,
                ..SimState::default()
            }),
            arrived: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue bytes on the line as if the board had sent them.
    pub fn push_raw(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes.iter().copied());
        self.arrived.notify_all();
    }

    pub fn set_behavior(&self, behavior: BoardBehavior) {
        self.lock().behavior = behavior;
    }

    /// Every complete frame the host has written, in order.
    pub fn host_frames(&self) -> Vec<Message> {
        self.lock().host_frames.clone()
    }

    /// Host frames of one type.
    pub fn frames_of(&self, kind: HostMessage) -> Vec<Message> {
        self.lock()
            .host_frames
            .iter()
            .filter(|m| m.kind == kind.code())
            .cloned()
            .collect()
    }

    /// Host frames whose checksum did not match their contents.
    pub fn bad_host_checksums(&self) -> usize {
        self.lock().bad_host_checksums
    }

    /// Payload recorded for a slot after a successful transfer.
    pub fn stored(&self, slot: usize) -> Option<Vec<u8>> {
        self.lock().stored.get(slot).cloned().flatten()
    }

    /// Bytes queued for the host and not yet read.
    pub fn pending(&self) -> usize {
        self.lock().rx.len()
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new(BoardBehavior::Accept)
    }
}

impl Transport for SimulatedBoard {
    fn device(&self) -> &str {
        DEVICE
    }

    fn send(&self, bytes: &[u8]) -> Result<(), IoError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(IoError::not_connected(DEVICE));
        }
        if state.write_should_fail(bytes) {
            return Err(IoError::write(DEVICE, "simulated write failure"));
        }

        state.parse_buf.extend_from_slice(bytes);
        while let Some((msg, used, valid)) = Message::parse(&state.parse_buf) {
            state.parse_buf.drain(..used);
            if !valid {
                state.bad_host_checksums += 1;
            }
            tlog!("[sim] <- {} ({} bytes)", msg.kind_name(), msg.payload.len());
            state.handle(&msg);
            state.host_frames.push(msg);
        }
        drop(state);

        self.arrived.notify_all();
        Ok(())
    }

    fn receive_byte(&self, timeout: Duration) -> Result<u8, IoError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if !state.connected {
                return Err(IoError::not_connected(DEVICE));
            }
            if let Some(byte) = state.rx.pop_front() {
                return Ok(byte);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(IoError::timeout(DEVICE, "byte", timeout));
            }
            state = match self.arrived.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn disconnect(&self) {
        let mut state = self.lock();
        state.connected = false;
        state.rx.clear();
        drop(state);
        self.arrived.notify_all();
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}
