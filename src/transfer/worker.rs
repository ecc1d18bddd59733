// src/transfer/worker.rs
//
// Per-button transfer state machine.
//
// START -> AWAIT_PERMISSION -> (SEND_CHUNK -> AWAIT_CHUNK_ACK)* -> AWAIT_RECORDED
//       -> SUCCEEDED | REFUSED | ABORTED
//
// Stop-and-wait: every message must be answered before the next goes out, and
// a single wrong or missing answer ends the transfer.

use std::time::Duration;

use super::message::{read_message, BoardMessage, Message};
use super::{
    ButtonSlot, TransferError, TransferEvent, TransferOptions, TransferOutcome, TransferProgress, CHUNK_SIZE,
};
use crate::io::Transport;
use crate::tlog;

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Start,
    AwaitPermission,
    SendChunk,
    AwaitChunkAck,
    AwaitRecorded,
    Succeeded,
    Refused,
    Aborted,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Succeeded | TransferState::Refused | TransferState::Aborted
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TransferState::Start => "START",
            TransferState::AwaitPermission => "AWAIT_PERMISSION",
            TransferState::SendChunk => "SEND_CHUNK",
            TransferState::AwaitChunkAck => "AWAIT_CHUNK_ACK",
            TransferState::AwaitRecorded => "AWAIT_RECORDED",
            TransferState::Succeeded => "SUCCEEDED",
            TransferState::Refused => "REFUSED",
            TransferState::Aborted => "ABORTED",
        }
    }
}

/// Everything one transfer owns: target slot, payload and how far it got.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub slot: ButtonSlot,
    pub payload: Vec<u8>,
    pub bytes_sent: usize,
    pub state: TransferState,
}

impl TransferSession {
    pub fn new(slot: ButtonSlot, payload: Vec<u8>) -> Self {
        Self {
            slot,
            payload,
            bytes_sent: 0,
            state: TransferState::Start,
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.payload.len()
    }

    /// Number of DATA messages with a payload this session needs.
    pub fn chunk_count(&self) -> usize {
        self.payload.len().div_ceil(CHUNK_SIZE)
    }

    fn progress(&self) -> TransferProgress {
        TransferProgress {
            slot: self.slot,
            bytes_sent: self.bytes_sent,
            total_bytes: self.total_bytes(),
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

pub struct TransferWorker {
    session: TransferSession,
    options: TransferOptions,
    /// Length of the chunk waiting for its CHUNK_ACK.
    in_flight: usize,
}

impl TransferWorker {
    pub fn new(slot: ButtonSlot, payload: Vec<u8>, options: TransferOptions) -> Self {
        Self {
            session: TransferSession::new(slot, payload),
            options,
            in_flight: 0,
        }
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Run the transfer to completion on the calling thread.
    ///
    /// `on_event` receives progress before every chunk and then exactly one
    /// `Finished` event carrying the returned outcome.
    pub fn run(mut self, transport: &dyn Transport, on_event: &mut dyn FnMut(TransferEvent)) -> TransferOutcome {
        let slot = self.session.slot;
        tlog!(
            "[transfer] Slot {}: starting on {} ({} bytes, {} chunks)",
            slot,
            transport.device(),
            self.session.total_bytes(),
            self.session.chunk_count()
        );

        let outcome = match self.drive(transport, on_event) {
            Ok(()) => {
                self.enter(TransferState::Succeeded);
                TransferOutcome::Succeeded
            }
            Err(TransferError::Refused) => {
                self.enter(TransferState::Refused);
                TransferOutcome::Refused
            }
            Err(TransferError::DeviceAbort) => {
                self.enter(TransferState::Aborted);
                TransferOutcome::Aborted {
                    reason: TransferError::DeviceAbort,
                }
            }
            Err(reason) => {
                tlog!("[transfer] Slot {}: {}, sending ABORT", slot, reason);
                // Best effort; the line may already be gone.
                if let Err(e) = transport.send(&Message::abort().encode()) {
                    tlog!("[transfer] Slot {}: ABORT not sent: {}", slot, e);
                }
                self.enter(TransferState::Aborted);
                TransferOutcome::Aborted { reason }
            }
        };

        tlog!("[transfer] Slot {}: {}", slot, outcome);
        on_event(TransferEvent::Finished {
            slot,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn enter(&mut self, next: TransferState) {
        tlog!(
            "[transfer] Slot {}: {} -> {}",
            self.session.slot,
            self.session.state.name(),
            next.name()
        );
        self.session.state = next;
    }

    fn drive(&mut self, transport: &dyn Transport, on_event: &mut dyn FnMut(TransferEvent)) -> Result<(), TransferError> {
        let timings = self.options.timings;

        // Flush a byte left over from an earlier exchange.
        match transport.receive_byte(timings.first_byte) {
            Ok(stale) => tlog!("[transfer] Slot {}: drained stale byte 0x{:02X}", self.session.slot, stale),
            Err(e) if e.is_timeout() => {}
            Err(e) => return Err(e.into()),
        }

        loop {
            match self.session.state {
                TransferState::Start => {
                    transport.send(&Message::start(self.session.slot).encode())?;
                    self.enter(TransferState::AwaitPermission);
                }
                TransferState::AwaitPermission => {
                    self.await_reply(transport, timings.first_byte, BoardMessage::Permit)?;
                    self.enter(TransferState::SendChunk);
                }
                TransferState::SendChunk => {
                    let start = self.session.bytes_sent;
                    let total = self.session.total_bytes();
                    if start < total {
                        let end = (start + CHUNK_SIZE).min(total);
                        on_event(TransferEvent::Progress(self.session.progress()));
                        transport.send(&Message::data(&self.session.payload[start..end]).encode())?;
                        self.in_flight = end - start;
                        self.session.state = TransferState::AwaitChunkAck;
                    } else {
                        transport.send(&Message::end_of_payload().encode())?;
                        self.enter(TransferState::AwaitRecorded);
                    }
                }
                TransferState::AwaitChunkAck => {
                    self.await_reply(transport, timings.first_byte, BoardMessage::ChunkAck)?;
                    self.session.bytes_sent += self.in_flight;
                    self.in_flight = 0;
                    self.session.state = TransferState::SendChunk;
                }
                TransferState::AwaitRecorded => {
                    self.await_reply(transport, timings.record, BoardMessage::Recorded)?;
                    return Ok(());
                }
                TransferState::Succeeded | TransferState::Refused | TransferState::Aborted => return Ok(()),
            }
        }
    }

    /// Read one reply and classify it against the message this state expects.
    fn await_reply(
        &self,
        transport: &dyn Transport,
        first_byte: Duration,
        expected: BoardMessage,
    ) -> Result<(), TransferError> {
        let msg = read_message(
            transport,
            first_byte,
            self.options.timings.inter_byte,
            self.options.verify_checksums,
        )?;
        match msg.board_kind() {
            Some(kind) if kind == expected => Ok(()),
            Some(BoardMessage::DeviceAbort) => {
                tlog!("[transfer] Slot {}: board sent DEVICE_ABORT", self.session.slot);
                Err(TransferError::DeviceAbort)
            }
            Some(BoardMessage::Refuse) if expected == BoardMessage::Permit => Err(TransferError::Refused),
            _ => Err(TransferError::ProtocolViolation {
                expected: expected.name().to_string(),
                received: msg.kind_name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BoardBehavior, IoError, SimulatedBoard};
    use crate::transfer::message::HostMessage;
    use crate::transfer::ProtocolTimings;
    use std::time::Instant;

    fn fast_options() -> TransferOptions {
        TransferOptions {
            timings: ProtocolTimings {
                first_byte: Duration::from_millis(50),
                inter_byte: Duration::from_millis(20),
                record: Duration::from_millis(150),
            },
            verify_checksums: true,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7) as u8).collect()
    }

    fn run(board: &SimulatedBoard, slot: u8, data: Vec<u8>) -> (TransferOutcome, Vec<TransferEvent>) {
        run_with(board, slot, data, fast_options())
    }

    fn run_with(
        board: &SimulatedBoard,
        slot: u8,
        data: Vec<u8>,
        options: TransferOptions,
    ) -> (TransferOutcome, Vec<TransferEvent>) {
        let worker = TransferWorker::new(ButtonSlot::new(slot).unwrap(), data, options);
        let mut events = Vec::new();
        let outcome = worker.run(board, &mut |e| events.push(e));
        (outcome, events)
    }

    fn progress(events: &[TransferEvent]) -> Vec<(usize, usize)> {
        events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress(p) => Some((p.bytes_sent, p.total_bytes)),
                _ => None,
            })
            .collect()
    }

    fn is_aborted(outcome: &TransferOutcome) -> bool {
        matches!(outcome, TransferOutcome::Aborted { .. })
    }

    // ========================================================================
    // Successful Transfers
    // ========================================================================

    #[test]
    fn test_300_byte_payload() {
        let board = SimulatedBoard::new(BoardBehavior::Accept);
        let data = payload(300);
        let (outcome, events) = run(&board, 2, data.clone());

        assert_eq!(outcome, TransferOutcome::Succeeded);
        assert_eq!(progress(&events), vec![(0, 300), (256, 300)]);

        let sizes: Vec<usize> = board
            .frames_of(HostMessage::Data)
            .iter()
            .map(|m| m.payload.len())
            .collect();
        assert_eq!(sizes, vec![256, 44, 0]);

        assert_eq!(board.frames_of(HostMessage::Abort).len(), 0);
        assert_eq!(board.bad_host_checksums(), 0);
        assert_eq!(board.stored(2), Some(data));

        match events.last() {
            Some(TransferEvent::Finished { slot, outcome }) => {
                assert_eq!(slot.index(), 2);
                assert!(outcome.is_success());
            }
            other => panic!("last event should be Finished, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_count_matches_payload_length() {
        for len in [1usize, 255, 256, 257, 512, 1000] {
            let board = SimulatedBoard::new(BoardBehavior::Accept);
            let (outcome, events) = run(&board, 0, payload(len));
            assert!(outcome.is_success(), "len {}", len);

            let data = board.frames_of(HostMessage::Data);
            assert_eq!(data.len(), len.div_ceil(CHUNK_SIZE) + 1, "len {}", len);
            assert!(data.last().unwrap().payload.is_empty());
            assert_eq!(progress(&events).len(), len.div_ceil(CHUNK_SIZE));
        }
    }

    #[test]
    fn test_progress_is_monotonic_and_below_one() {
        let board = SimulatedBoard::new(BoardBehavior::Accept);
        let (_, events) = run(&board, 1, payload(8 + 2 + 1500));

        let fractions: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress(p) => Some(p.fraction()),
                _ => None,
            })
            .collect();
        assert_eq!(fractions.first(), Some(&0.0));
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert!(fractions.iter().all(|f| (0.0..1.0).contains(f)));

        let finished = events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Finished { .. }))
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn test_start_message_carries_slot_and_version() {
        let board = SimulatedBoard::new(BoardBehavior::Accept);
        run(&board, 3, payload(10));
        let starts = board.frames_of(HostMessage::Start);
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].payload, vec![3, 0]);
    }

    #[test]
    fn test_empty_payload_sends_only_terminal_data() {
        let board = SimulatedBoard::new(BoardBehavior::Accept);
        let (outcome, events) = run(&board, 0, Vec::new());
        assert!(outcome.is_success());
        assert!(progress(&events).is_empty());
        let data = board.frames_of(HostMessage::Data);
        assert_eq!(data.len(), 1);
        assert!(data[0].payload.is_empty());
    }

    #[test]
    fn test_new_session_state() {
        let worker = TransferWorker::new(ButtonSlot::ALL[1], payload(513), fast_options());
        let session = worker.session();
        assert_eq!(session.state, TransferState::Start);
        assert_eq!(session.bytes_sent, 0);
        assert_eq!(session.chunk_count(), 3);
        assert!(!session.state.is_terminal());
        assert!(TransferState::Refused.is_terminal());
    }

    #[test]
    fn test_board_can_change_its_mind() {
        let board = SimulatedBoard::new(BoardBehavior::Accept);
        assert!(run(&board, 0, payload(10)).0.is_success());
        board.set_behavior(BoardBehavior::Refuse);
        assert_eq!(run(&board, 1, payload(10)).0, TransferOutcome::Refused);
        assert!(board.stored(0).is_some());
        assert!(board.stored(1).is_none());
    }

    #[test]
    fn test_stale_byte_is_drained() {
        let board = SimulatedBoard::new(BoardBehavior::Accept);
        board.push_raw(&[0xB6]);
        let (outcome, _) = run(&board, 0, payload(20));
        assert!(outcome.is_success());
    }

    // ========================================================================
    // Refusal and Aborts
    // ========================================================================

    #[test]
    fn test_refused_sends_no_data_and_no_abort() {
        let board = SimulatedBoard::new(BoardBehavior::Refuse);
        let (outcome, events) = run(&board, 0, payload(300));
        assert_eq!(outcome, TransferOutcome::Refused);
        assert!(board.frames_of(HostMessage::Data).is_empty());
        assert!(board.frames_of(HostMessage::Abort).is_empty());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_silence_after_start_sends_abort() {
        let board = SimulatedBoard::new(BoardBehavior::SilentOnStart);
        let started = Instant::now();
        let (outcome, _) = run(&board, 0, payload(300));

        match outcome {
            TransferOutcome::Aborted {
                reason: TransferError::Timeout { waited_ms, .. },
            } => assert_eq!(waited_ms, 50),
            other => panic!("expected timeout abort, got {:?}", other),
        }
        assert_eq!(board.frames_of(HostMessage::Abort).len(), 1);
        assert!(board.frames_of(HostMessage::Data).is_empty());
        // drain wait + permission wait
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_device_abort_on_start_is_not_echoed() {
        let board = SimulatedBoard::new(BoardBehavior::AbortOnStart);
        let (outcome, _) = run(&board, 0, payload(10));
        assert_eq!(
            outcome,
            TransferOutcome::Aborted {
                reason: TransferError::DeviceAbort
            }
        );
        assert!(board.frames_of(HostMessage::Abort).is_empty());
    }

    #[test]
    fn test_device_abort_mid_transfer_is_not_echoed() {
        let board = SimulatedBoard::new(BoardBehavior::AbortAtChunk(1));
        let (outcome, events) = run(&board, 0, payload(600));
        assert!(is_aborted(&outcome));
        assert!(board.frames_of(HostMessage::Abort).is_empty());
        assert_eq!(progress(&events), vec![(0, 600), (256, 600)]);
        assert_eq!(board.stored(0), None);
    }

    #[test]
    fn test_missing_chunk_ack_sends_abort() {
        let board = SimulatedBoard::new(BoardBehavior::SilentAtChunk(0));
        let (outcome, _) = run(&board, 0, payload(300));
        assert!(is_aborted(&outcome));
        assert_eq!(board.frames_of(HostMessage::Abort).len(), 1);
        assert_eq!(board.frames_of(HostMessage::Data).len(), 1);
    }

    #[test]
    fn test_unexpected_reply_is_protocol_violation() {
        let board = SimulatedBoard::new(BoardBehavior::GarbageAtChunk(0));
        let (outcome, _) = run(&board, 0, payload(100));
        assert_eq!(
            outcome,
            TransferOutcome::Aborted {
                reason: TransferError::ProtocolViolation {
                    expected: "CHUNK_ACK".to_string(),
                    received: "PERMIT".to_string(),
                }
            }
        );
        assert_eq!(board.frames_of(HostMessage::Abort).len(), 1);
    }

    #[test]
    fn test_no_recorded_sends_abort() {
        let board = SimulatedBoard::new(BoardBehavior::SilentAfterEnd);
        let started = Instant::now();
        let (outcome, _) = run(&board, 0, payload(100));
        match outcome {
            TransferOutcome::Aborted {
                reason: TransferError::Timeout { waited_ms, .. },
            } => assert_eq!(waited_ms, 150),
            other => panic!("expected timeout abort, got {:?}", other),
        }
        assert_eq!(board.frames_of(HostMessage::Abort).len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_device_abort_after_end() {
        let board = SimulatedBoard::new(BoardBehavior::AbortAfterEnd);
        let (outcome, _) = run(&board, 0, payload(100));
        assert_eq!(
            outcome,
            TransferOutcome::Aborted {
                reason: TransferError::DeviceAbort
            }
        );
        assert!(board.frames_of(HostMessage::Abort).is_empty());
    }

    #[test]
    fn test_write_failure_aborts_with_best_effort_abort() {
        let board = SimulatedBoard::new(BoardBehavior::FailWriteAtChunk(1));
        let (outcome, _) = run(&board, 0, payload(600));
        match outcome {
            TransferOutcome::Aborted {
                reason: TransferError::Io(IoError::Write { .. }),
            } => {}
            other => panic!("expected write failure abort, got {:?}", other),
        }
        assert_eq!(board.frames_of(HostMessage::Abort).len(), 1);
    }

    #[test]
    fn test_disconnected_transport_aborts() {
        let board = SimulatedBoard::new(BoardBehavior::Accept);
        board.disconnect();
        let (outcome, events) = run(&board, 0, payload(10));
        assert!(is_aborted(&outcome));
        assert_eq!(events.len(), 1);
    }

    // ========================================================================
    // Checksum Verification
    // ========================================================================

    #[test]
    fn test_corrupt_reply_rejected_when_verifying() {
        let board = SimulatedBoard::new(BoardBehavior::CorruptChecksums);
        let (outcome, _) = run(&board, 0, payload(10));
        assert!(matches!(
            outcome,
            TransferOutcome::Aborted {
                reason: TransferError::ChecksumMismatch { .. }
            }
        ));
        assert_eq!(board.frames_of(HostMessage::Abort).len(), 1);
    }

    #[test]
    fn test_corrupt_reply_accepted_without_verification() {
        let board = SimulatedBoard::new(BoardBehavior::CorruptChecksums);
        let options = TransferOptions {
            verify_checksums: false,
            ..fast_options()
        };
        let (outcome, _) = run_with(&board, 0, payload(10), options);
        assert!(outcome.is_success());
    }
}
