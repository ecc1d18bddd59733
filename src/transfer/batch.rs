// src/transfer/batch.rs
//
// Whole-board upload: profile i goes to slot i, one after another, stopping at
// the first transfer that does not succeed.

use super::manager::TransferManager;
use super::{ButtonSlot, TransferError, TransferEvent, TransferOutcome, SLOT_COUNT};
use crate::profile::ButtonProfile;
use crate::tlog;

#[derive(Debug, Clone, PartialEq)]
pub struct BoardUploadReport {
    /// Slots recorded by the board, in order.
    pub succeeded: Vec<ButtonSlot>,
    /// Slot whose transfer ended the upload, if one failed.
    pub failed_slot: Option<ButtonSlot>,
    /// `Succeeded` when every button was recorded, otherwise the failing outcome.
    pub outcome: TransferOutcome,
}

impl BoardUploadReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Upload every profile to its slot and report the aggregate progress in `[0, 1]`.
///
/// Board size and every payload are checked before anything is sent. The
/// transport stays connected afterwards.
pub fn upload_board(
    manager: &TransferManager,
    profiles: &[ButtonProfile],
    mut on_progress: impl FnMut(f64),
) -> Result<BoardUploadReport, TransferError> {
    if profiles.is_empty() || profiles.len() > SLOT_COUNT {
        return Err(TransferError::BoardSize(profiles.len()));
    }
    for profile in profiles {
        profile.to_payload()?;
    }

    let events = manager.subscribe();
    let total = profiles.len() as f64;
    let mut succeeded = Vec::with_capacity(profiles.len());

    for (i, (profile, slot)) in profiles.iter().zip(ButtonSlot::ALL).enumerate() {
        tlog!("[manager] Board upload: button {}/{} '{}'", i + 1, profiles.len(), profile.name);
        on_progress(i as f64 / total);

        if let Err(e) = manager.try_send(slot, profile) {
            return Ok(BoardUploadReport {
                succeeded,
                failed_slot: Some(slot),
                outcome: TransferOutcome::Aborted { reason: e },
            });
        }

        let outcome = loop {
            match events.recv() {
                Ok(TransferEvent::Progress(p)) if p.slot == slot => {
                    on_progress((i as f64 + p.fraction()) / total);
                }
                Ok(TransferEvent::Finished { slot: done, outcome }) if done == slot => break outcome,
                Ok(_) => {}
                Err(e) => {
                    // The manager owns the sender, so this only happens if it went away.
                    break TransferOutcome::Aborted {
                        reason: TransferError::Worker(e.to_string()),
                    };
                }
            }
        };

        if !outcome.is_success() {
            tlog!("[manager] Board upload stopped at slot {}: {}", slot, outcome);
            return Ok(BoardUploadReport {
                succeeded,
                failed_slot: Some(slot),
                outcome,
            });
        }
        succeeded.push(slot);
    }

    on_progress(1.0);
    tlog!("[manager] Board upload complete, {} buttons", succeeded.len());
    Ok(BoardUploadReport {
        succeeded,
        failed_slot: None,
        outcome: TransferOutcome::Succeeded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BoardBehavior, SimulatedBoard, Transport};
    use crate::profile::{Icon, Sound};
    use crate::transfer::message::HostMessage;
    use crate::transfer::{ProtocolTimings, TransferOptions};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_manager(board: &Arc<SimulatedBoard>) -> TransferManager {
        let options = TransferOptions {
            timings: ProtocolTimings {
                first_byte: Duration::from_millis(50),
                inter_byte: Duration::from_millis(20),
                record: Duration::from_millis(150),
            },
            verify_checksums: true,
        };
        TransferManager::new(board.clone(), options)
    }

    fn profiles(n: usize) -> Vec<ButtonProfile> {
        (0..n)
            .map(|i| ButtonProfile::new(format!("b{}", i), Icon::from_rows([i as u8; 8]), Sound::silent(300 + i)))
            .collect()
    }

    #[test]
    fn test_uploads_every_slot_in_order() {
        let board = Arc::new(SimulatedBoard::new(BoardBehavior::Accept));
        let manager = fast_manager(&board);
        let buttons = profiles(4);

        let mut seen = Vec::new();
        let report = upload_board(&manager, &buttons, |f| seen.push(f)).unwrap();
        manager.wait_idle();

        assert!(report.is_success());
        assert_eq!(report.succeeded, ButtonSlot::ALL.to_vec());
        assert_eq!(report.failed_slot, None);

        for (i, profile) in buttons.iter().enumerate() {
            assert_eq!(board.stored(i), Some(profile.to_payload().unwrap()));
        }

        let starts: Vec<u8> = board
            .frames_of(HostMessage::Start)
            .iter()
            .map(|m| m.payload[0])
            .collect();
        assert_eq!(starts, vec![0, 1, 2, 3]);

        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        // Still connected; disconnecting is the caller's call.
        assert!(board.is_connected());
    }

    #[test]
    fn test_stops_at_first_failure() {
        let board = Arc::new(SimulatedBoard::new(BoardBehavior::Refuse));
        let manager = fast_manager(&board);

        let report = upload_board(&manager, &profiles(3), |_| {}).unwrap();
        manager.wait_idle();

        assert_eq!(report.outcome, TransferOutcome::Refused);
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed_slot, Some(ButtonSlot::ALL[0]));
        assert_eq!(board.frames_of(HostMessage::Start).len(), 1);
    }

    #[test]
    fn test_rejects_bad_board_size() {
        let board = Arc::new(SimulatedBoard::default());
        let manager = fast_manager(&board);
        assert_eq!(upload_board(&manager, &[], |_| {}), Err(TransferError::BoardSize(0)));
        assert_eq!(
            upload_board(&manager, &profiles(5), |_| {}),
            Err(TransferError::BoardSize(5))
        );
        assert!(board.host_frames().is_empty());
    }

    #[test]
    fn test_rejects_unserializable_profile_up_front() {
        let board = Arc::new(SimulatedBoard::default());
        let manager = fast_manager(&board);
        let mut buttons = profiles(2);
        buttons[1].sound = Sound::silent(70_000);

        assert!(matches!(
            upload_board(&manager, &buttons, |_| {}),
            Err(TransferError::Serialization(_))
        ));
        assert!(board.host_frames().is_empty());
    }
}
