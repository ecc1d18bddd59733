// src/transfer/manager.rs
//
// Serializes button transfers over one transport. At most one worker thread
// runs at a time; its events are relayed to every subscribed listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use super::worker::TransferWorker;
use super::{ButtonSlot, TransferError, TransferEvent, TransferOptions};
use crate::io::Transport;
use crate::profile::ButtonProfile;
use crate::tlog;

type Listeners = Arc<Mutex<Vec<Sender<TransferEvent>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Send an event to every listener, dropping the ones whose receiver is gone.
fn broadcast(listeners: &Listeners, event: TransferEvent) {
    lock(listeners).retain(|tx| tx.send(event.clone()).is_ok());
}

pub struct TransferManager {
    transport: Arc<dyn Transport>,
    options: TransferOptions,
    active: Arc<AtomicBool>,
    listeners: Listeners,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransferManager {
    /// Take ownership of a connected transport for the whole session.
    pub fn new(transport: Arc<dyn Transport>, options: TransferOptions) -> Self {
        Self {
            transport,
            options,
            active: Arc::new(AtomicBool::new(false)),
            listeners: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Register a listener. It receives every event of every later transfer.
    pub fn subscribe(&self) -> Receiver<TransferEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.listeners).push(tx);
        rx
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start sending `profile` to `slot` in the background.
    ///
    /// Fails with `Busy` while another transfer runs and with `Serialization`
    /// if the profile cannot be turned into a payload. In both cases nothing is
    /// started and no event is emitted. The transfer result arrives as a
    /// `Finished` event.
    pub fn try_send(&self, slot: ButtonSlot, profile: &ButtonProfile) -> Result<(), TransferError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tlog!("[manager] Slot {}: rejected, a transfer is already in progress", slot);
            return Err(TransferError::Busy);
        }

        let payload = match profile.to_payload() {
            Ok(p) => p,
            Err(e) => {
                tlog!("[manager] Slot {}: {}", slot, e);
                self.active.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let worker = TransferWorker::new(slot, payload, self.options);
        let transport = Arc::clone(&self.transport);
        let active = Arc::clone(&self.active);
        let listeners = Arc::clone(&self.listeners);

        let spawned = std::thread::Builder::new()
            .name(format!("boardlink-slot-{}", slot))
            .spawn(move || {
                let mut relay = |event: TransferEvent| {
                    // Clear first so a listener reacting to Finished can start the next transfer.
                    if matches!(event, TransferEvent::Finished { .. }) {
                        active.store(false, Ordering::Release);
                    }
                    broadcast(&listeners, event);
                };
                worker.run(&*transport, &mut relay);
            });

        match spawned {
            Ok(handle) => {
                tlog!("[manager] Slot {}: transfer of '{}' started", slot, profile.name);
                let previous = lock(&self.worker).replace(handle);
                if let Some(prev) = previous {
                    // Already past its Finished event.
                    let _ = prev.join();
                }
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::Release);
                Err(TransferError::Worker(e.to_string()))
            }
        }
    }

    /// `try_send` reduced to whether a transfer was started.
    pub fn send(&self, slot: ButtonSlot, profile: &ButtonProfile) -> bool {
        self.try_send(slot, profile).is_ok()
    }

    /// Block until the current worker thread, if any, has exited.
    pub fn wait_idle(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tlog!("[manager] Transfer worker panicked");
                self.active.store(false, Ordering::Release);
            }
        }
    }

    /// Release the transport. Callers should wait for the terminal event first.
    pub fn disconnect(&self) {
        tlog!("[manager] Disconnecting {}", self.transport.device());
        self.transport.disconnect();
    }
}
