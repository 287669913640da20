//! Slave-side `{currentVersion, headVersion, incomingQueue}` state, shared
//! by `FullSlaveCm` and `DeltaSlaveCm` (`spec.md` §3, §5).

use std::collections::BTreeMap;

use tokio::sync::{Mutex, Notify};

use occm_proto::{packets::ObjectInstance, CmError, Version};

struct State {
    current: Version,
    head: Version,
    buffered: BTreeMap<u128, ObjectInstance>,
    unmapping: bool,
}

/// Written by the command thread (`deliver`), read by the syncing thread
/// (`sync_to`); guarded by a mutex + condition variable, per `spec.md` §5.
pub struct IncomingQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl IncomingQueue {
    pub fn new(current: Version) -> Self {
        Self {
            state: Mutex::new(State {
                current,
                head: current,
                buffered: BTreeMap::new(),
                unmapping: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Buffers a received-but-not-yet-applied version record.
    pub async fn deliver(&self, packet: ObjectInstance) {
        let mut state = self.state.lock().await;
        if packet.version > state.head {
            state.head = packet.version;
        }
        state.buffered.insert(packet.version.0, packet);
        drop(state);
        self.notify.notify_waiters();
    }

    pub async fn current(&self) -> Version {
        self.state.lock().await.current
    }

    pub async fn head(&self) -> Version {
        self.state.lock().await.head
    }

    /// A slave being unmapped while `sync` is blocked causes that `sync` to
    /// return the current version unchanged; no error (`spec.md` §5).
    pub async fn mark_unmapping(&self) {
        self.state.lock().await.unmapping = true;
        self.notify.notify_waiters();
    }

    /// Advances `current` to at least `target`, applying each contiguous
    /// buffered record via `apply`. `target == HEAD` never blocks: it
    /// applies whatever is already buffered and returns immediately.
    pub async fn sync_to<F>(&self, target: Version, mut apply: F) -> Result<Version, CmError>
    where
        F: FnMut(&ObjectInstance) -> Result<(), CmError>,
    {
        loop {
            let mut state = self.state.lock().await;
            if target.is_head() {
                while let Some((&next_key, _)) = state.buffered.iter().next() {
                    if next_key != state.current.0 + 1 {
                        break;
                    }
                    let packet = state.buffered.remove(&next_key).unwrap();
                    apply(&packet)?;
                    state.current = packet.version;
                }
                return Ok(state.current);
            }

            if state.current >= target {
                return Ok(state.current);
            }
            if state.unmapping {
                return Ok(state.current);
            }

            let next_key = state.current.0 + 1;
            if let Some(packet) = state.buffered.remove(&next_key) {
                apply(&packet)?;
                state.current = packet.version;
                continue;
            }

            // Nothing contiguous available yet: wait for a delivery or an
            // unmap and re-check.
            let notified = self.notify.notified();
            drop(state);
            notified.await;
        }
    }
}
