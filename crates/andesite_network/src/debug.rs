//! The packet debug surface: opt-in logging of packet traffic, globally or
//! per (id, state, direction). Logging never changes semantics or
//! ordering; it only renders what already flows.

use std::sync::atomic::{AtomicBool, Ordering};

use andesite_protocol::{PacketSide, ProtocolState};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;

#[derive(Default)]
pub struct PacketLog {
    all: AtomicBool,
    entries: RwLock<FxHashSet<(i32, ProtocolState, PacketSide)>>,
}

impl PacketLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables logging of every packet.
    pub fn set_all(&self, enabled: bool) {
        self.all.store(enabled, Ordering::Relaxed);
    }

    pub fn enable(&self, id: i32, state: ProtocolState, side: PacketSide) {
        self.entries.write().insert((id, state, side));
    }

    pub fn disable(&self, id: i32, state: ProtocolState, side: PacketSide) {
        self.entries.write().remove(&(id, state, side));
    }

    pub fn enabled(&self, id: i32, state: ProtocolState, side: PacketSide) -> bool {
        self.all.load(Ordering::Relaxed) || self.entries.read().contains(&(id, state, side))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flag_covers_everything() {
        let log = PacketLog::new();
        assert!(!log.enabled(0, ProtocolState::Play, PacketSide::Serverbound));

        log.set_all(true);
        assert!(log.enabled(0x40, ProtocolState::Login, PacketSide::Clientbound));
    }

    #[test]
    fn per_packet_entries_are_keyed_on_all_three() {
        let log = PacketLog::new();
        log.enable(0x00, ProtocolState::Play, PacketSide::Serverbound);

        assert!(log.enabled(0x00, ProtocolState::Play, PacketSide::Serverbound));
        assert!(!log.enabled(0x00, ProtocolState::Play, PacketSide::Clientbound));
        assert!(!log.enabled(0x00, ProtocolState::Status, PacketSide::Serverbound));
    }
}
