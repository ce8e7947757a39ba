//! Snapshot Fingerprints
//!
//! SHA-256 over a fixed field order of a game snapshot. The hex form goes
//! out next to every `game_state` so that two clients can compare what
//! they rendered without diffing the whole board.

use sha2::{Sha256, Digest};

use crate::core::coord::Coord;

/// 32-byte snapshot digest.
pub type StateHash = [u8; 32];

const GAME_STATE_DOMAIN: &[u8] = b"CHESS_SYNC_STATE_V1";

/// Marker for an absent optional field.
const NONE_MARKER: u8 = u8::MAX;

/// Incremental snapshot hasher.
///
/// Field order is part of the digest.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    fn with_domain(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Hasher seeded with the game-state domain tag.
    pub fn for_game_state() -> Self {
        Self::with_domain(GAME_STATE_DOMAIN)
    }

    /// Feed a small tag (enum discriminant, side index).
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Feed an optional tag; `None` hashes as a reserved marker.
    #[inline]
    pub fn update_tag(&mut self, value: Option<u8>) {
        self.update_u8(value.unwrap_or(NONE_MARKER));
    }

    /// Feed a counter (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Feed a version (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Feed a board coordinate as two little-endian `i32`s.
    pub fn update_coord(&mut self, coord: Coord) {
        self.hasher.update(coord.row.to_le_bytes());
        self.hasher.update(coord.col.to_le_bytes());
    }

    /// Feed a length-prefixed string.
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Finish the digest.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Hash a snapshot at `version`.
///
/// The version goes in first; `add_state` appends the remaining fields.
pub fn compute_state_hash<F>(version: u64, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_game_state();
    hasher.update_u64(version);
    add_state(&mut hasher);
    hasher.finalize()
}
