// Core id types for the mesh session layer.
//
// `PlayerId` is the wire-level player number. Real players occupy the range
// `[0, MAX_PLAYERS)`; two reserved values act as pseudo-destinations:
// `BROADCAST` (every player, and also "not yet joined" when used as a
// session's own id) and `MASTER` (the current session master, resolved by
// the receiving side). `Cookie` ties a join request to the acceptance it
// provokes.

use serde::{Deserialize, Serialize};

/// Maximum number of participants in one session.
pub const MAX_PLAYERS: usize = 4;

/// Wire-level player number (compact u8, not a persistent identity).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u8);

impl PlayerId {
    /// Pseudo-id addressing every player. Also the initial value of a
    /// session's own id before a join completes.
    pub const BROADCAST: PlayerId = PlayerId(0xFF);

    /// Pseudo-id addressing whichever player currently serves as master.
    pub const MASTER: PlayerId = PlayerId(0xFE);

    /// Peer-table slot for this id, or `None` for pseudo-ids and other
    /// out-of-range values.
    pub fn index(self) -> Option<usize> {
        let idx = usize::from(self.0);
        (idx < MAX_PLAYERS).then_some(idx)
    }

    /// True for ids in `[0, MAX_PLAYERS)`.
    pub fn is_real(self) -> bool {
        self.index().is_some()
    }
}

/// Random nonce correlating a join request with its acceptance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_ids_have_indices() {
        for i in 0..MAX_PLAYERS as u8 {
            assert_eq!(PlayerId(i).index(), Some(usize::from(i)));
            assert!(PlayerId(i).is_real());
        }
    }

    #[test]
    fn pseudo_ids_have_no_index() {
        assert_eq!(PlayerId::BROADCAST.index(), None);
        assert_eq!(PlayerId::MASTER.index(), None);
        assert_eq!(PlayerId(MAX_PLAYERS as u8).index(), None);
    }

    #[test]
    fn pseudo_ids_are_distinct() {
        assert_ne!(PlayerId::BROADCAST, PlayerId::MASTER);
    }
}
