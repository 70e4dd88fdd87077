//! Playlist entity and the in-place reorder engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{PlaylistId, TrackId, UserId, Version};

/// Maximum entries a single playlist may hold.
pub const MAX_PLAYLIST_ENTRIES: usize = 10_000;
/// Maximum playlists a single owner may hold.
pub const MAX_PLAYLISTS_PER_OWNER: usize = 200;
/// Maximum moves accepted in a single reorder request.
pub const MAX_REORDER_MOVES: usize = 50;

/// One track's membership in a playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// Zero-based position; contiguous `0..n-1` after every mutation.
    pub position: u32,
    /// Referenced track.
    pub track_id: TrackId,
    /// Instant the track was added.
    pub added_at: DateTime<Utc>,
    /// Track duration snapshot used for the playlist total.
    pub duration_secs: f64,
}

/// A single `(from, to)` move applied in-list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReorderMove {
    /// Index of the entry to lift out.
    pub from: usize,
    /// Index to re-insert it at, evaluated after the removal.
    pub to: usize,
}

/// An ordered, owner-scoped collection of tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    /// Primary identifier.
    pub id: PlaylistId,
    /// Owning user.
    pub owner_user_id: UserId,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Ordered entries; positions are maintained by this type.
    pub entries: Vec<PlaylistEntry>,
    /// Derived: sum of entry durations in seconds.
    pub total_duration_secs: f64,
    /// Derived: entry count.
    pub track_count: u32,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token.
    pub version: Version,
}

impl Playlist {
    /// Create an empty playlist.
    #[must_use]
    pub fn new(
        id: PlaylistId,
        owner_user_id: UserId,
        name: String,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_user_id,
            name,
            description,
            entries: Vec::new(),
            total_duration_secs: 0.0,
            track_count: 0,
            created_at: now,
            updated_at: now,
            version: Version::NEW,
        }
    }

    /// Apply a batch of moves sequentially, each seeing the effect of the
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::TooManyMoves`] past the per-request cap and
    /// [`DomainError::MoveOutOfBounds`] when any move references an index
    /// outside the current entry list; the playlist is left unchanged on
    /// error.
    pub fn reorder(&mut self, moves: &[ReorderMove], now: DateTime<Utc>) -> Result<(), DomainError> {
        if moves.len() > MAX_REORDER_MOVES {
            return Err(DomainError::TooManyMoves {
                count: moves.len(),
                max: MAX_REORDER_MOVES,
            });
        }

        let mut staged = self.entries.clone();
        for step in moves {
            let len = staged.len();
            if step.from >= len || step.to >= len {
                return Err(DomainError::MoveOutOfBounds {
                    from: step.from,
                    to: step.to,
                    len,
                });
            }
            let entry = staged.remove(step.from);
            staged.insert(step.to, entry);
        }

        self.entries = staged;
        self.reindex(now);
        Ok(())
    }

    /// Insert tracks at `position`, or append when `position` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::PlaylistFull`] when the quota would be exceeded
    /// and [`DomainError::PositionOutOfBounds`] for an insertion point past
    /// the end of the list.
    pub fn add_tracks(
        &mut self,
        tracks: Vec<(TrackId, f64)>,
        position: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.entries.len() + tracks.len() > MAX_PLAYLIST_ENTRIES {
            return Err(DomainError::PlaylistFull {
                max: MAX_PLAYLIST_ENTRIES,
            });
        }
        let at = position.unwrap_or(self.entries.len());
        if at > self.entries.len() {
            return Err(DomainError::PositionOutOfBounds {
                position: at,
                len: self.entries.len(),
            });
        }

        let new_entries = tracks.into_iter().map(|(track_id, duration_secs)| PlaylistEntry {
            position: 0,
            track_id,
            added_at: now,
            duration_secs,
        });
        self.entries.splice(at..at, new_entries);
        self.reindex(now);
        Ok(())
    }

    /// Remove the entry at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::PositionOutOfBounds`] when no entry holds that
    /// position.
    pub fn remove_at(&mut self, position: usize, now: DateTime<Utc>) -> Result<(), DomainError> {
        if position >= self.entries.len() {
            return Err(DomainError::PositionOutOfBounds {
                position,
                len: self.entries.len(),
            });
        }
        self.entries.remove(position);
        self.reindex(now);
        Ok(())
    }

    /// Current position vector, useful for assertions and API responses.
    #[must_use]
    pub fn track_order(&self) -> Vec<TrackId> {
        self.entries.iter().map(|entry| entry.track_id).collect()
    }

    fn reindex(&mut self, now: DateTime<Utc>) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.position = u32::try_from(index).unwrap_or(u32::MAX);
        }
        self.track_count = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.total_duration_secs = self.entries.iter().map(|entry| entry.duration_secs).sum();
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist_with(count: usize) -> (Playlist, Vec<TrackId>) {
        let now = Utc::now();
        let mut playlist = Playlist::new(
            PlaylistId::generate(),
            UserId::generate(),
            "Morning".to_string(),
            None,
            now,
        );
        let ids: Vec<TrackId> = (0..count).map(|_| TrackId::generate()).collect();
        playlist
            .add_tracks(ids.iter().map(|id| (*id, 60.0)).collect(), None, now)
            .expect("within quota");
        (playlist, ids)
    }

    #[test]
    fn positions_stay_contiguous_and_totals_derive() {
        let (playlist, _) = playlist_with(4);
        let positions: Vec<u32> = playlist.entries.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert_eq!(playlist.track_count, 4);
        assert!((playlist.total_duration_secs - 240.0).abs() < f64::EPSILON);
    }

    #[test]
    fn moves_apply_sequentially() -> anyhow::Result<()> {
        let (mut playlist, ids) = playlist_with(4);
        // [a b c d] -> move 0->2 -> [b c a d] -> move 3->0 -> [d b c a]
        playlist.reorder(
            &[ReorderMove { from: 0, to: 2 }, ReorderMove { from: 3, to: 0 }],
            Utc::now(),
        )?;
        assert_eq!(playlist.track_order(), vec![ids[3], ids[1], ids[2], ids[0]]);
        Ok(())
    }

    #[test]
    fn inverse_reorder_restores_original_order() -> anyhow::Result<()> {
        let (mut playlist, ids) = playlist_with(5);
        let moves = [ReorderMove { from: 1, to: 3 }];
        let inverse = [ReorderMove { from: 3, to: 1 }];
        playlist.reorder(&moves, Utc::now())?;
        playlist.reorder(&inverse, Utc::now())?;
        assert_eq!(playlist.track_order(), ids);
        Ok(())
    }

    #[test]
    fn out_of_bounds_move_leaves_playlist_unchanged() {
        let (mut playlist, ids) = playlist_with(3);
        let err = playlist
            .reorder(
                &[ReorderMove { from: 0, to: 1 }, ReorderMove { from: 9, to: 0 }],
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::MoveOutOfBounds { from: 9, .. }));
        assert_eq!(playlist.track_order(), ids);
    }

    #[test]
    fn move_cap_is_enforced() {
        let (mut playlist, _) = playlist_with(2);
        let moves = vec![ReorderMove { from: 0, to: 1 }; MAX_REORDER_MOVES + 1];
        let err = playlist.reorder(&moves, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            DomainError::TooManyMoves {
                count: MAX_REORDER_MOVES + 1,
                max: MAX_REORDER_MOVES,
            }
        );
    }

    #[test]
    fn insert_at_position_shifts_later_entries() -> anyhow::Result<()> {
        let (mut playlist, ids) = playlist_with(3);
        let inserted = TrackId::generate();
        playlist.add_tracks(vec![(inserted, 30.0)], Some(1), Utc::now())?;
        assert_eq!(
            playlist.track_order(),
            vec![ids[0], inserted, ids[1], ids[2]]
        );
        assert_eq!(playlist.track_count, 4);
        Ok(())
    }

    #[test]
    fn remove_reindexes_and_recomputes() -> anyhow::Result<()> {
        let (mut playlist, ids) = playlist_with(3);
        playlist.remove_at(1, Utc::now())?;
        assert_eq!(playlist.track_order(), vec![ids[0], ids[2]]);
        let positions: Vec<u32> = playlist.entries.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1]);
        assert!((playlist.total_duration_secs - 120.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn entry_quota_is_enforced() {
        let now = Utc::now();
        let mut playlist = Playlist::new(
            PlaylistId::generate(),
            UserId::generate(),
            "Big".to_string(),
            None,
            now,
        );
        let batch: Vec<(TrackId, f64)> = (0..=MAX_PLAYLIST_ENTRIES)
            .map(|_| (TrackId::generate(), 1.0))
            .collect();
        let err = playlist.add_tracks(batch, None, now).unwrap_err();
        assert!(matches!(err, DomainError::PlaylistFull { .. }));
    }
}
