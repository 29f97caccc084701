//! Normalization of raw multi-touch frames into ordered contact events.
//!
//! The platform input API reports each frame as a flat list of currently
//! active contacts. [`FrameNormalizer`] diffs consecutive frames and emits
//! the semantic events a touchpad server consumes: exactly one `Added` when a
//! contact appears, one `Moved` per frame while it persists, and one
//! `Removed` when it lifts. The transformation is pure and synchronous; it
//! never fails at runtime.

use std::collections::{HashMap, HashSet};

use touchlink_types::{RawContact, TouchPhase, TouchPoint, TrackingId};

/// Diffs consecutive raw frames into per-frame event batches.
///
/// Each call to [`advance`](Self::advance) consumes one raw frame and returns
/// that frame's complete batch. The caller must hand the batch off before
/// feeding the next frame — events from two frames are never interleaved.
#[derive(Debug, Default)]
pub struct FrameNormalizer {
    /// Contacts active after the last frame, with their last emitted pixel
    /// coordinates (used for the `Removed` event).
    active: HashMap<TrackingId, (i32, i32)>,
}

impl FrameNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of contacts currently considered active.
    #[must_use]
    pub fn active_contacts(&self) -> usize {
        self.active.len()
    }

    /// Consume one raw frame and produce its event batch.
    ///
    /// Identifiers present now but not before yield `Added`; identifiers
    /// present in both frames yield `Moved` even if the coordinates are
    /// unchanged; identifiers absent now but present before yield `Removed`
    /// at their last known coordinates.
    ///
    /// # Panics
    ///
    /// A raw frame containing the same tracking id twice violates the caller
    /// contract and is asserted, not recovered.
    pub fn advance(&mut self, contacts: &[RawContact]) -> Vec<TouchPoint> {
        let mut seen = HashSet::with_capacity(contacts.len());
        let mut batch = Vec::with_capacity(contacts.len() + self.active.len());

        for contact in contacts {
            assert!(
                seen.insert(contact.id),
                "duplicate tracking id {} in raw frame",
                contact.id
            );
            let x = to_pixel(contact.x);
            let y = to_pixel(contact.y);
            let phase = match self.active.insert(contact.id, (x, y)) {
                Some(_) => TouchPhase::Moved,
                None => TouchPhase::Added,
            };
            batch.push(TouchPoint {
                tracking_id: contact.id,
                phase,
                x,
                y,
            });
        }

        let lifted: Vec<(TrackingId, i32, i32)> = self
            .active
            .iter()
            .filter(|(id, _)| !seen.contains(*id))
            .map(|(id, &(x, y))| (*id, x, y))
            .collect();
        for (id, x, y) in lifted {
            self.active.remove(&id);
            batch.push(TouchPoint {
                tracking_id: id,
                phase: TouchPhase::Removed,
                x,
                y,
            });
        }

        batch
    }

    /// Platform-level gesture cancellation: every active contact is removed,
    /// exactly as if the next frame had reported no contacts.
    pub fn cancel(&mut self) -> Vec<TouchPoint> {
        self.active
            .drain()
            .map(|(id, (x, y))| TouchPoint {
                tracking_id: id,
                phase: TouchPhase::Removed,
                x,
                y,
            })
            .collect()
    }
}

/// Truncate a raw coordinate to integer device pixels (toward zero, matching
/// the originating hardware's reporting granularity).
#[allow(clippy::cast_possible_truncation)]
fn to_pixel(v: f64) -> i32 {
    v as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phases_for(batch: &[TouchPoint], id: i32) -> Vec<TouchPhase> {
        batch
            .iter()
            .filter(|p| p.tracking_id == TrackingId(id))
            .map(|p| p.phase)
            .collect()
    }

    #[test]
    fn new_contact_is_added_once() {
        let mut norm = FrameNormalizer::new();
        let batch = norm.advance(&[RawContact::new(1, 10.0, 20.0)]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].phase, TouchPhase::Added);
        assert_eq!((batch[0].x, batch[0].y), (10, 20));
        assert_eq!(norm.active_contacts(), 1);
    }

    #[test]
    fn persisting_contact_moves_even_when_stationary() {
        let mut norm = FrameNormalizer::new();
        norm.advance(&[RawContact::new(1, 10.0, 20.0)]);
        let batch = norm.advance(&[RawContact::new(1, 10.0, 20.0)]);
        assert_eq!(phases_for(&batch, 1), vec![TouchPhase::Moved]);
    }

    #[test]
    fn lifted_contact_is_removed_at_last_coordinates() {
        let mut norm = FrameNormalizer::new();
        norm.advance(&[RawContact::new(1, 10.0, 20.0)]);
        norm.advance(&[RawContact::new(1, 12.0, 21.0)]);
        let batch = norm.advance(&[]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].phase, TouchPhase::Removed);
        assert_eq!((batch[0].x, batch[0].y), (12, 21));
        assert_eq!(norm.active_contacts(), 0);
    }

    #[test]
    fn full_lifecycle_has_one_added_and_one_removed() {
        let mut norm = FrameNormalizer::new();
        let frames: Vec<Vec<RawContact>> = vec![
            vec![RawContact::new(7, 1.0, 1.0)],
            vec![RawContact::new(7, 2.0, 2.0)],
            vec![RawContact::new(7, 3.0, 3.0)],
            vec![],
        ];
        let mut phases = Vec::new();
        for frame in &frames {
            phases.extend(phases_for(&norm.advance(frame), 7));
        }
        assert_eq!(
            phases,
            vec![
                TouchPhase::Added,
                TouchPhase::Moved,
                TouchPhase::Moved,
                TouchPhase::Removed,
            ]
        );
    }

    #[test]
    fn id_reuse_after_removal_is_a_fresh_added() {
        let mut norm = FrameNormalizer::new();
        norm.advance(&[RawContact::new(1, 5.0, 5.0)]);
        norm.advance(&[]);
        let batch = norm.advance(&[RawContact::new(1, 8.0, 8.0)]);
        assert_eq!(phases_for(&batch, 1), vec![TouchPhase::Added]);
    }

    #[test]
    fn frame_batch_covers_mixed_phases() {
        let mut norm = FrameNormalizer::new();
        norm.advance(&[RawContact::new(1, 0.0, 0.0), RawContact::new(2, 5.0, 5.0)]);
        // 1 persists, 2 lifts, 3 appears.
        let batch = norm.advance(&[RawContact::new(1, 1.0, 1.0), RawContact::new(3, 9.0, 9.0)]);
        assert_eq!(batch.len(), 3);
        assert_eq!(phases_for(&batch, 1), vec![TouchPhase::Moved]);
        assert_eq!(phases_for(&batch, 2), vec![TouchPhase::Removed]);
        assert_eq!(phases_for(&batch, 3), vec![TouchPhase::Added]);
    }

    #[test]
    fn cancellation_removes_every_active_contact() {
        let mut norm = FrameNormalizer::new();
        norm.advance(&[
            RawContact::new(1, 1.0, 1.0),
            RawContact::new(2, 2.0, 2.0),
            RawContact::new(3, 3.0, 3.0),
        ]);
        let batch = norm.cancel();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|p| p.phase == TouchPhase::Removed));
        assert_eq!(norm.active_contacts(), 0);
    }

    #[test]
    fn coordinates_truncate_toward_zero() {
        let mut norm = FrameNormalizer::new();
        let batch = norm.advance(&[RawContact::new(1, 10.9, 20.999)]);
        assert_eq!((batch[0].x, batch[0].y), (10, 20));
    }

    #[test]
    #[should_panic(expected = "duplicate tracking id")]
    fn duplicate_id_in_one_frame_is_asserted() {
        let mut norm = FrameNormalizer::new();
        norm.advance(&[RawContact::new(1, 0.0, 0.0), RawContact::new(1, 9.0, 9.0)]);
    }

    #[test]
    fn empty_frame_on_idle_normalizer_is_empty() {
        let mut norm = FrameNormalizer::new();
        assert!(norm.advance(&[]).is_empty());
        assert!(norm.cancel().is_empty());
    }
}
