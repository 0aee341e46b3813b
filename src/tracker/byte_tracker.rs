//! Two-stage BYTE association with tentative-track confirmation.

use std::collections::HashSet;

use serde::Deserialize;

use crate::tracker::TrackError;
use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::{self, AssignmentResult, Detection};
use crate::tracker::rect::{Rect, iou_batch};
use crate::tracker::strack::STrack;
use crate::tracker::track_state::TrackState;

/// Configuration for the BYTETracker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Detections at or above this score take part in the first association.
    pub track_thresh: f32,
    /// Detections above this score (and below `track_thresh`) take part in the second.
    pub low_thresh: f32,
    /// Minimum score for a leftover detection to start a new track.
    pub new_track_thresh: f32,
    /// Maximum fused IoU cost accepted in the first association.
    pub match_thresh: f32,
    /// Frames a lost track is kept at 30 fps (the Deep SORT `max_age`).
    pub track_buffer: u32,
    pub frame_rate: f32,
    /// Hits needed before a track is reported.
    pub n_init: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_thresh: 0.5,
            low_thresh: 0.1,
            new_track_thresh: 0.6,
            match_thresh: 0.8,
            track_buffer: 30,
            frame_rate: 30.0,
            n_init: 3,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        for (name, value) in [
            ("track_thresh", self.track_thresh),
            ("low_thresh", self.low_thresh),
            ("match_thresh", self.match_thresh),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TrackError::OutOfRange { name, value });
            }
        }
        if self.low_thresh > self.track_thresh {
            return Err(TrackError::InvertedThresholds {
                low: self.low_thresh,
                high: self.track_thresh,
            });
        }
        if !(self.frame_rate > 0.0) {
            return Err(TrackError::InvalidFrameRate(self.frame_rate));
        }
        if self.n_init == 0 {
            return Err(TrackError::ZeroInit);
        }
        Ok(())
    }

    fn max_time_lost(&self) -> u32 {
        (self.frame_rate / 30.0 * self.track_buffer as f32) as u32
    }
}

pub struct BYTETracker {
    tracked_stracks: Vec<STrack>,
    lost_stracks: Vec<STrack>,
    removed_count: usize,
    frame_id: u32,
    next_id: u64,
    config: TrackerConfig,
    max_time_lost: u32,
    kalman_filter: KalmanFilter,
}

impl BYTETracker {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackError> {
        config.validate()?;
        Ok(Self {
            tracked_stracks: Vec::new(),
            lost_stracks: Vec::new(),
            removed_count: 0,
            frame_id: 0,
            next_id: 0,
            max_time_lost: config.max_time_lost(),
            config,
            kalman_filter: KalmanFilter::default(),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Number of frames processed so far.
    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    /// Tracks currently held (tracked, tentative and lost).
    pub fn live_tracks(&self) -> impl Iterator<Item = &STrack> {
        self.tracked_stracks.iter().chain(self.lost_stracks.iter())
    }

    pub fn removed_count(&self) -> usize {
        self.removed_count
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Advance one frame and return every confirmed track still alive.
    ///
    /// Tracked tracks come first. Lost tracks within the buffer follow at
    /// their predicted box, with `state == TrackState::Lost`.
    pub fn update(&mut self, detections: Vec<Detection>) -> Vec<STrack> {
        self.frame_id += 1;
        let n_init = self.config.n_init;

        let mut activated_stracks = Vec::new();
        let mut refind_stracks = Vec::new();
        let mut lost_stracks = Vec::new();
        let mut removed = 0usize;

        // Split detections by score.
        let mut detections_high = Vec::new();
        let mut detections_low = Vec::new();
        for det in &detections {
            if det.score >= self.config.track_thresh {
                detections_high.push(STrack::new(det));
            } else if det.score > self.config.low_thresh {
                detections_low.push(STrack::new(det));
            }
        }

        let (unconfirmed, confirmed): (Vec<_>, Vec<_>) = self
            .tracked_stracks
            .drain(..)
            .partition(|t| !t.is_activated);

        let mut strack_pool = joint_stracks(confirmed, &self.lost_stracks);
        STrack::multi_predict(&mut strack_pool, &self.kalman_filter);

        // First association: confirmed and lost tracks against high-score detections.
        let mut dists = matching::iou_distance(&rects(&strack_pool), &rects(&detections_high));
        matching::fuse_score(&mut dists, &scores(&detections_high));
        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = matching::linear_assignment(&dists, self.config.match_thresh);

        for (itracked, idet) in matches {
            let mut track = strack_pool[itracked].clone();
            let det = &detections_high[idet];
            if track.state == TrackState::Tracked {
                track.update(det, &self.kalman_filter, self.frame_id, n_init);
                activated_stracks.push(track);
            } else {
                track.re_activate(det, &self.kalman_filter, self.frame_id);
                refind_stracks.push(track);
            }
        }

        // Second association: still-tracked leftovers against low-score detections.
        // Lost leftovers keep their predicted state for aging below.
        let (r_tracked_stracks, still_lost): (Vec<STrack>, Vec<STrack>) = unmatched_tracks
            .iter()
            .map(|&idx| strack_pool[idx].clone())
            .partition(|t| t.state == TrackState::Tracked);

        let dists_second = matching::iou_distance(&rects(&r_tracked_stracks), &rects(&detections_low));
        let AssignmentResult {
            matches: matches_second,
            unmatched_tracks: unmatched_second,
            ..
        } = matching::linear_assignment(&dists_second, 0.5);

        for (itracked, idet) in matches_second {
            let mut track = r_tracked_stracks[itracked].clone();
            track.update(&detections_low[idet], &self.kalman_filter, self.frame_id, n_init);
            activated_stracks.push(track);
        }

        for idx in unmatched_second {
            let mut track = r_tracked_stracks[idx].clone();
            track.mark_lost();
            lost_stracks.push(track);
        }

        // Tentative tracks get one chance per frame: match or be dropped.
        let detections_rem: Vec<STrack> = unmatched_detections
            .into_iter()
            .map(|idx| detections_high[idx].clone())
            .collect();

        let mut dist_unconfirmed =
            matching::iou_distance(&rects(&unconfirmed), &rects(&detections_rem));
        matching::fuse_score(&mut dist_unconfirmed, &scores(&detections_rem));
        let AssignmentResult {
            matches: matches_unconfirmed,
            unmatched_tracks: unmatched_unconfirmed,
            unmatched_detections: unmatched_new,
        } = matching::linear_assignment(&dist_unconfirmed, 0.7);

        let mut unconfirmed = unconfirmed;
        for (itracked, idet) in matches_unconfirmed {
            let mut track = unconfirmed[itracked].clone();
            track.update(&detections_rem[idet], &self.kalman_filter, self.frame_id, n_init);
            activated_stracks.push(track);
        }
        for idx in unmatched_unconfirmed {
            unconfirmed[idx].mark_removed();
            removed += 1;
        }

        // New tracks from confident leftovers.
        for idx in unmatched_new {
            let mut track = detections_rem[idx].clone();
            if track.score < self.config.new_track_thresh {
                continue;
            }
            let id = self.allocate_id();
            track.activate(&self.kalman_filter, self.frame_id, id, n_init);
            activated_stracks.push(track);
        }

        // Age out lost tracks.
        for mut track in still_lost {
            if self.frame_id - track.end_frame() > self.max_time_lost {
                track.mark_removed();
                removed += 1;
            } else {
                lost_stracks.push(track);
            }
        }

        self.tracked_stracks = activated_stracks
            .into_iter()
            .chain(refind_stracks)
            .filter(|t| t.state == TrackState::Tracked)
            .collect();

        let lost = sub_stracks(lost_stracks, &self.tracked_stracks);
        let (tracked, lost) = remove_duplicate_stracks(&self.tracked_stracks, &lost);
        self.tracked_stracks = tracked;
        self.lost_stracks = lost;
        self.removed_count += removed;

        tracing::trace!(
            frame = self.frame_id,
            detections = detections.len(),
            tracked = self.tracked_stracks.len(),
            lost = self.lost_stracks.len(),
            "tracker step"
        );

        self.live_tracks()
            .filter(|t| t.is_activated)
            .cloned()
            .collect()
    }
}

fn rects(tracks: &[STrack]) -> Vec<Rect> {
    tracks.iter().map(STrack::rect).collect()
}

fn scores(tracks: &[STrack]) -> Vec<f32> {
    tracks.iter().map(|t| t.score).collect()
}

/// Union by track id, keeping the first occurrence.
pub fn joint_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
    let mut exists: HashSet<u64> = tlista.iter().map(|t| t.track_id).collect();
    let mut res = tlista;
    for t in tlistb {
        if exists.insert(t.track_id) {
            res.push(t.clone());
        }
    }
    res
}

/// Tracks of `tlista` whose id does not appear in `tlistb`.
pub fn sub_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
    let b_ids: HashSet<u64> = tlistb.iter().map(|t| t.track_id).collect();
    tlista
        .into_iter()
        .filter(|t| !b_ids.contains(&t.track_id))
        .collect()
}

/// Resolve tracked/lost pairs covering the same object; the longer-lived one survives.
pub fn remove_duplicate_stracks(
    stracksa: &[STrack],
    stracksb: &[STrack],
) -> (Vec<STrack>, Vec<STrack>) {
    if stracksa.is_empty() || stracksb.is_empty() {
        return (stracksa.to_vec(), stracksb.to_vec());
    }

    let ious = iou_batch(&rects(stracksa), &rects(stracksb));
    let mut dupa = vec![false; stracksa.len()];
    let mut dupb = vec![false; stracksb.len()];

    for ((i, j), &iou) in ious.indexed_iter() {
        if iou > 0.85 {
            let time_a = stracksa[i].frame_id - stracksa[i].start_frame;
            let time_b = stracksb[j].frame_id - stracksb[j].start_frame;
            if time_a > time_b {
                dupb[j] = true;
            } else {
                dupa[i] = true;
            }
        }
    }

    let keep = |tracks: &[STrack], dup: &[bool]| -> Vec<STrack> {
        tracks
            .iter()
            .zip(dup)
            .filter(|(_, d)| !**d)
            .map(|(t, _)| t.clone())
            .collect()
    };

    (keep(stracksa, &dupa), keep(stracksb, &dupb))
}
