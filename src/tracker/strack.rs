//! Single object track (STrack).

use ndarray::{Array1, Array2};

use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

#[derive(Debug, Clone)]
pub struct STrack {
    /// Identifier stable for the life of the track; 0 until activated.
    pub track_id: u64,
    pub state: TrackState,
    /// Set once the track has collected `n_init` hits.
    pub is_activated: bool,
    pub score: f32,
    /// Class of the most recently associated detection.
    pub class_id: usize,
    pub class_name: String,
    /// Number of detections associated so far.
    pub hits: u32,
    /// Last frame this track was matched.
    pub frame_id: u32,
    pub start_frame: u32,
    pub tracklet_len: u32,
    pub mean: Option<Array1<f64>>,
    pub covariance: Option<Array2<f64>>,
    /// Box of the detection that created or last refreshed the track.
    pub tlwh: Rect,
}

impl STrack {
    pub fn new(detection: &Detection) -> Self {
        Self {
            track_id: 0,
            state: TrackState::New,
            is_activated: false,
            score: detection.score,
            class_id: detection.class_id,
            class_name: detection.class_name.clone(),
            hits: 0,
            frame_id: 0,
            start_frame: 0,
            tracklet_len: 0,
            mean: None,
            covariance: None,
            tlwh: detection.bbox,
        }
    }

    /// Current box: the Kalman estimate when available, else the detection box.
    pub fn rect(&self) -> Rect {
        match &self.mean {
            Some(mean) => {
                Rect::from_xyah(mean[0] as f32, mean[1] as f32, mean[2] as f32, mean[3] as f32)
            }
            None => self.tlwh,
        }
    }

    pub fn end_frame(&self) -> u32 {
        self.frame_id
    }

    pub fn is_confirmed(&self) -> bool {
        self.is_activated
    }

    /// Start the Kalman filter and give the track its identifier.
    pub fn activate(&mut self, kalman_filter: &KalmanFilter, frame_id: u32, track_id: u64, n_init: u32) {
        self.track_id = track_id;

        let (mean, covariance) = kalman_filter.initiate(self.tlwh.to_xyah());
        self.mean = Some(mean);
        self.covariance = Some(covariance);

        self.hits = 1;
        self.tracklet_len = 0;
        self.state = TrackState::Tracked;
        self.is_activated = self.hits >= n_init;
        self.frame_id = frame_id;
        self.start_frame = frame_id;
    }

    /// Resume a lost track. Lost tracks were confirmed before, so they stay confirmed.
    pub fn re_activate(&mut self, detection: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
        self.correct(detection, kalman_filter);
        self.hits += 1;
        self.tracklet_len = 0;
        self.state = TrackState::Tracked;
        self.is_activated = true;
        self.frame_id = frame_id;
    }

    /// Associate the detection of the current frame with this track.
    pub fn update(&mut self, detection: &STrack, kalman_filter: &KalmanFilter, frame_id: u32, n_init: u32) {
        self.correct(detection, kalman_filter);
        self.hits += 1;
        self.tracklet_len += 1;
        self.frame_id = frame_id;
        self.state = TrackState::Tracked;
        if self.hits >= n_init {
            self.is_activated = true;
        }
    }

    fn correct(&mut self, detection: &STrack, kalman_filter: &KalmanFilter) {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            match kalman_filter.update(mean, cov, detection.tlwh.to_xyah()) {
                Some((mean, cov)) => {
                    self.mean = Some(mean);
                    self.covariance = Some(cov);
                }
                None => tracing::debug!(track_id = self.track_id, "singular innovation, keeping prediction"),
            }
        }
        self.tlwh = detection.tlwh;
        self.score = detection.score;
        self.class_id = detection.class_id;
        self.class_name.clone_from(&detection.class_name);
    }

    pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            let mut mean = mean.clone();
            if self.state != TrackState::Tracked {
                // Freeze height velocity while the object is not observed.
                mean[7] = 0.0;
            }
            let (mean, cov) = kalman_filter.predict(&mean, cov);
            self.mean = Some(mean);
            self.covariance = Some(cov);
        }
    }

    pub fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }

    pub fn mark_removed(&mut self) {
        self.state = TrackState::Removed;
    }

    pub fn multi_predict(stracks: &mut [STrack], kalman_filter: &KalmanFilter) {
        for strack in stracks.iter_mut() {
            strack.predict(kalman_filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, class_name: &str) -> STrack {
        STrack::new(&Detection::new(x, 0.0, x + 20.0, 40.0, 0.9, 2, class_name))
    }

    #[test]
    fn test_confirmation_needs_n_init_hits() {
        let kf = KalmanFilter::new();
        let mut track = det(0.0, "car");
        track.activate(&kf, 1, 7, 3);
        assert_eq!(track.track_id, 7);
        assert!(!track.is_confirmed());

        track.update(&det(1.0, "car"), &kf, 2, 3);
        assert!(!track.is_confirmed());
        track.update(&det(2.0, "car"), &kf, 3, 3);
        assert!(track.is_confirmed());
        assert_eq!(track.hits, 3);
    }

    #[test]
    fn test_single_hit_confirms_when_n_init_is_one() {
        let kf = KalmanFilter::new();
        let mut track = det(0.0, "car");
        track.activate(&kf, 5, 1, 1);
        assert!(track.is_confirmed());
        assert!(track.state.is_alive());
    }

    #[test]
    fn test_flat_box_keeps_predicted_state() {
        let kf = KalmanFilter::new();
        let flat = |x: f32| STrack::new(&Detection::new(x, 10.0, x + 20.0, 10.0, 0.9, 2, "car"));
        let mut track = flat(0.0);
        track.activate(&kf, 1, 1, 1);
        track.predict(&kf);
        let predicted = track.mean.clone().unwrap();

        // Zero height leaves the innovation covariance singular.
        track.update(&flat(5.0), &kf, 2, 1);
        assert_eq!(track.mean.as_ref().unwrap(), &predicted);
        assert!(predicted.iter().all(|v| v.is_finite()));
        assert_eq!(track.tlwh.x, 5.0);
        assert_eq!(track.hits, 2);
        assert_eq!(track.frame_id, 2);
    }

    #[test]
    fn test_class_follows_latest_detection() {
        let kf = KalmanFilter::new();
        let mut track = det(0.0, "car");
        track.activate(&kf, 1, 1, 1);
        track.update(&det(1.0, "truck"), &kf, 2, 1);
        assert_eq!(track.class_name, "truck");
    }
}
