//! Drawing detections and tracks onto frames.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect as PixelRect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::integration::classes::UNKNOWN_CLASS;
use crate::tracker::{Detection, Rect, STrack};

const PALETTE_SIZE: usize = 100;
const PALETTE_SEED: u64 = 42;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TRACK_THICKNESS: i32 = 3;
const DETECTION_THICKNESS: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("cannot read font {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid font file {0}")]
    InvalidFont(String),
}

/// Fixed pseudo-random colours so ids and classes keep their colour across runs.
#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<Rgb<u8>>,
}

impl Default for Palette {
    fn default() -> Self {
        let mut rng = StdRng::seed_from_u64(PALETTE_SEED);
        let colors = (0..PALETTE_SIZE)
            .map(|_| {
                Rgb([
                    rng.gen_range(0..255),
                    rng.gen_range(0..255),
                    rng.gen_range(0..255),
                ])
            })
            .collect();
        Self { colors }
    }
}

impl Palette {
    pub fn color(&self, key: u64) -> Rgb<u8> {
        self.colors[(key % PALETTE_SIZE as u64) as usize]
    }
}

/// Draws boxes and labels; text needs a TrueType font, boxes do not.
#[derive(Default)]
pub struct Annotator {
    palette: Palette,
    font: Option<FontVec>,
}

impl Annotator {
    pub fn with_font_file(path: &Path) -> Result<Self, AnnotateError> {
        let bytes = std::fs::read(path).map_err(|source| AnnotateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| AnnotateError::InvalidFont(path.display().to_string()))?;
        Ok(Self {
            palette: Palette::default(),
            font: Some(font),
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Copy of `frame` with every confirmed track boxed and labelled `ID:<id> <class>`.
    pub fn draw_tracks(&self, frame: &RgbImage, tracks: &[STrack]) -> RgbImage {
        let mut canvas = frame.clone();
        for track in tracks.iter().filter(|t| t.is_confirmed()) {
            let color = self.palette.color(track.track_id);
            let class: &str = if track.class_name.is_empty() {
                UNKNOWN_CLASS
            } else {
                &track.class_name
            };
            let label = format!("ID:{} {}", track.track_id, class);
            self.draw_box(&mut canvas, &track.rect(), color, TRACK_THICKNESS);
            self.draw_label(&mut canvas, &track.rect(), &label, color, 20.0);
        }
        canvas
    }

    /// Copy of `frame` with every detection boxed and labelled `<class>: <confidence>`.
    pub fn draw_detections(&self, frame: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = frame.clone();
        for det in detections {
            let color = self.palette.color(det.class_id as u64);
            let label = format!("{}: {:.2}", det.class_name, det.score);
            self.draw_box(&mut canvas, &det.bbox, color, DETECTION_THICKNESS);
            self.draw_label(&mut canvas, &det.bbox, &label, color, 18.0);
        }
        canvas
    }

    fn draw_box(&self, canvas: &mut RgbImage, bbox: &Rect, color: Rgb<u8>, thickness: i32) {
        let [x1, y1, x2, y2] = bbox.to_ltrb_pixels();
        for inset in 0..thickness {
            let w = x2 - x1 - 2 * inset;
            let h = y2 - y1 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = PixelRect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, bbox: &Rect, label: &str, color: Rgb<u8>, px: f32) {
        let scale = PxScale::from(px);
        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(scale, font, label),
            None => ((label.len() as f32 * px * 0.5) as u32, (px * 0.7) as u32),
        };
        if text_w == 0 || text_h == 0 {
            return;
        }

        let [x1, y1, _, _] = bbox.to_ltrb_pixels();
        let top = y1 - text_h as i32 - 10;
        let strip = PixelRect::at(x1, top).of_size(text_w, text_h + 10);
        draw_filled_rect_mut(canvas, strip, color);

        if let Some(font) = &self.font {
            draw_text_mut(canvas, TEXT_COLOR, x1, top + 5, scale, font, label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{KalmanFilter, TrackState};

    fn confirmed_track(id: u64) -> STrack {
        let det = Detection::new(20.0, 40.0, 60.0, 90.0, 0.9, 0, "person");
        let mut track = STrack::new(&det);
        track.activate(&KalmanFilter::new(), 1, id, 1);
        track
    }

    #[test]
    fn test_palette_is_deterministic() {
        let a = Palette::default();
        let b = Palette::default();
        assert_eq!(a.color(7), b.color(7));
        assert_eq!(a.color(3), a.color(103));
    }

    #[test]
    fn test_draw_tracks_marks_box_edges() {
        let annotator = Annotator::default();
        let frame = RgbImage::new(120, 120);
        let track = confirmed_track(5);
        let [x1, y1, _, _] = track.rect().to_ltrb_pixels();
        let out = annotator.draw_tracks(&frame, &[track]);

        let color = annotator.palette().color(5);
        assert_eq!(*out.get_pixel(x1 as u32, (y1 + 10) as u32), color);
        // Label strip sits above the box.
        assert_eq!(*out.get_pixel(x1 as u32 + 1, (y1 - 3) as u32), color);
        // Source frame untouched.
        assert_eq!(*frame.get_pixel(x1 as u32, (y1 + 10) as u32), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_unconfirmed_tracks_not_drawn() {
        let annotator = Annotator::default();
        let frame = RgbImage::new(120, 120);
        let mut track = confirmed_track(1);
        track.is_activated = false;
        track.state = TrackState::Tracked;
        assert_eq!(annotator.draw_tracks(&frame, &[track]), frame);
    }

    #[test]
    fn test_draw_detections_clips_offscreen_boxes() {
        let annotator = Annotator::default();
        let frame = RgbImage::new(50, 50);
        let det = Detection::new(-20.0, -20.0, 200.0, 10.0, 0.7, 2, "car");
        let out = annotator.draw_detections(&frame, &[det]);
        assert_eq!(out.dimensions(), (50, 50));
    }

    #[test]
    fn test_detection_box_is_two_pixels_in_class_colour() {
        let annotator = Annotator::default();
        let frame = RgbImage::new(120, 120);
        let det = Detection::new(30.0, 40.0, 90.0, 100.0, 0.8, 102, "car");
        let out = annotator.draw_detections(&frame, &[det]);

        // Class ids wrap around the palette.
        let color = annotator.palette().color(2);
        assert_ne!(color, Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(30, 70), color);
        assert_eq!(*out.get_pixel(31, 70), color);
        assert_eq!(*out.get_pixel(32, 70), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(89, 70), color);
        assert_eq!(*out.get_pixel(88, 70), color);
        assert_eq!(*out.get_pixel(87, 70), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_missing_font_file() {
        let err = Annotator::with_font_file(Path::new("/nonexistent/font.ttf"));
        assert!(matches!(err, Err(AnnotateError::Read { .. })));
    }
}
