//! Builder for creating Detection objects from various box layouts.

use crate::integration::classes::class_name;
use crate::tracker::{Detection, Rect};

/// Builder for `Detection`, normalising every box layout to LTRB.
///
/// When no class name is given the COCO name for the class id is used.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    bbox: Rect,
    score: f32,
    class_id: usize,
    class_name: Option<String>,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Corner coordinates (x1, y1, x2, y2).
    pub fn ltrb(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox = Rect::from_ltrb(x1, y1, x2, y2);
        self
    }

    /// Center and size, the layout YOLO heads emit.
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(cx - w / 2.0, cy - h / 2.0, w, h);
        self
    }

    /// Left, top, width, height.
    pub fn tlwh(mut self, left: f32, top: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(left, top, w, h);
        self
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn class_id(mut self, class_id: usize) -> Self {
        self.class_id = class_id;
        self
    }

    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }

    pub fn build(self) -> Detection {
        let name = self
            .class_name
            .unwrap_or_else(|| class_name(self.class_id).to_string());
        Detection::from_rect(self.bbox, self.score, self.class_id, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_coco_name() {
        let det = DetectionBuilder::new()
            .ltrb(10.0, 20.0, 50.0, 80.0)
            .score(0.95)
            .class_id(0)
            .build();
        assert_eq!(det.score, 0.95);
        assert_eq!(det.class_name, "person");
        assert_eq!(det.bbox.to_ltrb(), [10.0, 20.0, 50.0, 80.0]);
    }

    #[test]
    fn test_builder_layouts_agree() {
        let a = DetectionBuilder::new().xywh(30.0, 50.0, 40.0, 60.0).build();
        let b = DetectionBuilder::new().tlwh(10.0, 20.0, 40.0, 60.0).build();
        assert_eq!(a.bbox, b.bbox);
    }

    #[test]
    fn test_explicit_class_name_wins() {
        let det = DetectionBuilder::new().class_id(2).class_name("vehicle").build();
        assert_eq!(det.class_name, "vehicle");
    }
}
