use serde::{Deserialize, Serialize};

/// A point in page (document) coordinates, as reported by a context-menu event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentPoint {
    pub x: f64,
    pub y: f64,
}

impl ContentPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Translate into viewport coordinates given the current scroll offset.
    pub fn to_viewport(self, scroll_x: f64, scroll_y: f64) -> ContentPoint {
        ContentPoint {
            x: self.x - scroll_x,
            y: self.y - scroll_y,
        }
    }
}

/// Axis-aligned box in viewport coordinates (`getBoundingClientRect` shape).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Inclusive of the top/left edges, exclusive of the bottom/right edges.
    pub fn contains(&self, point: ContentPoint) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && point.x < self.x + self.width
            && point.y < self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_translation_subtracts_scroll() {
        let point = ContentPoint::new(120.0, 900.0).to_viewport(20.0, 800.0);
        assert_eq!(point, ContentPoint::new(100.0, 100.0));
    }

    #[test]
    fn rect_edges() {
        let rect = Rect::new(10.0, 10.0, 100.0, 50.0);
        assert!(rect.contains(ContentPoint::new(10.0, 10.0)));
        assert!(rect.contains(ContentPoint::new(109.9, 59.9)));
        assert!(!rect.contains(ContentPoint::new(110.0, 30.0)));
        assert!(!ContentPoint::new(f64::NAN, 1.0).is_finite());
    }
}
