//! Viewport transform for converting pointer positions.
//!
//! Pointers travel in logical (scene) coordinates so that every viewer can
//! place them with its own pan and zoom.

use crate::protocol::PointerPosition;
use crate::scene::ViewState;
use kurbo::{Affine, Point, Vec2};

/// Pan offset and zoom factor of one viewer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Scroll offset in scene units.
    pub scroll: Vec2,
    /// Zoom factor (1.0 = 100%).
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scroll: Vec2::ZERO,
            zoom: 1.0,
        }
    }
}

impl Viewport {
    pub fn new(scroll: Vec2, zoom: f64) -> Self {
        let zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
        Self { scroll, zoom }
    }

    /// Scene-to-screen transform: `screen = (scene + scroll) * zoom`.
    pub fn transform(&self) -> Affine {
        Affine::scale(self.zoom) * Affine::translate(self.scroll)
    }

    /// Screen-to-scene transform.
    pub fn inverse_transform(&self) -> Affine {
        Affine::translate(-self.scroll) * Affine::scale(1.0 / self.zoom)
    }

    pub fn screen_to_scene(&self, screen_point: Point) -> Point {
        self.inverse_transform() * screen_point
    }

    pub fn scene_to_screen(&self, scene_point: Point) -> Point {
        self.transform() * scene_point
    }

    /// Convert a screen-space pointer to its wire representation.
    pub fn pointer_from_screen(&self, screen_point: Point) -> PointerPosition {
        let p = self.screen_to_scene(screen_point);
        PointerPosition { x: p.x, y: p.y }
    }
}

impl From<&ViewState> for Viewport {
    fn from(view: &ViewState) -> Self {
        Self::new(Vec2::new(view.scroll_x, view.scroll_y), view.zoom)
    }
}
