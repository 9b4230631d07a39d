//! The drawing surface seen by the engine.

use serde_json::{Map, Value};

use crate::scene::{DrawingElement, ViewState};

/// A "scene changed" notification from the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneChange {
    pub elements: Vec<DrawingElement>,
    /// Full raw view state, including fields that are never replicated.
    pub view_state: Value,
}

/// Operations the engine needs from a drawing canvas.
///
/// The canvas reports every edit (local or caused by `replace_scene`) through
/// `take_changes`; telling the two apart is the engine's job.
pub trait CanvasSurface {
    fn elements(&self) -> Vec<DrawingElement>;

    /// Raw view state as the canvas keeps it.
    fn view_state(&self) -> Value;

    /// Replace the whole scene.
    fn replace_scene(&mut self, elements: &[DrawingElement], view_state: &ViewState);

    /// Drain pending change notifications, oldest first.
    fn take_changes(&mut self) -> Vec<SceneChange>;
}

/// In-memory canvas for headless clients and tests.
#[derive(Debug, Clone)]
pub struct MemoryCanvas {
    elements: Vec<DrawingElement>,
    view_state: Map<String, Value>,
    changes: Vec<SceneChange>,
    replacements: usize,
}

impl Default for MemoryCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCanvas {
    pub fn new() -> Self {
        let mut view_state = Map::new();
        view_state.insert("scrollX".into(), Value::from(0.0));
        view_state.insert("scrollY".into(), Value::from(0.0));
        view_state.insert("zoom".into(), serde_json::json!({ "value": 1.0 }));
        Self {
            elements: Vec::new(),
            view_state,
            changes: Vec::new(),
            replacements: 0,
        }
    }

    /// Simulate a local edit replacing the element list.
    pub fn edit(&mut self, elements: Vec<DrawingElement>) {
        self.elements = elements;
        self.notify();
    }

    /// Set a raw view-state field (pan, zoom, local UI state...).
    pub fn set_view_field(&mut self, key: &str, value: Value) {
        self.view_state.insert(key.to_string(), value);
        self.notify();
    }

    /// Remote scenes written into this canvas so far.
    pub fn replacements(&self) -> usize {
        self.replacements
    }

    fn notify(&mut self) {
        self.changes.push(SceneChange {
            elements: self.elements.clone(),
            view_state: Value::Object(self.view_state.clone()),
        });
    }
}

impl CanvasSurface for MemoryCanvas {
    fn elements(&self) -> Vec<DrawingElement> {
        self.elements.clone()
    }

    fn view_state(&self) -> Value {
        Value::Object(self.view_state.clone())
    }

    fn replace_scene(&mut self, elements: &[DrawingElement], view_state: &ViewState) {
        self.elements = elements.to_vec();
        // Replicated fields overwrite, local-only fields survive
        if let Ok(Value::Object(fields)) = serde_json::to_value(view_state) {
            self.view_state.extend(fields);
        }
        self.replacements += 1;
        self.notify();
    }

    fn take_changes(&mut self) -> Vec<SceneChange> {
        std::mem::take(&mut self.changes)
    }
}
