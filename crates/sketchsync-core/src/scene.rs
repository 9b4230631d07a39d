//! Scene snapshots: the unit of replication.
//!
//! The engine never interprets element geometry. A [`DrawingElement`] is an
//! opaque JSON object of which only `id`, `version` and `isDeleted` are read.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// View-state fields that are replicated. Everything else the canvas keeps in
/// its view state (selection, open menus, collaborator registry, ...) stays local.
pub const VIEW_STATE_FIELDS: &[&str] = &[
    "viewBackgroundColor",
    "currentItemStrokeColor",
    "currentItemBackgroundColor",
    "currentItemFillStyle",
    "currentItemStrokeWidth",
    "currentItemRoughness",
    "currentItemOpacity",
    "currentItemFontSize",
    "scrollX",
    "scrollY",
    "zoom",
];

/// One drawable element, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrawingElement(Value);

impl DrawingElement {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Element identity, if the payload carries one.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Version marker; 0 when absent.
    pub fn version(&self) -> u64 {
        self.0.get("version").and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn is_deleted(&self) -> bool {
        self.0
            .get("isDeleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for DrawingElement {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// The replicated subset of the canvas view state.
///
/// Deserializing goes through [`ViewState::from_raw`], so a null or partly
/// mistyped payload still yields a usable view state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_stroke_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_fill_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_stroke_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_roughness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_font_size: Option<f64>,
    /// Pan offset.
    pub scroll_x: f64,
    pub scroll_y: f64,
    /// Zoom factor. Accepts both `1.5` and `{"value": 1.5}` on input.
    #[serde(serialize_with = "serialize_zoom")]
    pub zoom: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            view_background_color: None,
            current_item_stroke_color: None,
            current_item_background_color: None,
            current_item_fill_style: None,
            current_item_stroke_width: None,
            current_item_roughness: None,
            current_item_opacity: None,
            current_item_font_size: None,
            scroll_x: 0.0,
            scroll_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl ViewState {
    /// Project a raw canvas view state onto the replicated allow-list.
    ///
    /// Each field is read on its own: a missing or mistyped field keeps its
    /// default and the rest are still taken.
    pub fn from_raw(raw: &Value) -> Self {
        let mut view = Self::default();
        let Some(object) = raw.as_object() else {
            if !raw.is_null() {
                log::warn!("Malformed view state, using defaults");
            }
            return view;
        };

        let text = |key: &str| field(object, key, |v| v.as_str().map(str::to_owned));
        let number = |key: &str| field(object, key, finite);

        view.view_background_color = text("viewBackgroundColor");
        view.current_item_stroke_color = text("currentItemStrokeColor");
        view.current_item_background_color = text("currentItemBackgroundColor");
        view.current_item_fill_style = text("currentItemFillStyle");
        view.current_item_stroke_width = number("currentItemStrokeWidth");
        view.current_item_roughness = number("currentItemRoughness");
        view.current_item_opacity = number("currentItemOpacity");
        view.current_item_font_size = number("currentItemFontSize");
        if let Some(x) = number("scrollX") {
            view.scroll_x = x;
        }
        if let Some(y) = number("scrollY") {
            view.scroll_y = y;
        }
        if let Some(zoom) = field(object, "zoom", zoom_value) {
            view.zoom = zoom;
        }
        view
    }
}

impl<'de> Deserialize<'de> for ViewState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(|raw| Self::from_raw(&raw))
    }
}

/// Read `key` with `parse`, warning when it is present but unusable.
fn field<T>(object: &Map<String, Value>, key: &str, parse: impl Fn(&Value) -> Option<T>) -> Option<T> {
    let value = object.get(key)?;
    let parsed = parse(value);
    if parsed.is_none() && !value.is_null() {
        log::warn!("Malformed view state field {}, using default", key);
    }
    parsed
}

fn finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

/// Zoom as `1.5` or `{"value": 1.5}`; must be positive.
fn zoom_value(value: &Value) -> Option<f64> {
    finite(value)
        .or_else(|| value.get("value").and_then(finite))
        .filter(|zoom| *zoom > 0.0)
}

fn serialize_zoom<S: Serializer>(zoom: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Wrapped {
        value: f64,
    }
    Wrapped { value: *zoom }.serialize(serializer)
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Produced by a local edit.
    Local,
    /// Authoritative room state sent by the server.
    RoomState { initial_load: bool },
    /// Broadcast of a peer's edit.
    Peer,
}

/// A complete scene at one instant. Always replaces the previous one whole.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSnapshot {
    pub elements: Vec<DrawingElement>,
    pub view_state: ViewState,
    pub timestamp: u64,
    pub origin: Origin,
}

impl SceneSnapshot {
    pub fn fingerprint(&self, prefix_len: usize) -> Fingerprint {
        Fingerprint::of(&self.elements, prefix_len)
    }
}

/// Cheap partial summary of an element sequence used to skip no-op sends.
///
/// Element count, the sum of all versions, and the identity/version of the
/// first `prefix_len` elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    count: usize,
    version_sum: u64,
    prefix: Vec<(Option<String>, u64)>,
}

impl Fingerprint {
    pub fn of(elements: &[DrawingElement], prefix_len: usize) -> Self {
        Self {
            count: elements.len(),
            version_sum: elements
                .iter()
                .fold(0u64, |acc, e| acc.wrapping_add(e.version())),
            prefix: elements
                .iter()
                .take(prefix_len)
                .map(|e| (e.id().map(str::to_owned), e.version()))
                .collect(),
        }
    }
}

#[cfg(test)]
pub(crate) fn element(id: &str, version: u64) -> DrawingElement {
    DrawingElement::new(serde_json::json!({
        "id": id,
        "version": version,
        "type": "rectangle",
        "x": 10.0,
        "y": 20.0,
        "isDeleted": false,
    }))
}
