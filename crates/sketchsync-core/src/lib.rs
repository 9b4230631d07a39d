//! SketchSync Core Library
//!
//! Real-time synchronization engine for shared whiteboards: connection
//! lifecycle, room membership, scene reconciliation in both directions,
//! remote cursors and chat typing indicators.

pub mod canvas;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod guard;
pub mod inbound;
pub mod outbound;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod scene;
pub mod session;
pub mod transport;
pub mod typing;
pub mod viewport;

#[cfg(test)]
mod test_helpers;

pub use canvas::{CanvasSurface, MemoryCanvas, SceneChange};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ReconnectPolicy, SyncConfig};
pub use connection::{ConnectionManager, ConnectionState, Delivery};
pub use error::{SyncError, SyncResult};
pub use protocol::{ClientMessage, PointerPosition, ServerMessage, UserInfo};
pub use scene::{DrawingElement, Fingerprint, Origin, SceneSnapshot, ViewState};
pub use session::{SessionEvent, SyncSession};
pub use transport::{PlatformWebSocket, Transport, TransportEvent};
pub use viewport::Viewport;
