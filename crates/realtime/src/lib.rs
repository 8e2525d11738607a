//! The realtime plane: hybrid driver/simulation ownership, driver session
//! state, safety validation, the three WebSocket namespaces, notification
//! rules and the memory monitor.

pub mod auth;
pub mod channel;
pub mod driver_state;
pub mod events;
pub mod hybrid;
pub mod monitor;
pub mod notify;
pub mod safety;

pub use auth::{AuthContext, Authenticator, Role};
pub use channel::{routes, Hub, RealtimeState};
pub use driver_state::{DriverStateService, IDLE_CHECK_INTERVAL_SECS};
pub use events::ServerEvent;
pub use hybrid::{HybridManager, RegisterError, GRACE_PERIOD};
pub use monitor::{MemoryMonitor, MONITOR_INTERVAL_SECS};
pub use notify::{LogPushSink, Notifier, PushSink};
pub use safety::{LocationUpdate, SafetyValidator};
