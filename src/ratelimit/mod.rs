//! Flood detection logic and configuration state.

mod counter;
mod limiter;
mod manager;
mod rules;

pub use counter::ClientWindow;
pub use limiter::{now_ms, FloodDetector, RouteRule, Snapshot, Verdict};
pub use manager::{EventOrigin, SettingsBus, SettingsEvent, SettingsManager};
pub use rules::{RouteConfig, Settings, NON_API_PATTERN};
pub(crate) use rules::parse_int;
