//! Keyboard RepeatKit - key hold tracking and calibrated auto-repeat
//!
//! Tracks which keys are held, runs one repeat chain per held key at a
//! configurable cadence, injects synthetic key events, and measures the
//! platform's native repeat interval.
//!
//! ```
//! use keyboard_repeatkit::keyboard::{KeyCode, SignalBus};
//! use keyboard_repeatkit::InputSession;
//!
//! let bus = SignalBus::new();
//! let session = InputSession::default();
//! session.attach(&bus);
//! session.intercept(KeyCode(30));
//! session.inject_press(KeyCode(30));
//! assert!(session.is_held(KeyCode(30)));
//! ```

pub mod calibrate;
pub mod config;
pub mod dispatch;
pub mod keyboard;
pub mod report;
pub mod session;
pub mod utils;

pub use calibrate::{measure_repeat_interval, Calibration, CalibrationError, RepeatCalibrator};
pub use config::Config;
pub use dispatch::{DispatchStats, UnbindPolicy};
pub use report::CalibrationReport;
pub use session::{InputSession, DEFAULT_REPEAT_INTERVAL};
