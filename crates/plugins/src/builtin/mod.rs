//! Plugins shipped with Traymind.

pub mod demo;
pub mod screen_capture;

pub use demo::DemoPlugin;
pub use screen_capture::{CaptureError, ScreenCapturePlugin, ScreenGrabber, UnavailableGrabber};
