//! Plugin management for Traymind.
//!
//! Plugins extend the assistant by listening and publishing on the event
//! bus. They are listed at compile time in a [`PluginCatalog`], discovered
//! by reading their metadata, and loaded lazily or eagerly by the
//! [`PluginManager`].

pub mod builtin;
pub mod catalog;
pub mod manager;
pub mod tracker;

pub use catalog::{PluginCatalog, StaticFactory};
pub use manager::{LoadSummary, PluginEntry, PluginManager};
pub use tracker::MemoryTracker;

use builtin::{DemoPlugin, ScreenCapturePlugin};

/// The catalog of built-in plugins.
pub fn builtin_catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with(StaticFactory::new(
            DemoPlugin::metadata(),
            concat!(module_path!(), "::builtin::demo"),
            |ctx| Ok(DemoPlugin::new(ctx)),
        ))
        .with(StaticFactory::new(
            ScreenCapturePlugin::metadata(),
            concat!(module_path!(), "::builtin::screen_capture"),
            ScreenCapturePlugin::new,
        ))
}
