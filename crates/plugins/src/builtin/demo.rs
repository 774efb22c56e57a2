//! Demo plugin. Answers `DEMO_EVENT.GREET` to show the plugin and event
//! systems working together.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use traymind_core::error::{ListenerError, PluginError};
use traymind_core::event::{Listener, Payload, topics};
use traymind_core::plugin::{Plugin, PluginContext, PluginMetadata};

pub const PLUGIN_ID: &str = "demo";

pub struct DemoPlugin {
    metadata: PluginMetadata,
    ctx: PluginContext,
}

impl DemoPlugin {
    pub fn metadata() -> PluginMetadata {
        PluginMetadata::new(PLUGIN_ID)
            .with_version("1.0.0")
            .with_description("Demonstrates the plugin and event systems.")
            .eager()
    }

    pub fn new(ctx: &PluginContext) -> Self {
        info!("Demo plugin instance created");
        Self {
            metadata: Self::metadata(),
            ctx: ctx.clone(),
        }
    }
}

#[async_trait]
impl Plugin for DemoPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn initialize(&self) -> Result<(), PluginError> {
        let events = Arc::clone(&self.ctx.events);
        self.ctx.subscribe(
            topics::DEMO_GREET,
            Listener::asynchronous(move |event| {
                let events = Arc::clone(&events);
                async move {
                    let name = event
                        .payload
                        .str("name")
                        .or_else(|| event.payload.args.first().and_then(|v| v.as_str()))
                        .ok_or_else(|| ListenerError::new("greeting without a name"))?;
                    info!(name = %name, "Greeting received! Hello, {name}!");
                    events.publish(
                        topics::DEMO_GREETING_SENT,
                        Payload::new().kwarg("plugin", PLUGIN_ID),
                    );
                    Ok::<_, ListenerError>(())
                }
            }),
        );
        info!("Demo plugin initialized and subscribed to greetings");
        Ok(())
    }

    async fn start(&self) -> Result<(), PluginError> {
        info!("Demo plugin started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), PluginError> {
        info!("Demo plugin stopped");
        Ok(())
    }
}
