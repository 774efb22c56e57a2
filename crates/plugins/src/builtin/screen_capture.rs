//! Screen capture plugin.
//!
//! On `PLUGIN_EVENT.SCREEN_CAPTURE` it grabs the screen through a
//! [`ScreenGrabber`], base64-encodes the image and publishes it as
//! `PLUGIN_EVENT.SCREEN_CAPTURED` for the agent, then asks the front end to
//! open the chat. Failures become a `NOTIFICATION_EVENT.ERROR`.
//!
//! The image type is read from the leading bytes (PNG or JPEG) and sent as
//! `mime_type`; anything else is labelled as PNG.
//!
//! The grabber is looked up in the service locator under
//! [`SCREEN_GRABBER_SERVICE`] as an `Arc<dyn ScreenGrabber>`. Without one,
//! captures report that no capture backend is available.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{error, info, warn};
use traymind_core::error::{ListenerError, PluginError, ServiceError};
use traymind_core::event::{EventDispatcher, Listener, Payload, topics};
use traymind_core::message::DEFAULT_IMAGE_MIME;
use traymind_core::plugin::{Plugin, PluginContext, PluginMetadata};

pub const PLUGIN_ID: &str = "screen_capture";

/// Service name under which a grabber can be registered.
pub const SCREEN_GRABBER_SERVICE: &str = "screen_grabber";

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Screen capture unavailable: {0}")]
    Unavailable(String),

    #[error("Screen capture failed: {0}")]
    Failed(String),
}

/// Produces an encoded screenshot (PNG or JPEG bytes).
///
/// Called on a blocking thread.
pub trait ScreenGrabber: Send + Sync {
    fn grab(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Grabber used when no platform backend is registered.
#[derive(Debug, Default)]
pub struct UnavailableGrabber;

impl ScreenGrabber for UnavailableGrabber {
    fn grab(&self) -> Result<Vec<u8>, CaptureError> {
        Err(CaptureError::Unavailable(
            "no screen capture backend is registered".into(),
        ))
    }
}

/// Identify PNG or JPEG data from its magic bytes.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
    if bytes.starts_with(PNG) {
        Some("image/png")
    } else if bytes.starts_with(JPEG) {
        Some("image/jpeg")
    } else {
        None
    }
}

struct EncodedImage {
    data: String,
    mime_type: &'static str,
}

pub struct ScreenCapturePlugin {
    metadata: PluginMetadata,
    ctx: PluginContext,
    grabber: Arc<dyn ScreenGrabber>,
}

impl ScreenCapturePlugin {
    pub fn metadata() -> PluginMetadata {
        PluginMetadata::new(PLUGIN_ID)
            .with_version("1.0.0")
            .with_description("Captures the screen on command.")
    }

    /// Build from the plugin context, resolving the grabber if one is registered.
    pub fn new(ctx: &PluginContext) -> Result<Self, PluginError> {
        let grabber = match ctx.services.resolve::<Arc<dyn ScreenGrabber>>(SCREEN_GRABBER_SERVICE) {
            Ok(grabber) => Arc::clone(grabber.as_ref()),
            Err(ServiceError::NotFound(_)) => {
                warn!("No screen grabber registered, captures will be unavailable");
                Arc::new(UnavailableGrabber) as Arc<dyn ScreenGrabber>
            }
            Err(e) => {
                return Err(PluginError::Load {
                    plugin_id: PLUGIN_ID.into(),
                    reason: e.to_string(),
                });
            }
        };
        Ok(Self::with_grabber(ctx, grabber))
    }

    pub fn with_grabber(ctx: &PluginContext, grabber: Arc<dyn ScreenGrabber>) -> Self {
        Self {
            metadata: Self::metadata(),
            ctx: ctx.clone(),
            grabber,
        }
    }

    /// Grab, encode and publish one screenshot.
    pub async fn capture(&self) {
        capture_and_publish(&self.ctx.events, Arc::clone(&self.grabber)).await;
    }
}

async fn capture_and_publish(events: &EventDispatcher, grabber: Arc<dyn ScreenGrabber>) {
    info!("Screen capture request received");
    match capture_base64(grabber).await {
        Ok(image) => {
            info!(base64_len = image.data.len(), mime_type = image.mime_type, "Screen captured and encoded");
            events.publish(
                topics::SCREEN_CAPTURED,
                Payload::new()
                    .kwarg("image_data", image.data)
                    .kwarg("format", "base64")
                    .kwarg("mime_type", image.mime_type),
            );
            events.publish(topics::OPEN_CHAT, Payload::new());
        }
        Err(e) => {
            error!(error = %e, "Failed to capture screen");
            events.publish(
                topics::NOTIFY_ERROR,
                Payload::new()
                    .kwarg("title", "Capture Failed")
                    .kwarg("message", e.to_string()),
            );
        }
    }
}

async fn capture_base64(grabber: Arc<dyn ScreenGrabber>) -> Result<EncodedImage, CaptureError> {
    let bytes = tokio::task::spawn_blocking(move || grabber.grab())
        .await
        .map_err(|e| CaptureError::Failed(e.to_string()))??;
    if bytes.is_empty() {
        return Err(CaptureError::Failed("grabber returned an empty image".into()));
    }
    let mime_type = sniff_image_mime(&bytes).unwrap_or_else(|| {
        warn!("Unrecognised image signature, labelling capture as {DEFAULT_IMAGE_MIME}");
        DEFAULT_IMAGE_MIME
    });
    Ok(EncodedImage {
        data: STANDARD.encode(bytes),
        mime_type,
    })
}

#[async_trait]
impl Plugin for ScreenCapturePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn initialize(&self) -> Result<(), PluginError> {
        let events = Arc::clone(&self.ctx.events);
        let grabber = Arc::clone(&self.grabber);
        self.ctx.subscribe(
            topics::SCREEN_CAPTURE,
            Listener::asynchronous(move |_| {
                let events = Arc::clone(&events);
                let grabber = Arc::clone(&grabber);
                async move {
                    capture_and_publish(&events, grabber).await;
                    Ok::<_, ListenerError>(())
                }
            }),
        );
        info!("Screen capture plugin initialized");
        Ok(())
    }
}
