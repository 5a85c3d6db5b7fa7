//! Plugins: named, prioritized hooks that observe or short-circuit a frame
//! as it leaves or arrives, without altering the middleware transform chain.

use async_trait::async_trait;

use crate::error::Result;
use crate::framing::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginAction {
	Continue,
	ShortCircuit,
}

/// Lower `priority()` runs earlier. Default hooks are no-ops so a plugin
/// only needs to implement the side it cares about.
#[async_trait]
pub trait Plugin: Send + Sync {
	fn name(&self) -> &str;

	fn priority(&self) -> i32 {
		0
	}

	async fn before_send(&self, frame: &mut Frame) -> Result<PluginAction> {
		let _ = frame;
		Ok(PluginAction::Continue)
	}

	async fn after_receive(&self, frame: &mut Frame) -> Result<PluginAction> {
		let _ = frame;
		Ok(PluginAction::Continue)
	}
}

/// Traces every frame crossing the pipeline. Runs first on the outbound
/// side and last on the inbound side by sorting to the lowest priority.
pub struct LoggingPlugin;

impl LoggingPlugin {
	pub fn new() -> Self {
		Self
	}
}

impl Default for LoggingPlugin {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Plugin for LoggingPlugin {
	fn name(&self) -> &str {
		"logging"
	}

	fn priority(&self) -> i32 {
		i32::MIN
	}

	async fn before_send(&self, frame: &mut Frame) -> Result<PluginAction> {
		tracing::debug!(frame_type = ?frame.frame_type, len = frame.payload.len(), "sending frame");
		Ok(PluginAction::Continue)
	}

	async fn after_receive(&self, frame: &mut Frame) -> Result<PluginAction> {
		tracing::debug!(frame_type = ?frame.frame_type, len = frame.payload.len(), "received frame");
		Ok(PluginAction::Continue)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::framing::FrameType;

	#[tokio::test]
	async fn logging_plugin_never_short_circuits() {
		let plugin = LoggingPlugin::new();
		let mut frame = Frame::new(FrameType::Data, b"hi".to_vec()).unwrap();
		assert_eq!(plugin.before_send(&mut frame).await.unwrap(), PluginAction::Continue);
		assert_eq!(plugin.after_receive(&mut frame).await.unwrap(), PluginAction::Continue);
	}
}
