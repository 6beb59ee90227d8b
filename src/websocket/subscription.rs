//! Topic subscription and unsubscription operations.

use tracing::{debug, info};

use super::{WsWriter, send_control};
use crate::Result;
use crate::models::{ControlRequest, Topic};

/// Subscribes to the given topics in one control message.
///
/// # Errors
///
/// Returns a [`MeridianError`](crate::MeridianError) if sending the subscription message fails.
pub async fn subscribe(write: &mut WsWriter, topics: &[Topic]) -> Result<()> {
    let request = ControlRequest::subscribe(topics.to_vec());
    debug!(?request, "Sending subscribe request");
    send_control(write, &request).await?;
    info!(?topics, "Subscribed to topics");

    Ok(())
}

/// Unsubscribes from the given topics in one control message.
///
/// # Errors
///
/// Returns a [`MeridianError`](crate::MeridianError) if sending the unsubscribe message fails.
pub async fn unsubscribe(write: &mut WsWriter, topics: &[Topic]) -> Result<()> {
    let request = ControlRequest::unsubscribe(topics.to_vec());
    send_control(write, &request).await?;
    info!(?topics, "Unsubscribed from topics");

    Ok(())
}
