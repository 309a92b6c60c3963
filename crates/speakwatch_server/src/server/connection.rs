#![forbid(unsafe_code)]

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::server::notifier::{Notifier, Subscription};

/// Serve one websocket subscriber until either side goes away.
///
/// Frames are written by a dedicated task draining the subscriber queue. This
/// task only reads, to notice the peer closing, then deregisters.
pub async fn serve_subscriber<S>(conn_id: u64, ws: WebSocketStream<S>, notifier: Notifier)
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let Subscription { id, mut frames } = match notifier.subscribe().await {
		Ok(sub) => sub,
		Err(e) => {
			warn!(conn_id, error = %e, "failed to build initial snapshot; closing connection");
			return;
		}
	};

	metrics::counter!("speakwatch_connections_total").increment(1);
	info!(conn_id, subscriber = %id, "subscriber connected");

	let (mut sink, mut stream) = ws.split();

	let mut writer = tokio::spawn(async move {
		while let Some(frame) = frames.recv().await {
			if let Err(e) = sink.send(Message::text(frame.to_string())).await {
				debug!(conn_id, error = %e, "subscriber write failed");
				break;
			}
		}
		let _ = sink.close().await;
	});

	let reader = async {
		while let Some(msg) = stream.next().await {
			match msg {
				Ok(Message::Close(frame)) => {
					debug!(conn_id, ?frame, "subscriber sent close");
					break;
				}
				Ok(_) => {}
				Err(e) => {
					debug!(conn_id, error = %e, "subscriber read failed");
					break;
				}
			}
		}
	};

	tokio::select! {
		_ = reader => {}
		_ = &mut writer => {}
	}

	notifier.unsubscribe(id).await;
	writer.abort();

	info!(conn_id, subscriber = %id, "subscriber disconnected");
}
