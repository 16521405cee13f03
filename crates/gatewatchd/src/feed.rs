//! MJPEG live view (`multipart/x-mixed-replace`).

use crate::state::SharedState;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

pub const BOUNDARY: &str = "frame";

/// One viewer's pull-based feed. Emits the latest frame once per tick.
pub struct FrameFeed {
    shared: Arc<SharedState>,
    ticker: Interval,
    sent: u64,
}

impl FrameFeed {
    pub fn new(shared: Arc<SharedState>, period: Duration) -> Self {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!("live-view client connected");
        Self {
            shared,
            ticker,
            sent: 0,
        }
    }

    pub async fn next_frame(&mut self) -> Bytes {
        self.ticker.tick().await;
        self.sent += 1;
        self.shared.frames.snapshot()
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures_util::stream::unfold(self, |mut feed| async move {
            let jpeg = feed.next_frame().await;
            Some((Ok(multipart_part(&jpeg)), feed))
        })
    }
}

impl Drop for FrameFeed {
    fn drop(&mut self) {
        tracing::debug!(frames = self.sent, "live-view client disconnected");
    }
}

/// Wrap one JPEG as a multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}
