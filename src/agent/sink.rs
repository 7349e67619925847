//! Where agents deliver their notifications

use crate::codec::Notification;
use serde_json::json;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::warn;

/// Host-side consumer of `(records, channel)` notifications
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that queues notifications on an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            warn!("Notification receiver dropped - notification discarded");
        }
    }
}

/// Sink that writes one JSON line per notification to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn notify(&self, notification: Notification) {
        let line = json!({
            "channel": notification.channel.as_str(),
            "records": notification.records,
        });
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            warn!(error = %e, "Failed to write notification to stdout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OutputChannel;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut receiver) = ChannelSink::new();

        sink.notify(Notification::output(vec![json!({"a": 1})]));
        sink.notify(Notification::output(vec![json!({"a": 2})]));

        assert_eq!(receiver.recv().await.unwrap().records, vec![json!({"a": 1})]);
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.channel, OutputChannel::Output);
        assert_eq!(second.records, vec![json!({"a": 2})]);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, receiver) = ChannelSink::new();
        drop(receiver);
        sink.notify(Notification::output(Vec::new()));
    }
}
