//! Alert sinks: where emitted alerts are published.

use std::io::Write;
use std::sync::Mutex;

use crossbeam_channel::{Sender, TrySendError};

use crate::error::PublishError;

use super::Alert;

/// Destination for emitted alerts.
///
/// `publish` is called from shard worker threads and must not block for long.
pub trait AlertSink: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Publishes one alert.
    ///
    /// # Errors
    ///
    /// `Unreachable` when the destination cannot take the alert;
    /// `Serialization` when the alert cannot be encoded.
    fn publish(&self, alert: &Alert) -> Result<(), PublishError>;
}

/// Writes each alert as one JSON line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send> {
    name: String,
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wraps a writer.
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(writer),
        }
    }

    /// Returns the writer.
    ///
    /// # Errors
    ///
    /// `Unreachable` if a writer thread panicked while holding it.
    pub fn into_inner(self) -> Result<W, PublishError> {
        let name = self.name;
        self.writer.into_inner().map_err(|_| PublishError::Unreachable {
            sink: name,
            reason: "poisoned writer".to_string(),
        })
    }

    fn unreachable(&self, reason: impl ToString) -> PublishError {
        PublishError::Unreachable {
            sink: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl<W: Write + Send> AlertSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, alert: &Alert) -> Result<(), PublishError> {
        let mut line = serde_json::to_vec(alert)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().map_err(|_| self.unreachable("poisoned writer"))?;
        writer.write_all(&line).map_err(|e| self.unreachable(e))?;
        writer.flush().map_err(|e| self.unreachable(e))
    }
}

/// Forwards alerts into a bounded channel without blocking.
#[derive(Debug)]
pub struct ChannelSink {
    name: String,
    tx: Sender<Alert>,
}

impl ChannelSink {
    /// Wraps a sender.
    pub fn new(name: impl Into<String>, tx: Sender<Alert>) -> Self {
        Self { name: name.into(), tx }
    }
}

impl AlertSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, alert: &Alert) -> Result<(), PublishError> {
        self.tx.try_send(alert.clone()).map_err(|e| PublishError::Unreachable {
            sink: self.name.clone(),
            reason: match e {
                TrySendError::Full(_) => "channel full".to_string(),
                TrySendError::Disconnected(_) => "receiver dropped".to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::tests::sample_alert;
    use crossbeam_channel::bounded;

    #[test]
    fn test_json_lines_sink_writes_one_line_per_alert() {
        let sink = JsonLinesSink::new("buffer", Vec::new());
        sink.publish(&sample_alert()).unwrap();
        sink.publish(&sample_alert()).unwrap();

        let bytes = sink.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Alert = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.message, sample_alert().message);
    }

    #[test]
    fn test_channel_sink_reports_full_and_closed() {
        let (tx, rx) = bounded(1);
        let sink = ChannelSink::new("chan", tx);
        sink.publish(&sample_alert()).unwrap();
        assert!(matches!(
            sink.publish(&sample_alert()),
            Err(PublishError::Unreachable { ref reason, .. }) if reason == "channel full"
        ));

        drop(rx);
        assert!(matches!(
            sink.publish(&sample_alert()),
            Err(PublishError::Unreachable { ref reason, .. }) if reason == "receiver dropped"
        ));
    }
}
