//! Prometheus counters for deliveries and engagement

use gazette_common::{Error, Result};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Engine counters, registered on a private registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub emails_sent: IntCounter,
    pub emails_failed: IntCounter,
    pub opens: IntCounter,
    pub clicks: IntCounter,
    pub unsubscribes: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let counter = IntCounter::new(name, help)
                .map_err(|e| Error::Internal(format!("Invalid metric {}: {}", name, e)))?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(|e| Error::Internal(format!("Failed to register {}: {}", name, e)))?;
            Ok(counter)
        };

        let emails_sent = counter(
            "gazette_emails_sent_total",
            "Messages accepted by the mail transport",
        )?;
        let emails_failed = counter(
            "gazette_emails_failed_total",
            "Messages the mail transport rejected or timed out on",
        )?;
        let opens = counter("gazette_opens_total", "First opens recorded")?;
        let clicks = counter("gazette_clicks_total", "First clicks recorded")?;
        let unsubscribes = counter("gazette_unsubscribes_total", "Unsubscribes recorded")?;

        Ok(Self {
            registry,
            emails_sent,
            emails_failed,
            opens,
            clicks,
            unsubscribes,
        })
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.emails_sent.inc_by(3);
        metrics.opens.inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("gazette_emails_sent_total 3"));
        assert!(text.contains("gazette_opens_total 1"));
        assert!(text.contains("gazette_unsubscribes_total 0"));
    }
}
