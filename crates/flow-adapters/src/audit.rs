//! `LogAuditSink`: an `AuditSink` that writes each event through the `log`
//! facade at `info` level, for the CLI demo and local development — a real
//! deployment wires an append-only store or message bus instead.

use async_trait::async_trait;
use log::info;

use flow_core::contracts::{AuditEvent, AuditSink};

#[derive(Default)]
pub struct LogAuditSink;

impl LogAuditSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: AuditEvent) {
        info!("audit: {event:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::RunId;

    #[tokio::test]
    async fn records_without_panicking() {
        let sink = LogAuditSink::new();
        sink.record(AuditEvent::RunStarted { run_id: RunId::new(), tenant_id: flow_domain::TenantId::new() }).await;
    }
}
