//! Diagnostics export.

use ectocontrol_common::DeviceLiveness;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::coordinator::{CoordinatorStatus, PollingCoordinator};
use crate::registers::{Field, FieldValue};
use crate::transport::BAUD_RATE;

/// Everything needed to debug a misbehaving adapter, in one document.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub name: String,
    pub port: String,
    pub slave_id: u8,
    pub baud_rate: u32,
    pub connected: bool,
    pub sequential_reads: bool,
    pub retry_count: u32,
    pub status: CoordinatorStatus,
    pub liveness: DeviceLiveness,
    /// Raw cache keyed by hex address.
    pub cache: BTreeMap<String, u16>,
    /// Decoded readable fields.
    pub fields: BTreeMap<Field, Option<FieldValue>>,
}

impl Diagnostics {
    /// Take a snapshot of a coordinator and its gateway.
    pub fn collect(coordinator: &PollingCoordinator) -> Self {
        let gateway = coordinator.gateway();
        let transport = gateway.transport();
        let status = coordinator.status();
        let cache = gateway
            .cache_snapshot()
            .iter()
            .map(|(address, raw)| (format!("{:#06x}", address), *raw))
            .collect();

        Self {
            name: coordinator.name().to_string(),
            port: transport.endpoint(),
            slave_id: gateway.slave_id(),
            baud_rate: BAUD_RATE,
            connected: transport.is_connected(),
            sequential_reads: coordinator.settings().sequential,
            retry_count: coordinator.settings().retry_count,
            liveness: status.liveness(coordinator.name()),
            status,
            cache,
            fields: gateway.read_all(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::PollSettings;
    use crate::gateway::RegisterGateway;
    use crate::mock::MemoryDevice;
    use crate::transport::TransportClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_collect_after_refresh() {
        let device = MemoryDevice::boiler(3);
        let transport = Arc::new(TransportClient::new(device));
        let gateway = Arc::new(RegisterGateway::new(transport, 3));
        let coordinator = PollingCoordinator::new(gateway, PollSettings::default());
        coordinator.refresh().await;

        let diag = Diagnostics::collect(&coordinator);
        assert_eq!(diag.slave_id, 3);
        assert_eq!(diag.port, "memory");
        assert_eq!(diag.cache.len(), 23);
        assert_eq!(diag.cache.get("0x0018"), Some(&452));

        let json: serde_json::Value = serde_json::from_str(&diag.to_json().unwrap()).unwrap();
        assert_eq!(json["baud_rate"], 19200);
        assert_eq!(json["fields"]["chTemperature"], 45.2);
        assert_eq!(json["fields"]["burnerOn"], true);
        assert_eq!(json["status"]["device_status"], "online");
        assert_eq!(json["liveness"]["available"], true);
    }
}
