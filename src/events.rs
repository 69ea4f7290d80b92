use crate::models::{CostOptions, SynchronizedCost};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_BUS_CAPACITY: usize = 256;

/// Notifications widgets subscribe to in order to re-read restored or recomputed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DashboardEvent {
    #[serde(rename_all = "camelCase")]
    SystemRestored { timestamp: DateTime<Utc>, source: String },
    #[serde(rename_all = "camelCase")]
    TireCostUpdated { average_cost_per_tire: f64, source: String },
    #[serde(rename_all = "camelCase")]
    TireProfitUpdated { average_profit_per_tire: f64, source: String },
    #[serde(rename_all = "camelCase")]
    ResaleProfitUpdated { average_resale_profit: f64, source: String },
    FinalProductStockUpdated { balance: f64, source: String },
    CashBalanceUpdated { balance: f64, source: String },
    #[serde(rename_all = "camelCase")]
    RevenueUpdated { total_revenue: f64, source: String },
    RawMaterialStockUpdated { balance: f64, source: String },
    CostOptionsUpdated { options: CostOptions, source: String },
    TireAnalysisRestored { count: usize, source: String },
    SynchronizedCostRestored { cost: SynchronizedCost, source: String },
    ForceRecalculation { source: String },
}

impl DashboardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SystemRestored { .. } => "systemRestored",
            Self::TireCostUpdated { .. } => "tireCostUpdated",
            Self::TireProfitUpdated { .. } => "tireProfitUpdated",
            Self::ResaleProfitUpdated { .. } => "resaleProfitUpdated",
            Self::FinalProductStockUpdated { .. } => "finalProductStockUpdated",
            Self::CashBalanceUpdated { .. } => "cashBalanceUpdated",
            Self::RevenueUpdated { .. } => "revenueUpdated",
            Self::RawMaterialStockUpdated { .. } => "rawMaterialStockUpdated",
            Self::CostOptionsUpdated { .. } => "costOptionsUpdated",
            Self::TireAnalysisRestored { .. } => "tireAnalysisRestored",
            Self::SynchronizedCostRestored { .. } => "synchronizedCostRestored",
            Self::ForceRecalculation { .. } => "forceRecalculation",
        }
    }
}

/// Fire-and-forget fan-out. Publishing never blocks and never fails; events
/// sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DashboardEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DashboardEvent) {
        tracing::debug!(event = event.name(), "publishing dashboard event");
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Drains every event already queued on `receiver`.
pub fn drain(receiver: &mut broadcast::Receiver<DashboardEvent>) -> Vec<DashboardEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "dashboard event receiver lagged");
            }
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::{drain, DashboardEvent, EventBus};

    #[test]
    fn events_serialize_with_type_tag() {
        let event = DashboardEvent::TireCostUpdated {
            average_cost_per_tire: 102.43,
            source: "CheckpointRestore".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "tireCostUpdated");
        assert_eq!(json["averageCostPerTire"], 102.43);
        assert_eq!(json["source"], "CheckpointRestore");
        assert_eq!(event.name(), "tireCostUpdated");
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(DashboardEvent::ForceRecalculation {
            source: "test".to_string(),
        });

        let mut receiver = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(DashboardEvent::CashBalanceUpdated {
            balance: 500.0,
            source: "test".to_string(),
        });
        let events = drain(&mut receiver);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "cashBalanceUpdated");
    }
}
