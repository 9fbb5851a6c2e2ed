// --- Sandbox Event Structures ---

use chrono::{DateTime, NaiveDate, Utc};
use core_types::{Order, SettlementKind, Trade};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the event channel. Slow subscribers lag and miss events.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A square-off or settlement run finished for one trading date.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementRun {
    pub trading_date: NaiveDate,
    pub kind: SettlementKind,
    pub ran_at: DateTime<Utc>,
    /// Positions closed (square-off) or pending gains released (T+1).
    pub affected: usize,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineState {
    pub running: bool,
    pub message: String,
}

/// The top-level event enum.
/// `tag` and `content` are used by serde for clean JSON representation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum SandboxEvent {
    OrderPlaced(Order),
    OrderModified(Order),
    OrderTriggered(Order),
    OrderFilled(Trade),
    OrderRejected(Order),
    OrderCancelled(Order),
    SquareOff(SettlementRun),
    Settlement(SettlementRun),
    EngineState(EngineState),
}

pub type EventSender = broadcast::Sender<SandboxEvent>;
pub type EventReceiver = broadcast::Receiver<SandboxEvent>;

/// Creates the event channel. The sender is cloned into every publisher.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}

/// Sends an event, ignoring the case where nobody is listening.
pub fn publish(sender: &EventSender, event: SandboxEvent) {
    let _ = sender.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SandboxEvent::Settlement(SettlementRun {
            trading_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            kind: SettlementKind::T1Settlement,
            ran_at: DateTime::<Utc>::from_timestamp(1_709_500_000, 0).unwrap(),
            affected: 2,
            realized_pnl: dec!(150),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Settlement");
        assert_eq!(json["payload"]["kind"], "T+1-SETTLEMENT");
        assert_eq!(json["payload"]["affected"], 2);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let (tx, rx) = channel(4);
        drop(rx);
        publish(
            &tx,
            SandboxEvent::EngineState(EngineState {
                running: false,
                message: "stopped".into(),
            }),
        );
    }
}
