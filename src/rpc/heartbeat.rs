//! Liveness notifications for long-lived connections.

use crate::rpc::message::OutboundNotification;
use crate::rpc::outbound::Outbound;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

pub const HEARTBEAT_METHOD: &str = "notifications/heartbeat";

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Periodic `notifications/heartbeat` emitter. Aborted on drop.
#[derive(Debug)]
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Push a heartbeat every `interval` while `outbound` stays writable.
    /// The first beat is sent one full interval after spawning.
    pub fn spawn(outbound: Outbound, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !outbound.is_writable() {
                    debug!("Connection no longer writable, stopping heartbeat");
                    break;
                }
                let beat = OutboundNotification::new(
                    HEARTBEAT_METHOD,
                    Some(json!({ "timestamp": Utc::now().to_rfc3339() })),
                );
                if !outbound.send(&beat) {
                    debug!("Heartbeat write failed, stopping heartbeat");
                    break;
                }
                trace!("Heartbeat sent");
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_emits_notification_each_interval() {
        let (outbound, mut rx) = Outbound::channel();
        let _heartbeat = Heartbeat::spawn(outbound, Duration::from_secs(20));

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(rx.try_recv().is_err());

        for _ in 0..2 {
            let beat: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(beat["method"], HEARTBEAT_METHOD);
            assert_eq!(beat["jsonrpc"], "2.0");
            assert!(beat.get("id").is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_when_not_writable() {
        let (outbound, rx) = Outbound::channel();
        let heartbeat = Heartbeat::spawn(outbound, Duration::from_secs(20));
        drop(rx);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(heartbeat.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_heartbeat_cancels_timer() {
        let (outbound, mut rx) = Outbound::channel();
        let heartbeat = Heartbeat::spawn(outbound.clone(), Duration::from_secs(20));
        drop(heartbeat);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(rx.try_recv().is_err());
        assert!(outbound.is_writable());
    }
}
