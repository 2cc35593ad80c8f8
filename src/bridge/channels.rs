//! Bridge channel management.
//!
//! Groups the channels that connect the game-session threads, the gateway
//! event loop and the shutdown path.

use tokio::sync::{mpsc, watch};

use crate::common::GatewayTask;

/// Channels for the game-session side.
///
/// The sender is cloned into every receive thread and drain loop.
pub struct GameSideChannels {
    pub tasks_tx: mpsc::UnboundedSender<GatewayTask>,
}

/// Channels for the gateway event loop.
pub struct GatewaySideChannels {
    /// Work submitted by the game-session threads.
    pub tasks_rx: mpsc::UnboundedReceiver<GatewayTask>,
    /// Receiver for shutdown signal.
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Control channels for shutdown coordination.
pub struct ControlChannels {
    /// Sender to trigger shutdown.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Bundle of all channels created by the bridge.
pub struct ChannelBundle {
    pub game: GameSideChannels,
    pub gateway: GatewaySideChannels,
    pub control: ControlChannels,
}

impl ChannelBundle {
    pub fn new() -> Self {
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            game: GameSideChannels { tasks_tx },
            gateway: GatewaySideChannels {
                tasks_rx,
                shutdown_rx,
            },
            control: ControlChannels { shutdown_tx },
        }
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DrainBatch;

    #[tokio::test]
    async fn test_tasks_cross_from_game_side_to_gateway() {
        let mut bundle = ChannelBundle::new();

        let tx = bundle.game.tasks_tx.clone();
        std::thread::spawn(move || {
            tx.send(GatewayTask::Deliver(DrainBatch {
                text: "hi\n".to_string(),
                fragments: 1,
            }))
            .unwrap();
        })
        .join()
        .unwrap();

        match bundle.gateway.tasks_rx.recv().await {
            Some(GatewayTask::Deliver(batch)) => assert_eq!(batch.text, "hi\n"),
            other => panic!("unexpected task: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let mut bundle = ChannelBundle::new();
        bundle.control.shutdown_tx.send(true).unwrap();

        bundle.gateway.shutdown_rx.changed().await.unwrap();
        assert!(*bundle.gateway.shutdown_rx.borrow());
    }
}
