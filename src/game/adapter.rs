//! Game session adapter.
//!
//! Wraps one game connection: turns incoming chat packets into queued
//! fragments on a dedicated receive thread, and forwards outbound text to the
//! game verbatim.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::queue::RelayQueue;
use crate::common::{ChatFragment, GameError, GatewayTask};
use crate::game::connection::{
    ChatPacket, ChatSink, Credentials, GameConnector, PacketSource, ServerAddress,
};
use crate::game::parser::parse_chat;

/// Parse a chat packet and queue its text. Packets without text are dropped.
pub fn on_chat_packet(queue: &RelayQueue, packet: &ChatPacket) {
    match parse_chat(packet) {
        Some(text) => {
            debug!("Game -> queue: {}", text);
            queue.push(ChatFragment::new(text));
        }
        None => debug!(position = packet.position, "Discarding chat packet without text"),
    }
}

/// Cloneable handle for sending chat into the game world.
#[derive(Clone)]
pub struct GameSender {
    sink: Arc<dyn ChatSink>,
}

impl GameSender {
    /// Send text verbatim. Blocks on the socket write.
    pub fn send(&self, text: &str) -> Result<(), GameError> {
        self.sink.send_chat(text)
    }
}

impl fmt::Debug for GameSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameSender").finish_non_exhaustive()
    }
}

/// One connected game session.
pub struct GameSessionAdapter {
    queue: RelayQueue,
    sink: Arc<dyn ChatSink>,
    source: Option<Box<dyn PacketSource>>,
    closing: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl GameSessionAdapter {
    /// Connect through `connector`. Blocks on network I/O.
    pub fn connect(
        connector: &dyn GameConnector,
        address: &ServerAddress,
        credentials: &Credentials,
        queue: RelayQueue,
    ) -> Result<Self, GameError> {
        info!("Connecting to game server {} as {}", address, credentials.username);
        let link = connector.connect(address, credentials)?;

        Ok(Self {
            queue,
            sink: link.sink,
            source: Some(link.source),
            closing: Arc::new(AtomicBool::new(false)),
            receiver: None,
        })
    }

    /// Start the receive thread.
    ///
    /// If the connection ends without [`disconnect`](Self::disconnect) being
    /// called, a [`GatewayTask::SessionLost`] for `session_id` is submitted.
    pub fn start_receiving(
        &mut self,
        session_id: u64,
        tasks: mpsc::UnboundedSender<GatewayTask>,
    ) -> std::io::Result<()> {
        let Some(mut source) = self.source.take() else {
            return Ok(());
        };
        let queue = self.queue.clone();
        let closing = Arc::clone(&self.closing);

        let handle = thread::Builder::new()
            .name(format!("game-session-{}", session_id))
            .spawn(move || {
                let reason = loop {
                    match source.next_chat() {
                        Ok(Some(packet)) => on_chat_packet(&queue, &packet),
                        Ok(None) => break "connection closed by server".to_string(),
                        Err(e) => break e.to_string(),
                    }
                };

                if closing.load(Ordering::SeqCst) {
                    debug!(session_id, "Game receive loop ended after disconnect");
                    return;
                }

                warn!(session_id, "Game connection lost: {}", reason);
                let _ = tasks.send(GatewayTask::SessionLost { session_id, reason });
            })?;

        self.receiver = Some(handle);
        Ok(())
    }

    /// Handle for sending chat to the game.
    pub fn sender(&self) -> GameSender {
        GameSender {
            sink: Arc::clone(&self.sink),
        }
    }

    /// Close the connection. Errors are logged and swallowed; the adapter is
    /// disconnected afterwards either way. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.sink.close() {
            debug!("Ignoring error while closing game connection: {}", e);
        }
        // The receive thread exits once the closed socket unblocks its read.
        self.receiver.take();
    }
}

impl Drop for GameSessionAdapter {
    fn drop(&mut self) {
        self.disconnect();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::time::Duration;

    fn address() -> ServerAddress {
        ServerAddress {
            host: "localhost".to_string(),
            port: 25565,
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "RelayBot".to_string(),
        }
    }

    fn open(connector: &FakeConnector, queue: RelayQueue) -> GameSessionAdapter {
        GameSessionAdapter::connect(connector, &address(), &credentials(), queue).unwrap()
    }

    #[test]
    fn test_on_chat_packet_queues_text() {
        let queue = RelayQueue::new();
        on_chat_packet(
            &queue,
            &ChatPacket {
                json_data: r#"{"text":"hello"}"#.to_string(),
                position: 1,
            },
        );
        on_chat_packet(
            &queue,
            &ChatPacket {
                json_data: "garbage".to_string(),
                position: 0,
            },
        );

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_front().unwrap().text, "hello");
    }

    #[test]
    fn test_connect_failure_propagates() {
        let connector = FakeConnector::failing(GameError::AuthFailure("bad login".to_string()));
        let result =
            GameSessionAdapter::connect(&connector, &address(), &credentials(), RelayQueue::new());
        assert!(matches!(result, Err(GameError::AuthFailure(reason)) if reason == "bad login"));
    }

    #[test]
    fn test_receive_thread_fills_queue() {
        let connector = FakeConnector::default();
        let queue = RelayQueue::new();
        let mut adapter = open(&connector, queue.clone());
        let (tasks_tx, _tasks_rx) = mpsc::unbounded_channel();
        adapter.start_receiving(1, tasks_tx).unwrap();

        let (events, _sink) = connector.last_link();
        events.send(chat_packet(r#"{"text":"one"}"#)).unwrap();
        events.send(chat_packet(r#"{"text":"two"}"#)).unwrap();

        for _ in 0..100 {
            if queue.len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(queue.pop_front().unwrap().text, "one");
        assert_eq!(queue.pop_front().unwrap().text, "two");
        adapter.disconnect();
    }

    #[test]
    fn test_send_failure_is_reported() {
        let connector = FakeConnector::default();
        let adapter = open(&connector, RelayQueue::new());
        let (_, sink) = connector.last_link();

        adapter.sender().send("hi").unwrap();
        assert_eq!(*sink.sent.lock(), vec!["hi".to_string()]);

        sink.fail_sends.store(true, std::sync::atomic::Ordering::SeqCst);
        let sent = adapter.sender().send("again");
        assert!(matches!(sent, Err(GameError::SendFailure(_))));
    }

    #[test]
    fn test_disconnect_swallows_close_errors_and_is_idempotent() {
        let connector = FakeConnector::default();
        let mut adapter = open(&connector, RelayQueue::new());
        let (_, sink) = connector.last_link();

        // Closing an already closed socket errors inside the sink.
        sink.close().unwrap();
        adapter.disconnect();
        adapter.disconnect();
        assert!(sink.is_closed());
    }

    #[test]
    fn test_unexpected_close_reports_session_lost() {
        let connector = FakeConnector::default();
        let mut adapter = open(&connector, RelayQueue::new());
        let (tasks_tx, mut tasks_rx) = mpsc::unbounded_channel();
        adapter.start_receiving(7, tasks_tx).unwrap();

        let (events, _sink) = connector.last_link();
        events.send(FakeEvent::Fail("timed out".to_string())).unwrap();

        match tasks_rx.blocking_recv() {
            Some(GatewayTask::SessionLost { session_id, reason }) => {
                assert_eq!(session_id, 7);
                assert_eq!(reason, "timed out");
            }
            other => panic!("unexpected task: {:?}", other),
        }
    }

    #[test]
    fn test_requested_disconnect_reports_nothing() {
        let connector = FakeConnector::default();
        let mut adapter = open(&connector, RelayQueue::new());
        let (tasks_tx, mut tasks_rx) = mpsc::unbounded_channel();
        adapter.start_receiving(3, tasks_tx).unwrap();

        adapter.disconnect();
        drop(adapter);

        // The receive thread drops its task sender when it exits.
        assert_eq!(tasks_rx.blocking_recv(), None);
    }
}
