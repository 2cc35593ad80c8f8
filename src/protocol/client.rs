//! Blocking game server connection.
//!
//! The connection is split after login: the receive half (a
//! [`PacketSource`]) is read by the session's receive thread and answers
//! keep-alives itself; the send half (a [`ChatSink`]) is shared with the
//! command path.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info};

use crate::common::error::{ProtocolError, ProtocolResult};
use crate::common::GameError;
use crate::game::connection::{
    ChatPacket, ChatSink, Credentials, GameConnector, GameLink, PacketSource, ServerAddress,
};
use crate::game::parser::parse_component_json;
use crate::protocol::packets::ids::*;
use crate::protocol::packets::{
    get_i64, get_string, get_u8, get_varint, put_string, put_varint, GamePacketCodec, Packet,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Servers send a keep-alive every 15 seconds or so; silence this long means
/// the connection is dead.
const PLAY_READ_TIMEOUT: Duration = Duration::from_secs(60);

const READ_CHUNK_SIZE: usize = 4096;

/// Reads and decodes frames from a blocking stream.
struct FrameReader {
    stream: TcpStream,
    buffer: BytesMut,
    codec: GamePacketCodec,
}

impl FrameReader {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            codec: GamePacketCodec::new(),
        }
    }

    /// Next packet, or `None` once the peer closed the stream.
    fn read_packet(&mut self) -> ProtocolResult<Option<Packet>> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(packet) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(packet));
            }
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Encodes and writes frames to a blocking stream.
struct FrameWriter {
    stream: TcpStream,
    codec: GamePacketCodec,
}

impl FrameWriter {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            codec: GamePacketCodec::new(),
        }
    }

    fn write_packet(&mut self, packet: Packet) -> ProtocolResult<()> {
        let mut frame = BytesMut::new();
        self.codec.encode(packet, &mut frame)?;
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }
}

fn handshake_packet(address: &ServerAddress) -> Packet {
    let mut payload = BytesMut::new();
    put_varint(&mut payload, PROTOCOL_VERSION);
    put_string(&mut payload, &address.host);
    payload.put_u16(address.port);
    put_varint(&mut payload, NEXT_STATE_LOGIN);
    Packet::new(HANDSHAKE, payload.freeze())
}

fn login_start_packet(username: &str) -> Packet {
    let mut payload = BytesMut::new();
    put_string(&mut payload, username);
    Packet::new(LOGIN_START, payload.freeze())
}

/// Longest prefix of `text` that is at most `max_units` UTF-16 code units.
fn truncate_utf16(text: &str, max_units: usize) -> &str {
    let mut units = 0;
    for (index, c) in text.char_indices() {
        units += c.len_utf16();
        if units > max_units {
            return &text[..index];
        }
    }
    text
}

fn chat_message_packet(text: &str) -> Packet {
    let mut payload = BytesMut::new();
    put_string(&mut payload, truncate_utf16(text, MAX_CHAT_LENGTH));
    Packet::new(SERVERBOUND_CHAT_MESSAGE, payload.freeze())
}

fn keep_alive_packet(id: i64) -> Packet {
    let mut payload = BytesMut::with_capacity(8);
    payload.put_i64(id);
    Packet::new(SERVERBOUND_KEEP_ALIVE, payload.freeze())
}

/// Display text of a disconnect reason component, falling back to the raw JSON.
fn reason_text(mut payload: Bytes) -> String {
    match get_string(&mut payload) {
        Ok(json) => parse_component_json(&json).unwrap_or(json),
        Err(e) => format!("unreadable disconnect reason: {}", e),
    }
}

fn open_stream(address: &ServerAddress) -> Result<TcpStream, GameError> {
    let candidates = (address.host.as_str(), address.port)
        .to_socket_addrs()
        .map_err(|e| GameError::ConnectFailure(format!("cannot resolve {}: {}", address, e)))?;

    let mut last_error = None;
    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", candidate, e);
                last_error = Some(e);
            }
        }
    }

    Err(GameError::ConnectFailure(match last_error {
        Some(e) => format!("cannot connect to {}: {}", address, e),
        None => format!("no addresses found for {}", address),
    }))
}

fn login_failure(e: ProtocolError) -> GameError {
    GameError::ConnectFailure(format!("login handshake failed: {}", e))
}

/// Run the login sequence up to Login Success.
fn login(
    reader: &mut FrameReader,
    writer: &mut FrameWriter,
    address: &ServerAddress,
    credentials: &Credentials,
) -> Result<(), GameError> {
    writer
        .write_packet(handshake_packet(address))
        .map_err(login_failure)?;
    writer
        .write_packet(login_start_packet(&credentials.username))
        .map_err(login_failure)?;

    loop {
        let packet = reader
            .read_packet()
            .map_err(login_failure)?
            .ok_or_else(|| {
                GameError::ConnectFailure("connection closed during login".to_string())
            })?;

        match packet.id {
            LOGIN_DISCONNECT => return Err(GameError::AuthFailure(reason_text(packet.payload))),
            ENCRYPTION_REQUEST => {
                return Err(GameError::AuthFailure(
                    "server requires online-mode authentication".to_string(),
                ))
            }
            LOGIN_SUCCESS => {
                let mut payload = packet.payload;
                let uuid = get_string(&mut payload).map_err(login_failure)?;
                debug!(uuid = %uuid, "Login accepted");
                return Ok(());
            }
            SET_COMPRESSION => {
                let mut payload = packet.payload;
                let threshold = get_varint(&mut payload).map_err(login_failure)?;
                debug!(threshold, "Server set network compression");
                reader.codec.set_compression_threshold(threshold);
                writer.codec.set_compression_threshold(threshold);
            }
            other => {
                return Err(login_failure(ProtocolError::UnexpectedPacket {
                    id: other,
                    phase: "login",
                }))
            }
        }
    }
}

/// Receive half of an established connection.
struct ProtocolSource {
    reader: FrameReader,
    writer: Arc<Mutex<FrameWriter>>,
}

impl PacketSource for ProtocolSource {
    fn next_chat(&mut self) -> Result<Option<ChatPacket>, GameError> {
        loop {
            let packet = match self.reader.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => return Ok(None),
                Err(e) => return Err(GameError::ConnectionLost(e.to_string())),
            };

            match packet.id {
                CLIENTBOUND_CHAT_MESSAGE => {
                    let mut payload = packet.payload;
                    let chat = get_string(&mut payload)
                        .and_then(|json_data| Ok((json_data, get_u8(&mut payload)?)));
                    match chat {
                        Ok((json_data, position)) => {
                            return Ok(Some(ChatPacket {
                                json_data,
                                position,
                            }))
                        }
                        Err(e) => debug!("Dropping malformed chat packet: {}", e),
                    }
                }
                CLIENTBOUND_KEEP_ALIVE => {
                    let mut payload = packet.payload;
                    let id = get_i64(&mut payload)
                        .map_err(|e| GameError::ConnectionLost(e.to_string()))?;
                    self.writer
                        .lock()
                        .write_packet(keep_alive_packet(id))
                        .map_err(|e| GameError::ConnectionLost(e.to_string()))?;
                }
                CLIENTBOUND_DISCONNECT => {
                    return Err(GameError::ConnectionLost(reason_text(packet.payload)));
                }
                _ => {}
            }
        }
    }
}

/// Send half of an established connection.
struct ProtocolSink {
    writer: Arc<Mutex<FrameWriter>>,
    control: TcpStream,
}

impl ChatSink for ProtocolSink {
    fn send_chat(&self, text: &str) -> Result<(), GameError> {
        self.writer
            .lock()
            .write_packet(chat_message_packet(text))
            .map_err(|e| GameError::SendFailure(e.to_string()))
    }

    fn close(&self) -> std::io::Result<()> {
        self.control.shutdown(Shutdown::Both)
    }
}

/// Connects to game servers with the built-in offline-mode client.
#[derive(Debug, Default)]
pub struct ProtocolConnector;

impl ProtocolConnector {
    pub fn new() -> Self {
        Self
    }
}

impl GameConnector for ProtocolConnector {
    fn connect(
        &self,
        address: &ServerAddress,
        credentials: &Credentials,
    ) -> Result<GameLink, GameError> {
        let stream = open_stream(address)?;
        let io_failure = |e: std::io::Error| GameError::ConnectFailure(e.to_string());

        stream.set_nodelay(true).map_err(io_failure)?;
        stream
            .set_read_timeout(Some(LOGIN_READ_TIMEOUT))
            .map_err(io_failure)?;

        let mut reader = FrameReader::new(stream.try_clone().map_err(io_failure)?);
        let mut writer = FrameWriter::new(stream.try_clone().map_err(io_failure)?);

        login(&mut reader, &mut writer, address, credentials)?;
        stream
            .set_read_timeout(Some(PLAY_READ_TIMEOUT))
            .map_err(io_failure)?;
        info!("Logged in to {} as {}", address, credentials.username);

        let writer = Arc::new(Mutex::new(writer));
        Ok(GameLink {
            source: Box::new(ProtocolSource {
                reader,
                writer: Arc::clone(&writer),
            }),
            sink: Arc::new(ProtocolSink {
                writer,
                control: stream,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc as std_mpsc;
    use std::thread;

    fn credentials() -> Credentials {
        Credentials {
            username: "RelayBot".to_string(),
        }
    }

    /// Accept one client on a loopback port and hand it to `script`.
    fn fake_server<F>(script: F) -> ServerAddress
    where
        F: FnOnce(FrameReader, FrameWriter) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let reader = FrameReader::new(stream.try_clone().unwrap());
            let writer = FrameWriter::new(stream);
            script(reader, writer);
        });
        ServerAddress {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    /// Read the handshake and Login Start, returning the username.
    fn expect_login(reader: &mut FrameReader) -> String {
        let handshake = reader.read_packet().unwrap().unwrap();
        assert_eq!(handshake.id, HANDSHAKE);
        let mut payload = handshake.payload;
        assert_eq!(get_varint(&mut payload).unwrap(), PROTOCOL_VERSION);
        assert_eq!(get_string(&mut payload).unwrap(), "127.0.0.1");

        let login_start = reader.read_packet().unwrap().unwrap();
        assert_eq!(login_start.id, LOGIN_START);
        let mut payload = login_start.payload;
        get_string(&mut payload).unwrap()
    }

    fn string_packet(id: i32, value: &str) -> Packet {
        let mut payload = BytesMut::new();
        put_string(&mut payload, value);
        Packet::new(id, payload.freeze())
    }

    fn login_success(writer: &mut FrameWriter, username: &str) {
        let mut payload = BytesMut::new();
        put_string(&mut payload, "00000000-0000-0000-0000-000000000000");
        put_string(&mut payload, username);
        writer
            .write_packet(Packet::new(LOGIN_SUCCESS, payload.freeze()))
            .unwrap();
    }

    #[test]
    fn test_login_chat_and_keep_alive() {
        let (seen_tx, seen_rx) = std_mpsc::channel();
        let address = fake_server(move |mut reader, mut writer| {
            let username = expect_login(&mut reader);
            login_success(&mut writer, &username);

            let mut keep_alive = BytesMut::new();
            keep_alive.put_i64(42);
            writer
                .write_packet(Packet::new(CLIENTBOUND_KEEP_ALIVE, keep_alive.freeze()))
                .unwrap();

            let mut chat = BytesMut::new();
            put_string(&mut chat, r#"{"text":"welcome"}"#);
            chat.put_u8(1);
            writer
                .write_packet(Packet::new(CLIENTBOUND_CHAT_MESSAGE, chat.freeze()))
                .unwrap();

            let reply = reader.read_packet().unwrap().unwrap();
            let mut payload = reply.payload.clone();
            seen_tx.send((reply.id, get_i64(&mut payload).unwrap())).unwrap();

            let sent = reader.read_packet().unwrap().unwrap();
            let mut payload = sent.payload.clone();
            seen_tx
                .send((sent.id, get_string(&mut payload).unwrap().len() as i64))
                .unwrap();
        });

        let mut link = ProtocolConnector::new()
            .connect(&address, &credentials())
            .unwrap();

        let chat = link.source.next_chat().unwrap().unwrap();
        assert_eq!(chat.json_data, r#"{"text":"welcome"}"#);
        assert_eq!(chat.position, 1);
        assert_eq!(seen_rx.recv().unwrap(), (SERVERBOUND_KEEP_ALIVE, 42));

        // Over-long chat is capped.
        link.sink.send_chat(&"x".repeat(300)).unwrap();
        assert_eq!(
            seen_rx.recv().unwrap(),
            (SERVERBOUND_CHAT_MESSAGE, MAX_CHAT_LENGTH as i64)
        );

        let _ = link.sink.close();
    }

    #[test]
    fn test_chat_cap_counts_utf16_units() {
        let binding = "\u{1F600}".repeat(300);
        let capped = truncate_utf16(&binding, MAX_CHAT_LENGTH);
        assert_eq!(capped.encode_utf16().count(), MAX_CHAT_LENGTH);
        assert_eq!(capped.chars().count(), MAX_CHAT_LENGTH / 2);

        // A surrogate pair straddling the limit is dropped whole.
        let mixed = format!("{}\u{1F600}", "x".repeat(MAX_CHAT_LENGTH - 1));
        assert_eq!(truncate_utf16(&mixed, MAX_CHAT_LENGTH), "x".repeat(MAX_CHAT_LENGTH - 1));

        assert_eq!(truncate_utf16("short", MAX_CHAT_LENGTH), "short");
    }

    #[test]
    fn test_compressed_session_relays_long_chat() {
        let (seen_tx, seen_rx) = std_mpsc::channel();
        let long_json = format!(r#"{{"text":"{}"}}"#, "w".repeat(400));
        let server_json = long_json.clone();
        let address = fake_server(move |mut reader, mut writer| {
            let username = expect_login(&mut reader);

            let mut threshold = BytesMut::new();
            put_varint(&mut threshold, 256);
            writer
                .write_packet(Packet::new(SET_COMPRESSION, threshold.freeze()))
                .unwrap();
            writer.codec.set_compression_threshold(256);
            reader.codec.set_compression_threshold(256);
            login_success(&mut writer, &username);

            let mut chat = BytesMut::new();
            put_string(&mut chat, &server_json);
            chat.put_u8(0);
            writer
                .write_packet(Packet::new(CLIENTBOUND_CHAT_MESSAGE, chat.freeze()))
                .unwrap();

            let sent = reader.read_packet().unwrap().unwrap();
            let mut payload = sent.payload.clone();
            seen_tx.send(get_string(&mut payload).unwrap()).unwrap();
        });

        let mut link = ProtocolConnector::new()
            .connect(&address, &credentials())
            .unwrap();

        let chat = link.source.next_chat().unwrap().unwrap();
        assert_eq!(chat.json_data, long_json);

        link.sink.send_chat(&"\u{1F600}".repeat(300)).unwrap();
        let sent = seen_rx.recv().unwrap();
        assert_eq!(sent.encode_utf16().count(), MAX_CHAT_LENGTH);

        let _ = link.sink.close();
    }

    #[test]
    fn test_login_disconnect_is_auth_failure() {
        let address = fake_server(|mut reader, mut writer| {
            expect_login(&mut reader);
            writer
                .write_packet(string_packet(LOGIN_DISCONNECT, r#"{"text":"You are banned"}"#))
                .unwrap();
        });

        let result = ProtocolConnector::new().connect(&address, &credentials());
        assert!(matches!(
            result,
            Err(GameError::AuthFailure(reason)) if reason == "You are banned"
        ));
    }

    #[test]
    fn test_encryption_request_is_auth_failure() {
        let address = fake_server(|mut reader, mut writer| {
            expect_login(&mut reader);
            writer
                .write_packet(Packet::new(ENCRYPTION_REQUEST, Bytes::new()))
                .unwrap();
        });

        let result = ProtocolConnector::new().connect(&address, &credentials());
        assert!(matches!(
            result,
            Err(GameError::AuthFailure(reason))
                if reason == "server requires online-mode authentication"
        ));
    }

    #[test]
    fn test_refused_connection_is_connect_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let address = ServerAddress {
            host: "127.0.0.1".to_string(),
            port,
        };

        let result = ProtocolConnector::new().connect(&address, &credentials());
        assert!(matches!(result, Err(GameError::ConnectFailure(_))));
    }

    #[test]
    fn test_play_disconnect_ends_with_reason() {
        let address = fake_server(|mut reader, mut writer| {
            let username = expect_login(&mut reader);
            login_success(&mut writer, &username);
            writer
                .write_packet(string_packet(CLIENTBOUND_DISCONNECT, r#"{"text":"Server closed"}"#))
                .unwrap();
        });

        let mut link = ProtocolConnector::new()
            .connect(&address, &credentials())
            .unwrap();
        match link.source.next_chat() {
            Err(GameError::ConnectionLost(reason)) => assert_eq!(reason, "Server closed"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_close_unblocks_receive() {
        let (done_tx, done_rx) = std_mpsc::channel::<()>();
        let address = fake_server(move |mut reader, mut writer| {
            let username = expect_login(&mut reader);
            login_success(&mut writer, &username);
            // Hold the connection open until the test is done.
            let _ = done_rx.recv();
        });

        let link = ProtocolConnector::new()
            .connect(&address, &credentials())
            .unwrap();
        let GameLink { mut source, sink } = link;
        let receiver = thread::spawn(move || source.next_chat());

        sink.close().unwrap();
        assert_eq!(receiver.join().unwrap(), Ok(None));
        done_tx.send(()).unwrap();
    }
}
