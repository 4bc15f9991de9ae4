//! Realtime transport client

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::backoff::ReconnectPolicy;
use super::heartbeat::{Heartbeat, PING_EXPIRY_INTERVALS};
use super::protocol::{ClientMessage, ConfigData, ServerMessage, VoicePacket, decode_server_text};
use super::{ConnectionState, TransportConfig, TransportEvent, TransportStatus};
use crate::audio::{AudioFrame, FrameSink, Microphone, MicrophoneRequest, MicrophoneStream};
use crate::error::VoiceErrorKind;
use crate::{Error, Result, lock};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a socket session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseKind {
    /// Local `disconnect()`
    Requested,
    /// Server closed normally
    Clean,
    /// Error, abnormal close code, or stream ended without a close frame
    Unclean,
}

/// Work queued for the socket task
#[derive(Debug)]
enum Outbound {
    Packet(VoicePacket),
}

struct Connection {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Client for the realtime voice server
///
/// Owns at most one socket task and one transmission microphone at a time.
pub struct RealtimeClient {
    config: TransportConfig,
    microphone: Arc<dyn Microphone>,
    status_tx: Arc<watch::Sender<TransportStatus>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    connection: Mutex<Option<Connection>>,
    transmission: Mutex<Option<Box<dyn MicrophoneStream>>>,
}

impl RealtimeClient {
    #[must_use]
    pub fn new(config: TransportConfig, microphone: Arc<dyn Microphone>) -> Self {
        let (status_tx, _) = watch::channel(TransportStatus::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            microphone,
            status_tx: Arc::new(status_tx),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            connection: Mutex::new(None),
            transmission: Mutex::new(None),
        }
    }

    /// Open the connection, resolving once the first attempt succeeds or fails
    ///
    /// A call while already connected or connecting is a no-op. Automatic
    /// reconnection continues in the background after this returns.
    ///
    /// # Errors
    ///
    /// Returns a `NetworkFailure` if the first attempt fails
    pub async fn connect(&self) -> Result<()> {
        let mut status_rx = self.status_tx.subscribe();

        let spawned = {
            let mut connection = lock(&self.connection);
            let running = connection.as_ref().is_some_and(|c| !c.task.is_finished());

            if running {
                false
            } else {
                self.status_tx.send_modify(|s| {
                    s.transition(ConnectionState::Connecting);
                    s.last_error = None;
                    s.reconnect_attempt = 0;
                });

                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let shutdown = CancellationToken::new();
                let task = ConnectionTask {
                    config: self.config.clone(),
                    status_tx: Arc::clone(&self.status_tx),
                    events_tx: self.events_tx.clone(),
                    outbound_rx,
                    shutdown: shutdown.clone(),
                };

                *connection = Some(Connection {
                    outbound_tx,
                    shutdown,
                    task: tokio::spawn(task.run()),
                });
                true
            }
        };

        if !spawned && self.status().is_connected {
            tracing::debug!("already connected");
            return Ok(());
        }

        let status = status_rx
            .wait_for(|s| s.state != ConnectionState::Connecting)
            .await
            .map_err(|_| Error::Transport("status channel closed".to_string()))?
            .clone();

        if status.is_connected {
            Ok(())
        } else {
            Err(Error::voice(
                VoiceErrorKind::NetworkFailure,
                status
                    .last_error
                    .unwrap_or_else(|| "connection failed".to_string()),
            ))
        }
    }

    /// Close the connection and stop any transmission
    pub async fn disconnect(&self) {
        self.stop_transmission();

        let connection = lock(&self.connection).take();
        if let Some(connection) = connection {
            connection.shutdown.cancel();
            if tokio::time::timeout(Duration::from_secs(2), connection.task)
                .await
                .is_err()
            {
                tracing::warn!("socket task did not stop in time");
            }
        }

        self.status_tx
            .send_modify(|s| s.transition(ConnectionState::Disconnected));
    }

    /// Start streaming microphone audio to the server
    ///
    /// Connects first if needed. Each captured frame becomes one packet.
    ///
    /// # Errors
    ///
    /// Returns error if the connection or the microphone cannot be opened
    pub async fn start_transmission(&self) -> Result<()> {
        if !self.status().is_connected {
            self.connect().await?;
        }

        let mut transmission = lock(&self.transmission);
        if transmission.is_some() {
            tracing::debug!("already transmitting");
            return Ok(());
        }

        let outbound_tx = lock(&self.connection)
            .as_ref()
            .map(|c| c.outbound_tx.clone())
            .ok_or_else(|| Error::Transport("not connected".to_string()))?;

        let request = MicrophoneRequest {
            sample_rate: self.config.sample_rate,
            channel_count: self.config.channel_count,
            echo_cancellation: true,
            buffer_size: self.config.audio_buffer_size,
        };

        let status_tx = Arc::clone(&self.status_tx);
        let sink: FrameSink = Arc::new(move |frame: AudioFrame<'_>| {
            if !status_tx.borrow().is_transmitting {
                return;
            }

            let packet = VoicePacket::from_samples(frame.samples, frame.sample_rate, frame.channels);
            if outbound_tx.send(Outbound::Packet(packet)).is_err() {
                status_tx.send_modify(|s| s.metrics.record_lost());
            }
        });

        let stream = self.microphone.open(&request, sink)?;
        *transmission = Some(stream);
        drop(transmission);

        self.status_tx
            .send_modify(|s| s.request_transmission(true));
        tracing::info!(
            sample_rate = request.sample_rate,
            buffer_size = request.buffer_size,
            "transmission started"
        );
        Ok(())
    }

    /// Release the transmission microphone; the connection stays open
    pub fn stop_transmission(&self) {
        let stream = lock(&self.transmission).take();
        if let Some(stream) = stream {
            stream.close();
            tracing::info!("transmission stopped");
        }
        self.status_tx
            .send_modify(|s| s.request_transmission(false));
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> TransportStatus {
        self.status_tx.borrow().clone()
    }

    /// Receiver notified on every status change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TransportStatus> {
        self.status_tx.subscribe()
    }

    /// Take the inbound event stream; only the first caller gets it
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        lock(&self.events_rx).take()
    }

    /// Transport configuration
    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Some(stream) = lock(&self.transmission).take() {
            stream.close();
        }
        if let Some(connection) = lock(&self.connection).take() {
            connection.shutdown.cancel();
        }
    }
}

/// Socket task state, alive across reconnects
struct ConnectionTask {
    config: TransportConfig,
    status_tx: Arc<watch::Sender<TransportStatus>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    shutdown: CancellationToken,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut policy =
            ReconnectPolicy::new(self.config.reconnect_attempts, self.config.reconnect_delay());

        loop {
            self.set_state(ConnectionState::Connecting);
            tracing::debug!(url = %self.config.url, "connecting");

            let shutdown = self.shutdown.clone();
            let attempt = tokio::select! {
                () = shutdown.cancelled() => break,
                result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result,
            };

            let close = match attempt {
                Ok((socket, _)) => {
                    policy.reset();
                    self.status_tx.send_modify(|s| {
                        s.transition(ConnectionState::Connected);
                        s.last_error = None;
                        s.reconnect_attempt = 0;
                    });
                    tracing::info!(url = %self.config.url, "realtime connected");
                    self.session(socket).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, "realtime connection failed");
                    self.set_error(&e.to_string());
                    CloseKind::Unclean
                }
            };

            self.set_state(ConnectionState::Disconnected);

            if close != CloseKind::Unclean {
                tracing::info!(?close, "realtime disconnected");
                break;
            }

            let Some(delay) = policy.next_delay() else {
                tracing::warn!(
                    attempts = policy.attempts(),
                    "reconnect budget exhausted, staying disconnected"
                );
                break;
            };

            let attempt = policy.attempts();
            self.status_tx.send_modify(|s| {
                s.reconnect_attempt = attempt;
                s.reconnect_pending = true;
            });
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling reconnect"
            );

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.status_tx.send_modify(|s| {
            s.transition(ConnectionState::Disconnected);
            s.reconnect_pending = false;
        });
    }

    async fn session(&mut self, socket: Socket) -> CloseKind {
        let (mut sink, mut stream) = socket.split();
        let mut heartbeat =
            Heartbeat::new(self.config.heartbeat_interval() * PING_EXPIRY_INTERVALS);

        // Frames captured while disconnected are not replayed
        while self.outbound_rx.try_recv().is_ok() {
            self.status_tx.send_modify(|s| s.metrics.record_lost());
        }

        let config = ClientMessage::Config {
            data: ConfigData {
                audio_buffer_size: self.config.audio_buffer_size,
                compression_enabled: self.config.compression_enabled,
            },
        };
        if let Err(e) = send_json(&mut sink, &config).await {
            self.set_error(&e.to_string());
            return CloseKind::Unclean;
        }

        let period = self.config.heartbeat_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return CloseKind::Requested;
                }
                Some(outbound) = self.outbound_rx.recv() => {
                    let Outbound::Packet(packet) = outbound;
                    if let Err(e) = send_packet(&mut sink, packet).await {
                        self.status_tx.send_modify(|s| s.metrics.record_lost());
                        self.set_error(&e.to_string());
                        return CloseKind::Unclean;
                    }
                    self.status_tx.send_modify(|s| s.metrics.record_sent());
                }
                _ = ticker.tick() => {
                    let ping = heartbeat.ping(Instant::now());
                    if let Err(e) = send_json(&mut sink, &ping).await {
                        self.set_error(&e.to_string());
                        return CloseKind::Unclean;
                    }
                }
                message = stream.next() => match message {
                    None => {
                        tracing::debug!("socket stream ended without close frame");
                        return CloseKind::Unclean;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "socket error");
                        self.set_error(&e.to_string());
                        return CloseKind::Unclean;
                    }
                    Some(Ok(Message::Text(text))) => {
                        self.handle_text(text.as_str(), &mut heartbeat);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let _ = self.events_tx.send(TransportEvent::Audio(bytes.to_vec()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| f.code);
                        tracing::debug!(?code, "server closed connection");
                        return match code {
                            None | Some(CloseCode::Normal | CloseCode::Away) => CloseKind::Clean,
                            Some(_) => CloseKind::Unclean,
                        };
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    fn handle_text(&self, text: &str, heartbeat: &mut Heartbeat) {
        match decode_server_text(text) {
            Ok(ServerMessage::Pong { id }) => match heartbeat.pong(&id, Instant::now()) {
                Some(latency) => {
                    self.status_tx.send_modify(|s| s.record_latency(latency));
                    tracing::trace!(latency_ms = latency.as_millis(), "pong");
                }
                None => tracing::debug!(id = %id, "ignoring unmatched pong"),
            },
            Ok(ServerMessage::AudioResponse { data }) => {
                let _ = self.events_tx.send(TransportEvent::Audio(data));
            }
            Ok(ServerMessage::Transcription { data }) => {
                tracing::debug!(transcript = %data, "server transcription");
                let _ = self.events_tx.send(TransportEvent::Transcription(data));
            }
            Ok(ServerMessage::Error { message }) => {
                tracing::warn!(detail = %message, "server reported error");
                self.status_tx
                    .send_modify(|s| s.last_error = Some(message.clone()));
                let _ = self.events_tx.send(TransportEvent::ServerError {
                    kind: VoiceErrorKind::ServiceUnavailable,
                    message,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "unreadable server message");
                let _ = self.events_tx.send(TransportEvent::ServerError {
                    kind: VoiceErrorKind::ProtocolError,
                    message: e.to_string(),
                });
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status_tx.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            s.transition(state);
            true
        });
    }

    fn set_error(&self, message: &str) {
        self.status_tx.send_modify(|s| {
            s.transition(ConnectionState::Error);
            s.last_error = Some(message.to_string());
        });
    }
}

async fn send_json<S>(sink: &mut S, message: &ClientMessage) -> Result<()>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(message)?;
    sink.send(Message::text(json)).await?;
    Ok(())
}

async fn send_packet<S>(sink: &mut S, packet: VoicePacket) -> Result<()>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    send_json(sink, &packet.header()).await?;
    sink.send(Message::binary(packet.audio_data)).await?;
    Ok(())
}
