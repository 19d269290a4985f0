//! C7: owns one TCP socket, wires C1 → C2 → C3 over it, and is the only
//! task that ever touches the pipeline or dispatcher it holds — per §5,
//! those are mutated exclusively from this single-threaded event loop.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::Config;
use crate::dispatcher::{Dispatcher, Handler, Predicate, SubscriptionId};
use crate::error::{ClientError, Result};
use crate::events::{matches_event_type, subscribe_request};
use crate::framing::LineFramer;
use crate::message::{ControlMessage, MessageAssembler};
use crate::pipeline::{CommandOutcome, CommandPipeline, ReplySink};
use crate::shutdown::Shutdown;

enum TaskCommand {
    Submit {
        text: String,
        sink: ReplySink,
    },
    WatchEvent {
        event_type: String,
        filter: Predicate,
        handler: Handler,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Deregister(SubscriptionId),
}

/// A handle to a running connection task. Cheap to clone; every clone
/// shares the same underlying socket and command queue.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<TaskCommand>,
    shutdown: broadcast::Sender<()>,
}

impl Connection {
    /// Opens a socket to `config.endpoint()`, installs the C1→C2→C3 chain,
    /// and authenticates before returning — matching §4.7's "queues
    /// authenticate and setevents" behavior, except we wait for both so
    /// construction fails loudly rather than leaving a half-open handle.
    #[instrument(skip(config), fields(endpoint = %config.endpoint()))]
    pub async fn open(config: &Config) -> Result<Connection> {
        let stream = TcpStream::connect(config.endpoint()).await?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(stream, command_rx, Shutdown::new(shutdown_rx)));

        let connection = Connection {
            commands: command_tx,
            shutdown: shutdown_tx,
        };

        connection
            .request(format!("AUTHENTICATE \"{}\"\r\n", config.password))
            .await?;
        connection.request(subscribe_request().to_string()).await?;

        debug!("connection authenticated and subscribed to events");
        Ok(connection)
    }

    /// Queues `text` for writing, invoking `sink` once a reply is
    /// assembled or the connection is lost. Never blocks.
    pub fn submit(&self, text: String, sink: ReplySink) {
        if let Err(mpsc::error::SendError(command)) = self.commands.send(TaskCommand::Submit { text, sink }) {
            if let TaskCommand::Submit { sink, .. } = command {
                sink_lost(sink);
            }
        }
    }

    /// Convenience wrapper over `submit` for callers that just want to
    /// `.await` a single command's outcome.
    pub async fn request(&self, text: String) -> Result<ControlMessage> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            text.clone(),
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );

        match rx.await {
            Ok(CommandOutcome::Reply(message)) if message.is_error() => {
                Err(ClientError::protocol(text.trim_end().to_string(), message.raw()))
            }
            Ok(CommandOutcome::Reply(message)) => Ok(message),
            Ok(CommandOutcome::ConnectionLost) | Err(_) => Err(ClientError::ConnectionLost),
        }
    }

    pub async fn watch_event(&self, event_type: String, filter: Predicate, handler: Handler) -> Result<SubscriptionId> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(TaskCommand::WatchEvent {
                event_type,
                filter,
                handler,
                reply: tx,
            })
            .map_err(|_| ClientError::ConnectionLost)?;
        rx.await.map_err(|_| ClientError::ConnectionLost)
    }

    pub fn deregister(&self, id: SubscriptionId) {
        let _ = self.commands.send(TaskCommand::Deregister(id));
    }

    /// Tears down the socket. Pending commands are resolved with
    /// `ConnectionLost` by the task as it exits.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

fn sink_lost(sink: ReplySink) {
    sink(CommandOutcome::ConnectionLost);
}

/// The C1→C2→C3→C4 chain, decoupled from the socket so it can be driven by
/// `run()` against a real connection or by a test feeding raw byte slices
/// (§8: "feed byte slices directly into C1–C6 without a real socket").
#[derive(Default)]
struct ConnectionState {
    framer: LineFramer,
    assembler: MessageAssembler,
    pipeline: CommandPipeline,
    dispatcher: Dispatcher,
}

impl ConnectionState {
    fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes through framing and assembly. Events are
    /// dispatched immediately; completed command replies are returned as
    /// the next command text to write, in arrival order.
    fn ingest(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut writes = Vec::new();
        for line in self.framer.feed(chunk) {
            let Some(message) = self.assembler.push_line(line) else { continue };
            if message.is_event() {
                trace!(status = message.status_code, "event delivered to dispatcher");
                self.dispatcher.dispatch(&message);
            } else if let Some(next) = self.pipeline.handle_reply(message) {
                debug!(command = %next.trim_end(), "command reply received, writing next queued command");
                writes.push(next);
            }
        }
        writes
    }

    /// Queues a command. Returns the text to write if this command became
    /// the one in flight.
    fn submit(&mut self, text: String, sink: ReplySink) -> Option<String> {
        debug!(command = %text.trim_end(), "command submitted");
        self.pipeline.submit(text, sink)
    }

    fn watch_event(&mut self, event_type: String, filter: Predicate, handler: Handler) -> SubscriptionId {
        let predicate: Predicate = Box::new(move |message| matches_event_type(message, &event_type) && filter(message));
        self.dispatcher.register(predicate, handler)
    }

    fn deregister(&mut self, id: SubscriptionId) {
        self.dispatcher.deregister(id);
    }

    fn abort_all(&mut self) {
        self.pipeline.abort_all();
    }
}

#[instrument(skip_all)]
async fn run(stream: TcpStream, mut commands: mpsc::UnboundedReceiver<TaskCommand>, mut shutdown: Shutdown) {
    let (mut reader, mut writer) = stream.into_split();
    let mut state = ConnectionState::new();
    let mut buf = [0u8; 4096];

    'conn: loop {
        tokio::select! {
            read_result = reader.read(&mut buf) => {
                let n = match read_result {
                    Ok(0) => { debug!("peer closed the connection"); break 'conn; }
                    Ok(n) => n,
                    Err(error) => { warn!(%error, "read error, tearing down connection"); break 'conn; }
                };
                for to_write in state.ingest(&buf[..n]) {
                    if let Err(error) = writer.write_all(to_write.as_bytes()).await {
                        error!(%error, "write error, tearing down connection");
                        break 'conn;
                    }
                }
            }
            maybe_command = commands.recv() => {
                let Some(command) = maybe_command else { break 'conn };
                match command {
                    TaskCommand::Submit { text, sink } => {
                        if let Some(to_write) = state.submit(text, sink) {
                            if let Err(error) = writer.write_all(to_write.as_bytes()).await {
                                error!(%error, "write error, tearing down connection");
                                break 'conn;
                            }
                        }
                    }
                    TaskCommand::WatchEvent { event_type, filter, handler, reply } => {
                        let id = state.watch_event(event_type, filter, handler);
                        let _ = reply.send(id);
                    }
                    TaskCommand::Deregister(id) => state.deregister(id),
                }
            }
            _ = shutdown.recv() => {
                debug!("shutdown requested");
                break 'conn;
            }
        }
    }

    state.abort_all();
}

/// Process-wide cache of connections by `host:port`, constructed on first
/// use and torn down on `close` (§4.7).
#[derive(Default)]
pub struct ConnectionManager {
    registry: Mutex<HashMap<String, Connection>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, config: &Config) -> Result<Connection> {
        let mut registry = self.registry.lock().await;
        let key = config.endpoint();
        if let Some(existing) = registry.get(&key) {
            return Ok(existing.clone());
        }

        let connection = Connection::open(config).await?;
        registry.insert(key, connection.clone());
        Ok(connection)
    }

    pub async fn close(&self, config: &Config) {
        let mut registry = self.registry.lock().await;
        if let Some(connection) = registry.remove(&config.endpoint()) {
            connection.shutdown();
        }
    }
}

/// Process-wide registry shared by every [`crate::controller::Controller`]
/// (§4.7: "cache of connections by host:port is process-wide state").
pub static CONNECTIONS: Lazy<ConnectionManager> = Lazy::new(ConnectionManager::new);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn s3_event_is_delivered_before_the_in_flight_commands_reply() {
        let mut state = ConnectionState::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        state.watch_event(
            "STREAM".to_string(),
            Box::new(|_| true),
            Box::new(move |_| o.lock().unwrap().push("event")),
        );

        let o = Arc::clone(&order);
        let write = state.submit(
            "GETINFO version\r\n".to_string(),
            Box::new(move |_| o.lock().unwrap().push("reply")),
        );
        assert_eq!(write, Some("GETINFO version\r\n".to_string()));

        // The event arrives first, then the reply to the already-in-flight
        // GETINFO, both in a single chunk.
        let writes = state.ingest(b"650 STREAM 7 SENTCONNECT 4 example.com:443\r\n250 OK\r\n");
        assert!(writes.is_empty(), "nothing else was queued behind the in-flight command");

        assert_eq!(*order.lock().unwrap(), vec!["event", "reply"]);
    }

    #[test]
    fn command_reply_triggers_the_next_queued_write() {
        let mut state = ConnectionState::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        let write_a = state.submit("A\r\n".to_string(), Box::new(move |_| o.lock().unwrap().push("A")));
        assert_eq!(write_a, Some("A\r\n".to_string()));

        let o = Arc::clone(&order);
        let write_b = state.submit("B\r\n".to_string(), Box::new(move |_| o.lock().unwrap().push("B")));
        assert_eq!(write_b, None, "B must not be written while A is in flight");

        let writes = state.ingest(b"250 OK\r\n");
        assert_eq!(writes, vec!["B\r\n".to_string()]);
        assert_eq!(*order.lock().unwrap(), vec!["A"]);
    }
}
