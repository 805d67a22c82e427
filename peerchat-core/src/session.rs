//! Single-writer session task.
//!
//! Commands from the presentation side and events from the transport are funneled
//! into one tokio task that owns the `ChatCore`, so registry and log mutations never
//! interleave. Observers read state through a watch channel and receive non-fatal
//! failures on a broadcast channel.

use std::path::PathBuf;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{ChatCore, SessionSnapshot};
use crate::error::ChatError;
use crate::identity::PeerIdentity;
use crate::transport::{TransportAdapter, TransportEvent};

const REPORT_CAPACITY: usize = 64;

#[derive(Debug)]
enum Command {
    StartAdvertising,
    StopAdvertising,
    StartBrowsing,
    StopBrowsing,
    Connect(PeerIdentity),
    SendText(String),
    SendDocument(PathBuf),
}

/// Sender the transport adapter pushes its events into.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Cloneable front door to a running session. Commands are fire-and-forget;
/// failures surface on `reports()`.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    reports: broadcast::Sender<ChatError>,
}

impl SessionHandle {
    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("session task has stopped; command dropped");
        }
    }

    pub fn start_advertising(&self) {
        self.submit(Command::StartAdvertising);
    }

    pub fn stop_advertising(&self) {
        self.submit(Command::StopAdvertising);
    }

    pub fn start_browsing(&self) {
        self.submit(Command::StartBrowsing);
    }

    pub fn stop_browsing(&self) {
        self.submit(Command::StopBrowsing);
    }

    pub fn connect(&self, peer: PeerIdentity) {
        self.submit(Command::Connect(peer));
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.submit(Command::SendText(text.into()));
    }

    pub fn send_document(&self, path: impl Into<PathBuf>) {
        self.submit(Command::SendDocument(path.into()));
    }

    /// Latest state. Call `changed()` on the receiver to wait for updates.
    pub fn snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn reports(&self) -> broadcast::Receiver<ChatError> {
        self.reports.subscribe()
    }
}

pub struct ChatSession<T: TransportAdapter> {
    core: ChatCore<T>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventReceiver,
    snapshot: watch::Sender<SessionSnapshot>,
    reports: broadcast::Sender<ChatError>,
}

impl<T: TransportAdapter + 'static> ChatSession<T> {
    /// Spawn the session task on the current tokio runtime.
    pub fn spawn(core: ChatCore<T>, events: EventReceiver) -> (SessionHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(core.snapshot());
        let (report_tx, _) = broadcast::channel(REPORT_CAPACITY);
        let handle = SessionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            reports: report_tx.clone(),
        };
        let session = ChatSession {
            core,
            commands: command_rx,
            events,
            snapshot: snapshot_tx,
            reports: report_tx,
        };
        let task = tokio::spawn(session.run());
        (handle, task)
    }

    /// Process commands and events one at a time until both sources are gone.
    async fn run(mut self) {
        let mut commands_open = true;
        let mut events_open = true;
        while commands_open || events_open {
            let result = tokio::select! {
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.apply(command),
                    None => {
                        commands_open = false;
                        continue;
                    }
                },
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.core.handle_event(event),
                    None => {
                        events_open = false;
                        continue;
                    }
                },
            };
            if let Err(e) = result {
                warn!(error = %e, "session operation failed");
                // No subscribers is fine; the failure is already logged.
                let _ = self.reports.send(e);
            }
            self.snapshot.send_replace(self.core.snapshot());
        }
        debug!("session task finished");
    }

    fn apply(&mut self, command: Command) -> Result<(), ChatError> {
        debug!(?command, "session command");
        match command {
            Command::StartAdvertising => self.core.start_advertising(),
            Command::StopAdvertising => self.core.stop_advertising(),
            Command::StartBrowsing => self.core.start_browsing(),
            Command::StopBrowsing => self.core.stop_browsing(),
            Command::Connect(peer) => self.core.connect(&peer),
            Command::SendText(text) => self.core.send_text(&text),
            Command::SendDocument(path) => self.core.send_document(&path),
        }
    }
}
