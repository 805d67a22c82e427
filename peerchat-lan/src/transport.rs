//! Session links: TCP listener (incoming invitations), TCP client (outbound invites),
//! hello exchange + encrypted frames.

use std::collections::HashMap;
use std::io::{Error, ErrorKind};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use peerchat_core::identity::{decrypt_wire, derive_session_key, encrypt_wire, LinkRole};
use peerchat_core::wire::{decode_frame, encode_frame, frame_len};
use peerchat_core::{
    EventSender, Keypair, LinkMessage, PeerConnectionState, PeerIdentity, TransportError,
    TransportEvent, PROTOCOL_VERSION,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const LEN_SIZE: usize = 4;
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound invite request handed to the transport task.
pub struct InviteRequest {
    pub peer: PeerIdentity,
    pub addr: SocketAddr,
    pub timeout: Duration,
}

/// Writer of one established link. Dropping it closes the link.
struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<LinkMessage>,
}

#[derive(Default)]
struct LinkTable {
    /// Invitations waiting for the session's answer.
    pending: HashMap<PeerIdentity, oneshot::Sender<bool>>,
    /// At most one link per peer.
    connected: HashMap<PeerIdentity, Link>,
    next_link: u64,
}

/// Link bookkeeping shared by the adapter and the link tasks.
#[derive(Clone)]
pub struct Links {
    table: Arc<Mutex<LinkTable>>,
    invite_tx: mpsc::UnboundedSender<InviteRequest>,
}

impl Links {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InviteRequest>) {
        let (invite_tx, invite_rx) = mpsc::unbounded_channel();
        let links = Links {
            table: Arc::new(Mutex::new(LinkTable::default())),
            invite_tx,
        };
        (links, invite_rx)
    }

    fn table(&self) -> MutexGuard<'_, LinkTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an outbound invite. Existing links are closed first.
    pub fn invite(&self, request: InviteRequest) -> Result<(), TransportError> {
        self.close_all();
        self.invite_tx
            .send(request)
            .map_err(|_| TransportError::NotRunning)
    }

    /// Answer a pending invitation. Accepting closes every other link.
    pub fn respond(&self, inviter: &PeerIdentity, accept: bool) -> Result<(), TransportError> {
        let answer = self
            .table()
            .pending
            .remove(inviter)
            .ok_or_else(|| TransportError::UnknownPeer(inviter.clone()))?;
        if accept {
            self.close_all();
        }
        answer
            .send(accept)
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Queue `bytes` on every established link.
    pub fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let table = self.table();
        if table.connected.is_empty() {
            return Err(TransportError::NoConnectedPeers);
        }
        let mut delivered = 0;
        for (peer, link) in &table.connected {
            if link.tx.send(LinkMessage::Data(bytes.to_vec())).is_ok() {
                delivered += 1;
            } else {
                debug!(%peer, "link writer gone");
            }
        }
        if delivered == 0 {
            return Err(TransportError::ChannelClosed);
        }
        Ok(())
    }

    /// Drop every link writer; each link task then shuts its socket and reports
    /// `NotConnected`.
    pub fn close_all(&self) {
        let closed: Vec<PeerIdentity> = self.table().connected.drain().map(|(p, _)| p).collect();
        for peer in closed {
            info!(%peer, "closing link");
        }
    }

    pub(crate) fn register(
        &self,
        peer: PeerIdentity,
        tx: mpsc::UnboundedSender<LinkMessage>,
    ) -> u64 {
        let mut table = self.table();
        table.next_link += 1;
        let id = table.next_link;
        if table.connected.insert(peer.clone(), Link { id, tx }).is_some() {
            debug!(%peer, "link replaced");
        }
        id
    }

    /// Forget link `id` of `peer`. Returns false when a newer link to the same peer
    /// has taken its place, which is left alone.
    fn unregister(&self, peer: &PeerIdentity, id: u64) -> bool {
        let mut table = self.table();
        let superseded = table.connected.get(peer).is_some_and(|l| l.id != id);
        if !superseded {
            table.connected.remove(peer);
        }
        !superseded
    }
}

/// Listen for incoming invitations on `transport_port`; connect outbound for every
/// request pushed to `invite_rx`.
pub async fn run_transport(
    links: Links,
    keypair: Arc<Keypair>,
    name: PeerIdentity,
    transport_port: u16,
    invite_rx: mpsc::UnboundedReceiver<InviteRequest>,
    events: EventSender,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", transport_port)).await?;
    info!(port = transport_port, "session listener ready");
    serve(listener, links, keypair, name, invite_rx, events).await
}

async fn serve(
    listener: TcpListener,
    links: Links,
    keypair: Arc<Keypair>,
    name: PeerIdentity,
    mut invite_rx: mpsc::UnboundedReceiver<InviteRequest>,
    events: EventSender,
) -> std::io::Result<()> {
    let accept_links = links.clone();
    let accept_keypair = keypair.clone();
    let accept_name = name.clone();
    let accept_events = events.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, from)) => {
                    let links = accept_links.clone();
                    let keypair = accept_keypair.clone();
                    let name = accept_name.clone();
                    let events = accept_events.clone();
                    tokio::spawn(async move {
                        let result = accept_invitation(stream, links, &keypair, name, events).await;
                        if let Err(e) = result {
                            debug!(%from, error = %e, "incoming link closed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    });

    while let Some(request) = invite_rx.recv().await {
        let links = links.clone();
        let keypair = keypair.clone();
        let name = name.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let peer = request.peer.clone();
            if let Err(e) = send_invitation(request, links, &keypair, name, events.clone()).await {
                info!(%peer, error = %e, "invite failed");
                let _ = events.send(TransportEvent::ConnectionStateChanged(
                    peer,
                    PeerConnectionState::NotConnected,
                ));
            }
        });
    }
    Ok(())
}

/// Invitee side: hello, wait for the invite, ask the session, answer, then serve the link.
async fn accept_invitation(
    mut stream: TcpStream,
    links: Links,
    keypair: &Keypair,
    name: PeerIdentity,
    events: EventSender,
) -> std::io::Result<()> {
    let hello = exchange_hello(&mut stream, keypair, name);
    let (peer, shared) = tokio::time::timeout(HELLO_TIMEOUT, hello)
        .await
        .map_err(|_| Error::new(ErrorKind::TimedOut, "hello timed out"))??;
    let mut cipher = LinkCipher::new(&shared, LinkRole::Invitee);

    let (mut reader, mut writer) = stream.into_split();
    match cipher.read(&mut reader).await? {
        LinkMessage::Invite => {}
        other => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("expected invite, got {:?}", other),
            ))
        }
    }

    let (answer_tx, answer_rx) = oneshot::channel();
    links.table().pending.insert(peer.clone(), answer_tx);
    if events
        .send(TransportEvent::InvitationReceived(peer.clone()))
        .is_err()
    {
        links.table().pending.remove(&peer);
        return Ok(());
    }
    // Dropped without an answer counts as a decline.
    let accepted = answer_rx.await.unwrap_or(false);
    cipher
        .write(&mut writer, &LinkMessage::InviteResponse { accepted })
        .await?;
    if !accepted {
        return Ok(());
    }
    run_link(reader, writer, cipher, peer, links, events).await;
    Ok(())
}

/// Inviter side: connect, hello, invite, wait for the answer within `timeout`.
async fn send_invitation(
    request: InviteRequest,
    links: Links,
    keypair: &Keypair,
    name: PeerIdentity,
    events: EventSender,
) -> std::io::Result<()> {
    let _ = events.send(TransportEvent::ConnectionStateChanged(
        request.peer.clone(),
        PeerConnectionState::Connecting,
    ));
    let handshake = async {
        let mut stream = TcpStream::connect(request.addr).await?;
        let (peer, shared) = exchange_hello(&mut stream, keypair, name).await?;
        if peer != request.peer {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("expected {}, reached {}", request.peer, peer),
            ));
        }
        let mut cipher = LinkCipher::new(&shared, LinkRole::Inviter);
        let (mut reader, mut writer) = stream.into_split();
        cipher.write(&mut writer, &LinkMessage::Invite).await?;
        match cipher.read(&mut reader).await? {
            LinkMessage::InviteResponse { accepted } => Ok((reader, writer, cipher, accepted)),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("expected invite response, got {:?}", other),
            )),
        }
    };
    let (reader, writer, cipher, accepted) = tokio::time::timeout(request.timeout, handshake)
        .await
        .map_err(|_| Error::new(ErrorKind::TimedOut, "invitation timed out"))??;
    if !accepted {
        return Err(Error::new(ErrorKind::ConnectionRefused, "invitation declined"));
    }
    run_link(reader, writer, cipher, request.peer, links, events).await;
    Ok(())
}

/// Exchange plaintext hellos. Returns the peer's name and the shared secret.
async fn exchange_hello(
    stream: &mut TcpStream,
    keypair: &Keypair,
    name: PeerIdentity,
) -> std::io::Result<(PeerIdentity, [u8; 32])> {
    let hello = LinkMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        name,
        public_key: keypair.public_key().clone(),
    };
    let frame = encode_frame(&hello).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
    let (mut r, mut w) = stream.split();
    w.write_all(&frame).await?;
    w.flush().await?;
    let raw = read_frame(&mut r).await?;
    let (msg, _) = decode_frame(&raw).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
    match msg {
        LinkMessage::Hello {
            protocol_version,
            name,
            public_key,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "unsupported protocol version",
                ));
            }
            Ok((name, keypair.shared_secret(&public_key)))
        }
        other => Err(Error::new(
            ErrorKind::InvalidData,
            format!("expected hello, got {:?}", other),
        )),
    }
}

/// Read one length-prefixed frame, prefix included.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; LEN_SIZE];
    reader.read_exact(&mut buf).await?;
    let len = frame_len(&buf).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
    buf.resize(LEN_SIZE + len, 0);
    reader.read_exact(&mut buf[LEN_SIZE..]).await?;
    Ok(buf)
}

/// Per-direction keys and nonce counters of one link.
struct LinkCipher {
    send_key: [u8; 32],
    recv_key: [u8; 32],
    send_nonce: u64,
    recv_nonce: u64,
}

impl LinkCipher {
    fn new(shared: &[u8; 32], role: LinkRole) -> Self {
        let other = match role {
            LinkRole::Inviter => LinkRole::Invitee,
            LinkRole::Invitee => LinkRole::Inviter,
        };
        Self {
            send_key: derive_session_key(shared, role),
            recv_key: derive_session_key(shared, other),
            send_nonce: 0,
            recv_nonce: 0,
        }
    }

    /// Encrypt a framed message and write it behind its own length prefix.
    async fn write<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        msg: &LinkMessage,
    ) -> std::io::Result<()> {
        let plain = encode_frame(msg).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        let sealed = encrypt_wire(&self.send_key, self.send_nonce, &plain)
            .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        self.send_nonce = self.send_nonce.saturating_add(1);
        writer.write_all(&(sealed.len() as u32).to_le_bytes()).await?;
        writer.write_all(&sealed).await?;
        writer.flush().await
    }

    async fn read<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> std::io::Result<LinkMessage> {
        let raw = read_frame(reader).await?;
        let plain = decrypt_wire(&self.recv_key, self.recv_nonce, &raw[LEN_SIZE..])
            .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        self.recv_nonce = self.recv_nonce.saturating_add(1);
        let (msg, _) = decode_frame(&plain).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        Ok(msg)
    }
}

/// Serve an established link until either side closes it or its writer is dropped
/// from the link table.
async fn run_link(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    cipher: LinkCipher,
    peer: PeerIdentity,
    links: Links,
    events: EventSender,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<LinkMessage>();
    let id = links.register(peer.clone(), tx);
    info!(%peer, "link established");
    let _ = events.send(TransportEvent::ConnectionStateChanged(
        peer.clone(),
        PeerConnectionState::Connected,
    ));

    let LinkCipher {
        send_key,
        recv_key,
        send_nonce,
        recv_nonce,
    } = cipher;
    let mut write_half = LinkCipher {
        send_key,
        recv_key,
        send_nonce,
        recv_nonce: 0,
    };
    let mut read_half = LinkCipher {
        send_key,
        recv_key,
        send_nonce: 0,
        recv_nonce,
    };

    let writer_peer = peer.clone();
    let mut writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_half.write(&mut writer, &msg).await {
                debug!(peer = %writer_peer, error = %e, "link write failed");
                break;
            }
        }
        // Dropping the write half here sends FIN to the peer.
    });

    loop {
        tokio::select! {
            read = read_half.read(&mut reader) => match read {
                Ok(LinkMessage::Data(bytes)) => {
                    if events
                        .send(TransportEvent::DataReceived(peer.clone(), bytes))
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(other) => debug!(%peer, message = ?other, "unexpected message on link"),
                Err(e) => {
                    debug!(%peer, error = %e, "link read ended");
                    break;
                }
            },
            _ = &mut writer_task => {
                debug!(%peer, "link writer finished");
                break;
            }
        }
    }

    writer_task.abort();
    info!(%peer, "link closed");
    if links.unregister(&peer, id) {
        let _ = events.send(TransportEvent::ConnectionStateChanged(
            peer,
            PeerConnectionState::NotConnected,
        ));
    }
}
