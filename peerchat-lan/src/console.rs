//! Line console standing in for a chat UI.

use peerchat_core::{ChatError, Direction, PeerIdentity, SessionHandle, SessionSnapshot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};

const USAGE: &str = "commands: /advertise /stop-advertising /browse /stop-browsing \
                     /connect <name> /file <path> /peers /quit";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Advertise,
    StopAdvertising,
    Browse,
    StopBrowsing,
    Connect(PeerIdentity),
    File(String),
    Peers,
    Quit,
    Text(String),
}

pub fn parse_line(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(ConsoleCommand::Text(line.to_string()));
    };
    let (cmd, arg) = match rest.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };
    let command = match (cmd, arg) {
        ("advertise", _) => ConsoleCommand::Advertise,
        ("stop-advertising", _) => ConsoleCommand::StopAdvertising,
        ("browse", _) => ConsoleCommand::Browse,
        ("stop-browsing", _) => ConsoleCommand::StopBrowsing,
        ("connect", name) if !name.is_empty() => ConsoleCommand::Connect(PeerIdentity::new(name)),
        ("file", path) if !path.is_empty() => ConsoleCommand::File(path.to_string()),
        ("peers", _) => ConsoleCommand::Peers,
        ("quit", _) => ConsoleCommand::Quit,
        _ => {
            eprintln!("{}", USAGE);
            return None;
        }
    };
    Some(command)
}

/// Read stdin until EOF or /quit.
pub async fn run(session: SessionHandle) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Some(ConsoleCommand::Advertise) => session.start_advertising(),
            Some(ConsoleCommand::StopAdvertising) => session.stop_advertising(),
            Some(ConsoleCommand::Browse) => session.start_browsing(),
            Some(ConsoleCommand::StopBrowsing) => session.stop_browsing(),
            Some(ConsoleCommand::Connect(peer)) => session.connect(peer),
            Some(ConsoleCommand::File(path)) => session.send_document(path),
            Some(ConsoleCommand::Peers) => {
                let peers = session.snapshot().borrow().discovered.clone();
                if peers.is_empty() {
                    println!("no peers found");
                }
                for (i, peer) in peers.iter().enumerate() {
                    println!("{:>2}. {}", i + 1, peer);
                }
            }
            Some(ConsoleCommand::Quit) => break,
            Some(ConsoleCommand::Text(text)) => session.send_text(text),
            None => {}
        }
    }
    Ok(())
}

/// Print state changes and new log entries as they land.
pub async fn print_updates(mut snapshot: watch::Receiver<SessionSnapshot>) {
    let mut last_state = snapshot.borrow().state.clone();
    let mut seen_messages = 0;
    let mut seen_documents = 0;
    let mut seen_peers = Vec::new();
    while snapshot.changed().await.is_ok() {
        let s = snapshot.borrow_and_update().clone();
        if s.state != last_state {
            println!("* {}", s.state);
            last_state = s.state.clone();
        }
        for peer in s.discovered.iter().filter(|p| !seen_peers.contains(*p)) {
            println!("* found {}", peer);
        }
        seen_peers = s.discovered.clone();
        let from = s
            .state
            .active_peer()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "peer".to_string());
        for m in s.messages.iter().skip(seen_messages) {
            match m.direction {
                Direction::Sent => println!("me: {}", m.text),
                Direction::Received => println!("{}: {}", from, m.text),
            }
        }
        seen_messages = s.messages.len();
        for d in s.documents.iter().skip(seen_documents) {
            let who = match d.direction {
                Direction::Sent => "me",
                Direction::Received => from.as_str(),
            };
            println!("{}: [file] {} ({} bytes)", who, d.file_name, d.file_bytes.len());
        }
        seen_documents = s.documents.len();
    }
}

pub async fn print_reports(mut reports: broadcast::Receiver<ChatError>) {
    loop {
        match reports.recv().await {
            Ok(e) => eprintln!("! {}", e),
            Err(broadcast::error::RecvError::Lagged(n)) => eprintln!("! {} reports dropped", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
