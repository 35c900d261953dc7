use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use parlor::client::{ConversationClient, UserIntent};
use parlor::session::{ConversationMode, SessionConfig, SessionEvent, SessionPhase, StatusNotice};
use parlor::transport::{HttpTransport, PollTransport};

#[derive(Parser, Debug)]
#[command(
    name = "parlor",
    about = "Two-party chat and tile-board client over HTTP long-polling",
    version
)]
struct Cli {
    /// Base URL of the conversation server.
    #[arg(
        long,
        env = "PARLOR_SERVER",
        default_value = "http://127.0.0.1:5142"
    )]
    server: String,

    /// Room to join.
    #[arg(long, env = "PARLOR_ROOM", default_value = "default")]
    room: String,

    /// Name shown to the other participant.
    #[arg(long, env = "PARLOR_NAME", default_value = "ludanto")]
    name: String,

    /// Join the tile-game variant instead of plain chat.
    #[arg(long)]
    game: bool,

    /// Use the completion-only transport binding instead of streaming
    /// reads.
    #[arg(long)]
    buffered: bool,
}

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<SessionPhase> {
    let cli = Cli::parse();
    let mode = if cli.game {
        ConversationMode::Game
    } else {
        ConversationMode::Chat
    };
    let config = SessionConfig::new(&cli.server, &cli.room, &cli.name, mode)?;
    let transport: Arc<dyn PollTransport> = if cli.buffered {
        Arc::new(HttpTransport::buffered()?)
    } else {
        Arc::new(HttpTransport::new()?)
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (intents_tx, intents_rx) = mpsc::unbounded_channel();

    let client = ConversationClient::new(config, transport);
    let mut client_task = tokio::spawn(client.run(events_tx, intents_rx));

    let stdin_task = tokio::spawn(read_stdin(intents_tx));

    let phase = loop {
        tokio::select! {
            event = events_rx.recv() => {
                if let Some(event) = event {
                    render(&event);
                }
            }
            result = &mut client_task => {
                while let Ok(event) = events_rx.try_recv() {
                    render(&event);
                }
                stdin_task.abort();
                break result??;
            }
        }
    };
    Ok(phase)
}

async fn read_stdin(intents: mpsc::UnboundedSender<UserIntent>) {
    let mut lines = BufReader::new(io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line == "/quit" {
            let _ = intents.send(UserIntent::Leave);
            break;
        }
        if let Some(rest) = line.strip_prefix("/flip ") {
            match rest.trim().parse() {
                Ok(tile) => {
                    let _ = intents.send(UserIntent::FlipTile(tile));
                }
                Err(_) => eprintln!("usage: /flip <tile-number>"),
            }
        } else if !line.is_empty() {
            let _ = intents.send(UserIntent::SendChat(line));
        }
    }
}

fn render(event: &SessionEvent) {
    match event {
        SessionEvent::PhaseChanged(phase) => println!("* phase: {phase:?}"),
        SessionEvent::StatusNotice(notice) => println!("* {}", notice_text(notice)),
        SessionEvent::ChatAppended {
            name, mine, text, ..
        } => {
            let who = if *mine {
                "you"
            } else if name.is_empty() {
                "stranger"
            } else {
                name.as_str()
            };
            println!("<{who}> {text}");
        }
        SessionEvent::PlayerChanged { num, player } => {
            let name = if player.name.is_empty() {
                "(unnamed)"
            } else {
                player.name.as_str()
            };
            let mut flags = String::new();
            if player.typing {
                flags.push_str(" [typing]");
            }
            if !player.connected {
                flags.push_str(" [disconnected]");
            }
            println!("* player {num}: {name}{flags}");
        }
        SessionEvent::TileChanged {
            num,
            tile,
            moved,
            revealed,
        } => {
            let moved = if *moved { " moved" } else { "" };
            let revealed = if *revealed { " revealed" } else { "" };
            match tile.letter {
                Some(letter) => println!(
                    "* tile {num} '{letter}' at ({}, {}){revealed}{moved}",
                    tile.x, tile.y
                ),
                None => println!(
                    "* tile {num} face down at ({}, {}){moved}",
                    tile.x, tile.y
                ),
            }
        }
    }
}

fn notice_text(notice: &StatusNotice) -> &'static str {
    match notice {
        StatusNotice::WaitingForPartner => "Waiting for someone to join the conversation",
        StatusNotice::ConversationStarted => "You are in a conversation. Say hello!",
        StatusNotice::PartnerLeft => "The other person has left the conversation",
        StatusNotice::BadDataReceived => "The server sent some invalid data",
        StatusNotice::ConnectionFailed => "An error occurred talking to the server",
    }
}
