//! The authoritative conversation state. All mutation flows through
//! [`Session::apply`], driven by decoded wire records; the renderer
//! only ever sees the [`SessionEvent`]s that fall out.

use thiserror::Error;
use tracing::trace;
use url::Url;

use parlor_proto::{InboundMessage, RemotePhase};

use crate::cache::{BoardCache, Player, Tile};

/// Which flavor of conversation the server speaks. A plain chat room
/// pairs two strangers and announces phase changes explicitly; a game
/// room is live as soon as the header arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationMode {
    Chat,
    Game,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    AwaitingPartner,
    InProgress,
    Done,
    Error,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Done | SessionPhase::Error)
    }
}

/// Semantic status notifications for the front-end to render however it
/// likes. Wording and localization stay out of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusNotice {
    WaitingForPartner,
    ConversationStarted,
    PartnerLeft,
    BadDataReceived,
    ConnectionFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    StatusNotice(StatusNotice),
    ChatAppended {
        person: u32,
        name: String,
        mine: bool,
        text: String,
    },
    PlayerChanged {
        num: u32,
        player: Player,
    },
    TileChanged {
        num: u32,
        tile: Tile,
        moved: bool,
        revealed: bool,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    base_url: Url,
    room: String,
    display_name: String,
    mode: ConversationMode,
}

impl SessionConfig {
    pub fn new(
        server_base_url: impl AsRef<str>,
        room: impl Into<String>,
        display_name: impl Into<String>,
        mode: ConversationMode,
    ) -> Result<Self, SessionError> {
        let mut base = server_base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(SessionError::InvalidConfig(
                "server base url cannot be empty".into(),
            ));
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{}", base);
        }
        let parsed = Url::parse(&base)
            .map_err(|err| SessionError::InvalidConfig(format!("invalid server url: {err}")))?;
        let room = room.into();
        if room.is_empty() {
            return Err(SessionError::InvalidConfig("room name cannot be empty".into()));
        }
        let display_name = display_name.into();
        if display_name.is_empty() {
            return Err(SessionError::InvalidConfig(
                "display name cannot be empty".into(),
            ));
        }
        Ok(Self {
            base_url: parsed,
            room,
            display_name,
            mode,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn mode(&self) -> ConversationMode {
        self.mode
    }
}

pub struct Session {
    mode: ConversationMode,
    phase: SessionPhase,
    person_id: Option<String>,
    person_number: Option<u32>,
    /// Chat messages consumed so far. Doubles as the resume cursor for
    /// the next watch exchange, so dedup accounting and resumption can
    /// never drift apart.
    next_message_number: u64,
    /// Cursor the current exchange was opened with; the server replays
    /// from here.
    exchange_base: u64,
    /// Chat records seen within the current exchange.
    exchange_chat_index: u64,
    cache: BoardCache,
}

impl Session {
    pub fn new(mode: ConversationMode) -> Self {
        Self {
            mode,
            phase: SessionPhase::Connecting,
            person_id: None,
            person_number: None,
            next_message_number: 0,
            exchange_base: 0,
            exchange_chat_index: 0,
            cache: BoardCache::default(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn person_id(&self) -> Option<&str> {
        self.person_id.as_deref()
    }

    pub fn person_number(&self) -> Option<u32> {
        self.person_number
    }

    pub fn next_message_number(&self) -> u64 {
        self.next_message_number
    }

    pub fn cache(&self) -> &BoardCache {
        &self.cache
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Called when a watch exchange is opened. `base` is the resume
    /// cursor the request carried; chat records in the exchange are
    /// numbered from it.
    pub fn begin_exchange(&mut self, base: u64) {
        self.exchange_base = base;
        self.exchange_chat_index = 0;
    }

    /// Applies one decoded record, returning the renderer events it
    /// produced. Records whose precondition phase does not match are
    /// dropped: with long-poll redelivery they are expected, not errors.
    pub fn apply(&mut self, message: InboundMessage) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match message {
            InboundMessage::Header { num, id } => {
                if self.phase != SessionPhase::Connecting {
                    trace!(target = "session", ?num, "stale header dropped");
                    return events;
                }
                self.person_number = Some(num);
                self.person_id = Some(id);
                match self.mode {
                    ConversationMode::Chat => {
                        self.set_phase(SessionPhase::AwaitingPartner, &mut events);
                        events.push(SessionEvent::StatusNotice(StatusNotice::WaitingForPartner));
                    }
                    ConversationMode::Game => {
                        self.set_phase(SessionPhase::InProgress, &mut events);
                        events.push(SessionEvent::StatusNotice(StatusNotice::ConversationStarted));
                    }
                }
            }
            InboundMessage::StateChanged(RemotePhase::InProgress) => {
                if self.phase != SessionPhase::AwaitingPartner {
                    trace!(target = "session", "stale in-progress announcement dropped");
                    return events;
                }
                self.set_phase(SessionPhase::InProgress, &mut events);
                events.push(SessionEvent::StatusNotice(StatusNotice::ConversationStarted));
            }
            InboundMessage::StateChanged(RemotePhase::Done) | InboundMessage::End => {
                if self.phase != SessionPhase::InProgress {
                    trace!(target = "session", "stale end-of-conversation dropped");
                    return events;
                }
                self.set_phase(SessionPhase::Done, &mut events);
                events.push(SessionEvent::StatusNotice(StatusNotice::PartnerLeft));
            }
            InboundMessage::Chat { person, text } => {
                if self.phase != SessionPhase::InProgress {
                    trace!(target = "session", person, "chat outside conversation dropped");
                    return events;
                }
                let implied = self.exchange_base + self.exchange_chat_index;
                self.exchange_chat_index += 1;
                if implied < self.next_message_number {
                    trace!(target = "session", implied, "redelivered chat dropped");
                    return events;
                }
                self.next_message_number = implied + 1;
                let name = self
                    .cache
                    .player(person)
                    .map(|player| player.name.clone())
                    .unwrap_or_default();
                events.push(SessionEvent::ChatAppended {
                    person,
                    name,
                    mine: Some(person) == self.person_number,
                    text,
                });
            }
            InboundMessage::PlayerName { num, name } => {
                if self.phase != SessionPhase::InProgress {
                    trace!(target = "session", num, "player name outside conversation dropped");
                    return events;
                }
                let player = self.cache.set_player_name(num, name);
                events.push(SessionEvent::PlayerChanged { num, player });
            }
            InboundMessage::Player {
                num,
                typing,
                connected,
            } => {
                if self.phase != SessionPhase::InProgress {
                    trace!(target = "session", num, "player flags outside conversation dropped");
                    return events;
                }
                let player = self.cache.set_player_flags(num, typing, connected);
                events.push(SessionEvent::PlayerChanged { num, player });
            }
            InboundMessage::Tile(update) => {
                if self.phase != SessionPhase::InProgress {
                    trace!(target = "session", num = update.num, "tile outside conversation dropped");
                    return events;
                }
                let (tile, delta) = self.cache.apply_tile(&update);
                events.push(SessionEvent::TileChanged {
                    num: update.num,
                    tile,
                    moved: delta.moved,
                    revealed: delta.revealed,
                });
            }
        }
        events
    }

    /// Forces the session into the error phase. Terminal phases are
    /// left alone so teardown stays idempotent and a finished
    /// conversation is never reported as a failure.
    pub fn fail(&mut self, notice: StatusNotice) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.is_terminal() {
            return events;
        }
        self.set_phase(SessionPhase::Error, &mut events);
        events.push(SessionEvent::StatusNotice(notice));
        events
    }

    fn set_phase(&mut self, phase: SessionPhase, events: &mut Vec<SessionEvent>) {
        self.phase = phase;
        events.push(SessionEvent::PhaseChanged(phase));
    }
}
