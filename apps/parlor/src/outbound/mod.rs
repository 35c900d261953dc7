//! Pending user commands and the pacing rules for the single outbound
//! exchange. The queue only ever holds chat text and tile flips; typing
//! toggles and keep-alives are derived on demand when the queue is dry.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::session::SessionPhase;

/// Idle gap after which a keep-alive is owed. The server expires
/// participants who stay silent much longer than this.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(150);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    SendChat(String),
    FlipTile(u32),
    SetTyping(bool),
    KeepAlive,
    Leave,
}

#[derive(Debug)]
pub struct CommandDispatcher {
    queue: VecDeque<OutboundCommand>,
    typing_now: bool,
    sent_typing: bool,
    last_exchange: Instant,
    keep_alive_interval: Duration,
}

impl CommandDispatcher {
    pub fn new(keep_alive_interval: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            typing_now: false,
            sent_typing: false,
            last_exchange: Instant::now(),
            keep_alive_interval,
        }
    }

    pub fn enqueue_chat(&mut self, text: String) {
        self.queue.push_back(OutboundCommand::SendChat(text));
        // Sending consumes the input, so the user is no longer typing.
        self.typing_now = false;
    }

    /// Queues a flip unless the same tile is already pending. Returns
    /// whether anything was added.
    pub fn enqueue_flip(&mut self, tile: u32) -> bool {
        let duplicate = self
            .queue
            .iter()
            .any(|command| *command == OutboundCommand::FlipTile(tile));
        if duplicate {
            return false;
        }
        self.queue.push_back(OutboundCommand::FlipTile(tile));
        true
    }

    pub fn set_typing(&mut self, typing: bool) {
        self.typing_now = typing;
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Marks the start of any exchange (inbound watch or outbound
    /// command), resetting the keep-alive clock.
    pub fn note_exchange_started(&mut self, now: Instant) {
        self.last_exchange = now;
    }

    /// Picks the next command to put on the wire, or `None` when
    /// nothing is owed. Queued commands win, then a typing-state
    /// correction, then a keep-alive once the idle gap is exceeded.
    pub fn next_command(&mut self, phase: SessionPhase, now: Instant) -> Option<OutboundCommand> {
        if let Some(command) = self.queue.pop_front() {
            if matches!(command, OutboundCommand::SendChat(_)) {
                // The server infers typing stopped from a sent message.
                self.sent_typing = false;
            }
            return Some(command);
        }
        if phase == SessionPhase::InProgress && self.typing_now != self.sent_typing {
            self.sent_typing = self.typing_now;
            return Some(OutboundCommand::SetTyping(self.typing_now));
        }
        let alive = matches!(
            phase,
            SessionPhase::AwaitingPartner | SessionPhase::InProgress
        );
        if alive && now.duration_since(self.last_exchange) >= self.keep_alive_interval {
            return Some(OutboundCommand::KeepAlive);
        }
        None
    }
}
