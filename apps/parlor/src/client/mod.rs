//! The long-poll orchestrator: one cooperative event loop that owns
//! the session, keeps exactly one inbound watch exchange open, paces
//! outbound commands one at a time, and feeds decoded records through
//! the state machine. Everything the front-end sees arrives on the
//! event channel; everything the user does arrives on the intent
//! channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use parlor_proto::{next_record, ProtocolError};

use crate::outbound::{CommandDispatcher, OutboundCommand, KEEP_ALIVE_INTERVAL};
use crate::session::{Session, SessionConfig, SessionEvent, SessionPhase, StatusNotice};
use crate::transport::{endpoints, PollTransport, TransportError, WatchExchange};

/// Some environments only notify on exchange completion, so a timer
/// re-runs the idempotent decode pass at this cadence as a floor on
/// delivery latency.
const DECODE_FALLBACK_INTERVAL: Duration = Duration::from_secs(3);
/// Upper bound on the best-effort leave notification at teardown.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

/// What the local user wants, delivered by the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIntent {
    SendChat(String),
    FlipTile(u32),
    /// Whether the input field currently holds unsent text.
    TypingChanged(bool),
    Leave,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol failure: {0}")]
    Protocol(#[from] ProtocolError),
}

type OpenFuture =
    Pin<Box<dyn Future<Output = Result<Box<dyn WatchExchange>, TransportError>> + Send>>;
type CommandFuture = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send>>;

struct WatchState {
    exchange: Box<dyn WatchExchange>,
    buffer: Vec<u8>,
    cursor: usize,
}

pub struct ConversationClient {
    config: SessionConfig,
    transport: Arc<dyn PollTransport>,
}

impl ConversationClient {
    pub fn new(config: SessionConfig, transport: Arc<dyn PollTransport>) -> Self {
        Self { config, transport }
    }

    /// Drives the conversation until it reaches a terminal phase or the
    /// front-end asks to leave. Returns the phase the session ended in,
    /// or the fatal error after the error notification has been
    /// emitted on the event channel.
    pub async fn run(
        self,
        events: mpsc::UnboundedSender<SessionEvent>,
        mut intents: mpsc::UnboundedReceiver<UserIntent>,
    ) -> Result<SessionPhase, ClientError> {
        let ConversationClient { config, transport } = self;
        let mut session = Session::new(config.mode());
        let mut dispatcher = CommandDispatcher::new(KEEP_ALIVE_INTERVAL);
        let _ = events.send(SessionEvent::PhaseChanged(SessionPhase::Connecting));

        let mut opening: Option<OpenFuture> = None;
        let mut watch: Option<WatchState> = None;
        let mut outbound: Option<CommandFuture> = None;
        let mut fatal: Option<ClientError> = None;

        let mut decode_timer = time::interval_at(
            Instant::now() + DECODE_FALLBACK_INTERVAL,
            DECODE_FALLBACK_INTERVAL,
        );
        decode_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keep_alive_timer =
            time::interval_at(Instant::now() + KEEP_ALIVE_INTERVAL, KEEP_ALIVE_INTERVAL);
        keep_alive_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        match begin_watch(&config, &transport, &mut session, &mut dispatcher) {
            Ok(open) => opening = Some(open),
            Err(err) => {
                let err = ClientError::from(err);
                emit(&events, session.fail(notice_for(&err)));
                return Err(err);
            }
        }

        loop {
            tokio::select! {
                opened = async {
                    match opening.as_mut() {
                        Some(open) => open.await,
                        None => future::pending().await,
                    }
                }, if opening.is_some() => {
                    opening = None;
                    match opened {
                        Ok(exchange) => {
                            trace!(target = "client::watch", "watch exchange open");
                            watch = Some(WatchState {
                                exchange,
                                buffer: Vec::new(),
                                cursor: 0,
                            });
                            decode_timer.reset();
                        }
                        Err(err) => {
                            warn!(target = "client::watch", error = %err, "watch open failed");
                            let err = ClientError::from(err);
                            emit(&events, session.fail(notice_for(&err)));
                            fatal = Some(err);
                        }
                    }
                }

                chunk = async {
                    match watch.as_mut() {
                        Some(state) => state.exchange.next_chunk().await,
                        None => future::pending().await,
                    }
                }, if watch.is_some() => {
                    match chunk {
                        Ok(Some(bytes)) => {
                            if let Some(state) = watch.as_mut() {
                                state.buffer.extend_from_slice(&bytes);
                                match pump_decode(state, &mut session, &events) {
                                    Ok(()) => decode_timer.reset(),
                                    Err(err) => {
                                        let err = ClientError::from(err);
                                        emit(&events, session.fail(notice_for(&err)));
                                        fatal = Some(err);
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            debug!(target = "client::watch", "watch exchange completed");
                            let final_decode = match watch.as_mut() {
                                Some(state) => pump_decode(state, &mut session, &events),
                                None => Ok(()),
                            };
                            watch = None;
                            match final_decode {
                                Ok(()) if !session.is_terminal() => {
                                    // The server completes idle watches
                                    // periodically; resume right away.
                                    match begin_watch(&config, &transport, &mut session, &mut dispatcher) {
                                        Ok(open) => {
                                            opening = Some(open);
                                            keep_alive_timer.reset();
                                        }
                                        Err(err) => {
                                            let err = ClientError::from(err);
                                            emit(&events, session.fail(notice_for(&err)));
                                            fatal = Some(err);
                                        }
                                    }
                                }
                                Ok(()) => {}
                                Err(err) => {
                                    let err = ClientError::from(err);
                                    emit(&events, session.fail(notice_for(&err)));
                                    fatal = Some(err);
                                }
                            }
                        }
                        Err(err) => {
                            warn!(target = "client::watch", error = %err, "watch exchange failed");
                            watch = None;
                            let err = ClientError::from(err);
                            emit(&events, session.fail(notice_for(&err)));
                            fatal = Some(err);
                        }
                    }
                }

                result = async {
                    match outbound.as_mut() {
                        Some(exchange) => exchange.await,
                        None => future::pending().await,
                    }
                }, if outbound.is_some() => {
                    outbound = None;
                    match result {
                        Ok(()) => {
                            if let Err(err) = pump_outbound(
                                &config,
                                &transport,
                                &session,
                                &mut dispatcher,
                                &mut outbound,
                                &mut keep_alive_timer,
                            ) {
                                let err = ClientError::from(err);
                                emit(&events, session.fail(notice_for(&err)));
                                fatal = Some(err);
                            }
                        }
                        Err(err) => {
                            warn!(target = "client::outbound", error = %err, "outbound exchange failed");
                            let err = ClientError::from(err);
                            emit(&events, session.fail(notice_for(&err)));
                            fatal = Some(err);
                        }
                    }
                }

                _ = decode_timer.tick(), if watch.is_some() => {
                    if let Some(state) = watch.as_mut() {
                        if let Err(err) = pump_decode(state, &mut session, &events) {
                            let err = ClientError::from(err);
                            emit(&events, session.fail(notice_for(&err)));
                            fatal = Some(err);
                        }
                    }
                }

                _ = keep_alive_timer.tick() => {
                    if let Err(err) = pump_outbound(
                        &config,
                        &transport,
                        &session,
                        &mut dispatcher,
                        &mut outbound,
                        &mut keep_alive_timer,
                    ) {
                        let err = ClientError::from(err);
                        emit(&events, session.fail(notice_for(&err)));
                        fatal = Some(err);
                    }
                }

                intent = intents.recv() => {
                    let mut pump = false;
                    match intent {
                        Some(UserIntent::SendChat(text)) => {
                            if session.phase() == SessionPhase::InProgress && !text.is_empty() {
                                dispatcher.enqueue_chat(text);
                                pump = true;
                            } else {
                                trace!(target = "client::outbound", "chat input outside conversation dropped");
                            }
                        }
                        Some(UserIntent::FlipTile(num)) => {
                            let face_down = session
                                .cache()
                                .tile(num)
                                .map_or(false, |tile| !tile.facing_up);
                            if session.phase() == SessionPhase::InProgress
                                && face_down
                                && dispatcher.enqueue_flip(num)
                            {
                                pump = true;
                            }
                        }
                        Some(UserIntent::TypingChanged(typing)) => {
                            dispatcher.set_typing(typing);
                            pump = true;
                        }
                        Some(UserIntent::Leave) | None => {
                            debug!(target = "client", "local teardown requested");
                            break;
                        }
                    }
                    if pump {
                        if let Err(err) = pump_outbound(
                            &config,
                            &transport,
                            &session,
                            &mut dispatcher,
                            &mut outbound,
                            &mut keep_alive_timer,
                        ) {
                            let err = ClientError::from(err);
                            emit(&events, session.fail(notice_for(&err)));
                            fatal = Some(err);
                        }
                    }
                }
            }

            if fatal.is_some() || session.is_terminal() {
                break;
            }
        }

        // Clear the handles before anything is aborted so the aborts
        // cannot re-enter a handler.
        drop(opening.take());
        drop(watch.take());
        drop(outbound.take());

        if let Some(person_id) = session.person_id().map(str::to_owned) {
            if let Ok(url) = endpoints::leave(config.base_url(), &person_id) {
                debug!(target = "client", "sending leave notification");
                let _ = time::timeout(LEAVE_TIMEOUT, transport.get(url)).await;
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(session.phase()),
        }
    }
}

/// Builds the next inbound exchange: a join request while no credential
/// exists, afterwards a resume carrying the message cursor.
fn begin_watch(
    config: &SessionConfig,
    transport: &Arc<dyn PollTransport>,
    session: &mut Session,
    dispatcher: &mut CommandDispatcher,
) -> Result<OpenFuture, TransportError> {
    let cursor = session.next_message_number();
    let url = match session.person_id() {
        Some(person_id) => endpoints::watch_person(config.base_url(), person_id, cursor)?,
        None => endpoints::new_person(config.base_url(), config.room(), config.display_name())?,
    };
    debug!(target = "client::watch", %url, cursor, "opening watch exchange");
    session.begin_exchange(cursor);
    dispatcher.note_exchange_started(Instant::now());
    let transport = Arc::clone(transport);
    Ok(Box::pin(async move { transport.watch(url).await }))
}

/// Decodes every complete record currently buffered and applies it.
/// Safe to call at any time: with no new bytes it does nothing.
fn pump_decode(
    state: &mut WatchState,
    session: &mut Session,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), ProtocolError> {
    while let Some(record) = next_record(&state.buffer, state.cursor)? {
        state.cursor = record.cursor;
        emit(events, session.apply(record.message));
    }
    Ok(())
}

/// Starts the next outbound exchange if none is in flight and one is
/// owed. Every exchange completion and the keep-alive timer both land
/// here, so pending work drains eagerly.
fn pump_outbound(
    config: &SessionConfig,
    transport: &Arc<dyn PollTransport>,
    session: &Session,
    dispatcher: &mut CommandDispatcher,
    outbound: &mut Option<CommandFuture>,
    keep_alive_timer: &mut time::Interval,
) -> Result<(), TransportError> {
    if outbound.is_some() || session.is_terminal() {
        return Ok(());
    }
    let Some(person_id) = session.person_id() else {
        return Ok(());
    };
    let Some(command) = dispatcher.next_command(session.phase(), Instant::now()) else {
        return Ok(());
    };
    let base = config.base_url();
    let url = match &command {
        OutboundCommand::SendChat(_) => endpoints::send_message(base, person_id)?,
        OutboundCommand::FlipTile(tile) => endpoints::flip_tile(base, person_id, *tile)?,
        OutboundCommand::SetTyping(typing) => endpoints::typing(base, person_id, *typing)?,
        OutboundCommand::KeepAlive => endpoints::keep_alive(base, person_id)?,
        OutboundCommand::Leave => endpoints::leave(base, person_id)?,
    };
    debug!(target = "client::outbound", %url, "starting outbound exchange");
    dispatcher.note_exchange_started(Instant::now());
    keep_alive_timer.reset();
    let transport = Arc::clone(transport);
    *outbound = Some(Box::pin(async move {
        match command {
            OutboundCommand::SendChat(text) => transport.post_text(url, text).await,
            _ => transport.get(url).await,
        }
    }));
    Ok(())
}

fn emit(events: &mpsc::UnboundedSender<SessionEvent>, batch: Vec<SessionEvent>) {
    for event in batch {
        let _ = events.send(event);
    }
}

fn notice_for(error: &ClientError) -> StatusNotice {
    match error {
        ClientError::Protocol(_) => StatusNotice::BadDataReceived,
        ClientError::Transport(_) => StatusNotice::ConnectionFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConversationMode;
    use crate::transport::mock::{CommandOutcome, MockTransport, ScriptedWatch, WatchEnd};
    use reqwest::StatusCode;

    const HEADER: &str = "[\"header\", {\"num\": 0, \"id\": \"CAFE\"}]\r\n";

    fn config(mode: ConversationMode) -> SessionConfig {
        SessionConfig::new("http://127.0.0.1:5142", "vestibule", "ludanto", mode)
            .expect("static test config")
    }

    fn channels() -> (
        mpsc::UnboundedSender<SessionEvent>,
        mpsc::UnboundedReceiver<SessionEvent>,
        mpsc::UnboundedSender<UserIntent>,
        mpsc::UnboundedReceiver<UserIntent>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        (events_tx, events_rx, intents_tx, intents_rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn wait_for_phase(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
        phase: SessionPhase,
    ) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        loop {
            match time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(event)) => {
                    let reached = event == SessionEvent::PhaseChanged(phase);
                    seen.push(event);
                    if reached {
                        return seen;
                    }
                }
                _ => panic!("never reached phase {phase:?}, saw {seen:?}"),
            }
        }
    }

    #[tokio::test]
    async fn game_conversation_runs_to_done() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::stream(
            &[
                HEADER,
                "[\"player-name\", {\"num\": 1, \"name\": \"amiko\"}]\r\n",
                "[\"message\", {\"person\": 1, \"text\": \"saluton\"}]\r\n",
            ],
            WatchEnd::Complete,
        ));
        transport.push_watch(ScriptedWatch::stream(
            &[
                "[\"message\", {\"person\": 1, \"text\": \"ĝis\"}]\r\n",
                "[\"end\"]\r\n",
            ],
            WatchEnd::Complete,
        ));

        let (events_tx, mut events_rx, _intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Game), transport.clone());
        let phase = client.run(events_tx, intents_rx).await.expect("clean run");
        assert_eq!(phase, SessionPhase::Done);

        let events = drain(&mut events_rx);
        let chats: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::ChatAppended { name, text, .. } => {
                    Some((name.as_str(), text.as_str()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(chats, vec![("amiko", "saluton"), ("amiko", "ĝis")]);
        assert!(events.contains(&SessionEvent::PhaseChanged(SessionPhase::Done)));

        let requests = transport.requests();
        assert!(requests[0].url.contains("new_person?vestibule&ludanto"));
        // Resume carries the one consumed message as the cursor.
        assert!(requests[1].url.contains("watch_person?CAFE&1"));
        let last = requests.last().expect("at least the join request");
        assert!(last.url.contains("leave?CAFE"));
    }

    #[tokio::test]
    async fn chat_variant_walks_phases_via_state_records() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::stream(&[HEADER], WatchEnd::Complete));
        transport.push_watch(ScriptedWatch::stream(
            &[
                "[\"state\", \"in-progress\"]\r\n",
                "[\"message\", {\"person\": 1, \"text\": \"saluton\"}]\r\n",
                "[\"state\", \"done\"]\r\n",
            ],
            WatchEnd::Complete,
        ));

        let (events_tx, mut events_rx, _intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Chat), transport.clone());
        let phase = client.run(events_tx, intents_rx).await.expect("clean run");
        assert_eq!(phase, SessionPhase::Done);

        let events = drain(&mut events_rx);
        assert!(events.contains(&SessionEvent::StatusNotice(StatusNotice::WaitingForPartner)));
        assert!(events.contains(&SessionEvent::StatusNotice(StatusNotice::ConversationStarted)));
        assert!(events.contains(&SessionEvent::StatusNotice(StatusNotice::PartnerLeft)));

        let requests = transport.requests();
        assert!(requests[1].url.contains("watch_person?CAFE&0"));
    }

    #[tokio::test]
    async fn rejected_watch_open_is_fatal_without_retry() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::Reject(StatusCode::INTERNAL_SERVER_ERROR));

        let (events_tx, mut events_rx, _intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Chat), transport.clone());
        let result = client.run(events_tx, intents_rx).await;
        assert!(matches!(
            result,
            Err(ClientError::Transport(TransportError::HttpStatus(status)))
                if status == StatusCode::INTERNAL_SERVER_ERROR
        ));

        let events = drain(&mut events_rx);
        assert!(events.contains(&SessionEvent::PhaseChanged(SessionPhase::Error)));
        assert!(events.contains(&SessionEvent::StatusNotice(StatusNotice::ConnectionFailed)));

        // No retry, and no leave either: no credential was ever issued.
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn mid_exchange_network_failure_is_fatal_without_resume() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::stream(&[HEADER], WatchEnd::NetworkError));

        let (events_tx, mut events_rx, _intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Game), transport.clone());
        let result = client.run(events_tx, intents_rx).await;
        assert!(matches!(
            result,
            Err(ClientError::Transport(TransportError::Network(_)))
        ));

        let events = drain(&mut events_rx);
        assert!(events.contains(&SessionEvent::PhaseChanged(SessionPhase::Error)));
        assert!(events.contains(&SessionEvent::StatusNotice(StatusNotice::ConnectionFailed)));

        // The failed watch is not resumed; only the goodbye follows it.
        let requests = transport.requests();
        let watches = requests
            .iter()
            .filter(|request| request.method == "WATCH")
            .count();
        assert_eq!(watches, 1);
        assert!(requests.last().expect("join request").url.contains("leave?CAFE"));
    }

    #[tokio::test]
    async fn outbound_exchanges_run_one_at_a_time() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::stream(&[HEADER], WatchEnd::Hold));
        // The first command exchange never completes.
        transport.push_command_outcome(CommandOutcome::Hold);

        let (events_tx, mut events_rx, intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Game), transport.clone());
        let run = tokio::spawn(client.run(events_tx, intents_rx));

        wait_for_phase(&mut events_rx, SessionPhase::InProgress).await;
        intents_tx
            .send(UserIntent::SendChat("unu".into()))
            .expect("client listening");
        intents_tx
            .send(UserIntent::SendChat("du".into()))
            .expect("client listening");
        time::sleep(Duration::from_millis(100)).await;

        // The second chat stays queued behind the in-flight exchange.
        let sends = transport
            .requests()
            .iter()
            .filter(|request| request.url.contains("send_message"))
            .count();
        assert_eq!(sends, 1);

        intents_tx.send(UserIntent::Leave).expect("client listening");
        run.await.expect("client task").expect("clean run");
    }

    #[tokio::test]
    async fn malformed_record_is_fatal_with_bad_data_notice() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::stream(
            &[HEADER, "[\"message\", not json]\r\n"],
            WatchEnd::Hold,
        ));

        let (events_tx, mut events_rx, _intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Game), transport.clone());
        let result = client.run(events_tx, intents_rx).await;
        assert!(matches!(result, Err(ClientError::Protocol(_))));

        let events = drain(&mut events_rx);
        assert!(events.contains(&SessionEvent::StatusNotice(StatusNotice::BadDataReceived)));
        assert!(events.contains(&SessionEvent::PhaseChanged(SessionPhase::Error)));

        // The header was still honored, so teardown says goodbye.
        let requests = transport.requests();
        let last = requests.last().expect("at least the join request");
        assert!(last.url.contains("leave?CAFE"));
    }

    #[tokio::test]
    async fn outbound_failure_is_fatal_and_queued_work_never_starts() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::stream(&[HEADER], WatchEnd::Hold));
        transport.push_command_outcome(CommandOutcome::Fail(TransportError::Network(
            "connection reset".into(),
        )));

        let (events_tx, mut events_rx, intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Game), transport.clone());
        let run = tokio::spawn(client.run(events_tx, intents_rx));

        wait_for_phase(&mut events_rx, SessionPhase::InProgress).await;
        intents_tx
            .send(UserIntent::SendChat("unu".into()))
            .expect("client listening");
        intents_tx
            .send(UserIntent::SendChat("du".into()))
            .expect("client listening");

        let result = run.await.expect("client task");
        assert!(matches!(result, Err(ClientError::Transport(_))));

        let requests = transport.requests();
        let sends: Vec<_> = requests
            .iter()
            .filter(|request| request.url.contains("send_message"))
            .collect();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].body.as_deref(), Some("unu"));
    }

    #[tokio::test]
    async fn typing_toggles_follow_input_state() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::stream(&[HEADER], WatchEnd::Hold));

        let (events_tx, mut events_rx, intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Game), transport.clone());
        let run = tokio::spawn(client.run(events_tx, intents_rx));

        wait_for_phase(&mut events_rx, SessionPhase::InProgress).await;
        intents_tx
            .send(UserIntent::TypingChanged(true))
            .expect("client listening");
        intents_tx
            .send(UserIntent::TypingChanged(false))
            .expect("client listening");
        time::sleep(Duration::from_millis(100)).await;
        intents_tx.send(UserIntent::Leave).expect("client listening");

        let phase = run.await.expect("client task").expect("clean run");
        assert_eq!(phase, SessionPhase::InProgress);

        let urls: Vec<_> = transport
            .requests()
            .iter()
            .map(|request| request.url.clone())
            .collect();
        assert!(urls.iter().any(|url| url.contains("start_typing?CAFE")));
        assert!(urls.iter().any(|url| url.contains("stop_typing?CAFE")));
    }

    #[tokio::test]
    async fn flips_require_a_known_face_down_tile() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::stream(
            &[
                HEADER,
                "[\"tile\", {\"num\": 3, \"x\": 0, \"y\": 0, \"facing-up\": false}]\r\n",
                "[\"tile\", {\"num\": 4, \"x\": 5, \"y\": 5, \"facing-up\": true, \"letter\": \"A\"}]\r\n",
            ],
            WatchEnd::Hold,
        ));

        let (events_tx, mut events_rx, intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Game), transport.clone());
        let run = tokio::spawn(client.run(events_tx, intents_rx));

        wait_for_phase(&mut events_rx, SessionPhase::InProgress).await;
        // Wait until both tiles are cached.
        let mut tiles_seen = 0;
        while tiles_seen < 2 {
            match time::timeout(Duration::from_secs(5), events_rx.recv()).await {
                Ok(Some(SessionEvent::TileChanged { .. })) => tiles_seen += 1,
                Ok(Some(_)) => {}
                _ => panic!("tile events never arrived"),
            }
        }

        intents_tx.send(UserIntent::FlipTile(3)).expect("client listening");
        intents_tx.send(UserIntent::FlipTile(4)).expect("client listening");
        intents_tx.send(UserIntent::FlipTile(9)).expect("client listening");
        time::sleep(Duration::from_millis(100)).await;
        intents_tx.send(UserIntent::Leave).expect("client listening");

        run.await.expect("client task").expect("clean run");

        let urls: Vec<_> = transport
            .requests()
            .iter()
            .map(|request| request.url.clone())
            .collect();
        assert!(urls.iter().any(|url| url.contains("flip_tile?CAFE&3")));
        assert!(!urls.iter().any(|url| url.contains("flip_tile?CAFE&4")));
        assert!(!urls.iter().any(|url| url.contains("flip_tile?CAFE&9")));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_fires_after_the_idle_gap() {
        let transport = Arc::new(MockTransport::new());
        transport.push_watch(ScriptedWatch::stream(&[HEADER], WatchEnd::Hold));

        let (events_tx, mut events_rx, intents_tx, intents_rx) = channels();
        let client = ConversationClient::new(config(ConversationMode::Game), transport.clone());
        let run = tokio::spawn(client.run(events_tx, intents_rx));

        wait_for_phase(&mut events_rx, SessionPhase::InProgress).await;
        time::sleep(KEEP_ALIVE_INTERVAL + Duration::from_secs(2)).await;
        intents_tx.send(UserIntent::Leave).expect("client listening");

        run.await.expect("client task").expect("clean run");

        assert!(transport
            .requests()
            .iter()
            .any(|request| request.url.contains("keep_alive?CAFE")));
    }
}
