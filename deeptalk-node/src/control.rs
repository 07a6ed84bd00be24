//! Control task: owns the core and the room handle, serializes console lines and transport
//! events, and carries out the core's actions.

use deeptalk_core::invite::{invite_link, room_from_invite};
use deeptalk_core::{OutboundAction, Phase, Role, TalkCore};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use url::Url;

use crate::console::{self, Command};
use crate::deck::DeckSet;
use crate::transport::{EventSender, InboundEvent, RoomHandle, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Controller<T: Transport> {
    core: TalkCore,
    transport: T,
    room: Option<Box<dyn RoomHandle>>,
    events: EventSender,
    decks: DeckSet,
    invite_base: Url,
}

impl<T: Transport> Controller<T> {
    /// Returns the controller and the queue its transport events arrive on.
    pub fn new(
        core: TalkCore,
        transport: T,
        decks: DeckSet,
        invite_base: Url,
    ) -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let ctrl = Self {
            core,
            transport,
            room: None,
            events,
            decks,
            invite_base,
        };
        (ctrl, events_rx)
    }

    pub fn invite_link(&self) -> Option<Url> {
        self.core
            .session()
            .map(|s| invite_link(&self.invite_base, s.room_id()))
    }

    /// Handle one console line. Output lines are appended to `out`.
    pub fn line(&mut self, line: &str, out: &mut Vec<String>) -> Flow {
        if line.trim().is_empty() {
            return Flow::Continue;
        }
        match line.parse::<Command>() {
            Ok(cmd) => self.command(cmd, out),
            Err(e) => {
                out.push(format!("! {e}"));
                Flow::Continue
            }
        }
    }

    pub fn command(&mut self, cmd: Command, out: &mut Vec<String>) -> Flow {
        let result = match cmd {
            Command::Create => {
                let (_, actions) = self.core.create_room();
                Ok(actions)
            }
            Command::Join(invite) => match room_from_invite(&invite) {
                Ok(room) => Ok(self.core.join_room(room)),
                Err(e) => {
                    out.push(format!("! bad invite: {e}"));
                    return Flow::Continue;
                }
            },
            Command::Leave => {
                if self.core.session().is_none() {
                    out.push(console::status_line(Phase::NoSession));
                }
                Ok(self.core.leave_room())
            }
            Command::Decks => {
                for deck in self.decks.iter() {
                    out.push(format!("{} ({} cards)", deck.name, deck.cards.len()));
                }
                return Flow::Continue;
            }
            Command::Start(name) => match self.decks.get(&name) {
                Some(deck) => self.core.start_session(&deck.name, deck.cards.clone()),
                None => {
                    out.push(format!("! no deck named {name:?}"));
                    return Flow::Continue;
                }
            },
            Command::Next => self.core.next_card(),
            Command::Prev => self.core.previous_card(),
            Command::Flip => self.core.flip_card(),
            Command::Shuffle => self.core.shuffle_cards(),
            Command::Say(text) => match self.core.state() {
                Some(state) => {
                    let card_id = state.current_card().id.clone();
                    self.core.send_chat(&text, card_id)
                }
                None => {
                    out.push("! no game in progress".to_owned());
                    return Flow::Continue;
                }
            },
            Command::Show => {
                self.show(out);
                return Flow::Continue;
            }
            Command::Link => {
                match self.invite_link() {
                    Some(link) => out.push(format!("invite: {link}")),
                    None => out.push(console::status_line(Phase::NoSession)),
                }
                return Flow::Continue;
            }
            Command::Help => {
                out.extend(console::HELP.lines().map(str::to_owned));
                return Flow::Continue;
            }
            Command::Quit => return Flow::Quit,
        };
        match result {
            Ok(actions) => self.execute(actions, out),
            Err(e) => out.push(format!("! {e}")),
        }
        Flow::Continue
    }

    /// Handle one transport event.
    pub fn event(&mut self, ev: InboundEvent, out: &mut Vec<String>) {
        let before = self.core.phase();
        let actions = self.core.handle(&ev.room, ev.event);
        self.execute(actions, out);
        let after = self.core.phase();
        if after != before {
            out.push(console::status_line(after));
        }
    }

    fn show(&self, out: &mut Vec<String>) {
        out.push(console::status_line(self.core.phase()));
        let Some(state) = self.core.state() else {
            return;
        };
        out.push(console::card_line(state));
        out.extend(self.core.current_messages().into_iter().map(console::chat_line));
    }

    fn execute(&mut self, actions: Vec<OutboundAction>, out: &mut Vec<String>) {
        for action in actions {
            match action {
                OutboundAction::OpenRoom { room_id, role } => {
                    let status = match self.transport.join(&room_id, self.events.clone()) {
                        Ok(handle) => {
                            tracing::info!(room = %room_id, peer = %self.transport.local_id(), ?role, "room open");
                            self.room = Some(handle);
                            console::status_line(self.core.phase())
                        }
                        Err(e) => {
                            tracing::warn!(room = %room_id, error = %e, "transport join failed");
                            // The session stays open; no peer can be reached yet.
                            console::status_line(Phase::WaitingForHost)
                        }
                    };
                    if role == Role::Host {
                        out.push(format!(
                            "invite: {}",
                            invite_link(&self.invite_base, &room_id)
                        ));
                    }
                    out.push(status);
                }
                OutboundAction::CloseRoom { room_id } => {
                    if let Some(handle) = self.room.take() {
                        tracing::debug!(room = %room_id, "closing room handle");
                        handle.leave();
                    }
                    out.push(console::status_line(self.core.phase()));
                }
                OutboundAction::Broadcast { channel, frame } => match &self.room {
                    Some(handle) => {
                        if let Err(e) = handle.broadcast(frame) {
                            tracing::warn!(channel = channel.name(), error = %e, "broadcast failed");
                        }
                    }
                    None => tracing::debug!(channel = channel.name(), "no room handle, frame dropped"),
                },
                OutboundAction::StateChanged => {
                    if let Some(state) = self.core.state() {
                        out.push(console::card_line(state));
                    }
                }
                OutboundAction::ChatAppended(msg) => out.push(console::chat_line(&msg)),
            }
        }
    }

    /// Leave any room before the process exits.
    pub fn shutdown(&mut self) {
        let actions = self.core.leave_room();
        self.execute(actions, &mut Vec::new());
    }
}

/// Run until a `quit` line, the end of input, or `lines` closing. Output goes to `out`.
pub async fn run<T: Transport, W: AsyncWrite + Unpin>(
    mut ctrl: Controller<T>,
    mut lines: mpsc::Receiver<String>,
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
    mut out: W,
) -> std::io::Result<W> {
    loop {
        let mut buf = Vec::new();
        let flow = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => ctrl.line(&line, &mut buf),
                None => Flow::Quit,
            },
            Some(ev) = events.recv() => {
                ctrl.event(ev, &mut buf);
                Flow::Continue
            }
        };
        for line in buf {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
        out.flush().await?;
        if flow == Flow::Quit {
            ctrl.shutdown();
            return Ok(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryHub, MemoryTransport, TransportError};
    use deeptalk_core::{PeerId, RoomId, SyncMode};

    type Ctrl = Controller<MemoryTransport>;
    type Events = mpsc::UnboundedReceiver<InboundEvent>;

    fn controller(hub: &MemoryHub) -> (Ctrl, Events) {
        Controller::new(
            TalkCore::with_sync_mode(SyncMode::Snapshot),
            hub.transport(),
            DeckSet::builtin(),
            Url::parse("https://deeptalk.app/").unwrap(),
        )
    }

    fn say(ctrl: &mut Ctrl, line: &str) -> Vec<String> {
        let mut out = Vec::new();
        assert_eq!(ctrl.line(line, &mut out), Flow::Continue);
        out
    }

    /// Deliver every queued transport event.
    fn pump(ctrl: &mut Ctrl, events: &mut Events) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(ev) = events.try_recv() {
            ctrl.event(ev, &mut out);
        }
        out
    }

    fn room_of(ctrl: &Ctrl) -> RoomId {
        ctrl.core.session().unwrap().room_id().clone()
    }

    #[test]
    fn two_players_share_game_and_chat() {
        let hub = MemoryHub::new();
        let (mut host, mut host_rx) = controller(&hub);
        let (mut guest, mut guest_rx) = controller(&hub);

        let out = say(&mut host, "create");
        assert!(out[0].starts_with("invite: https://deeptalk.app/?room="));
        let link = host.invite_link().unwrap().to_string();
        say(&mut guest, &format!("join {link}"));
        pump(&mut host, &mut host_rx);
        pump(&mut guest, &mut guest_rx);
        assert_eq!(host.core.phase(), Phase::PeerPresent);
        assert_eq!(guest.core.phase(), Phase::HostPresent);

        say(&mut host, "start deep");
        let out = pump(&mut guest, &mut guest_rx);
        assert_eq!(out, vec!["[Deep 1/5] (face down, `flip` to reveal)".to_owned()]);

        say(&mut guest, "next");
        say(&mut guest, "flip");
        pump(&mut host, &mut host_rx);
        assert_eq!(host.core.state(), guest.core.state());
        assert_eq!(host.core.state().unwrap().card_index(), 1);

        say(&mut guest, "say  this one is hard ");
        let out = pump(&mut host, &mut host_rx);
        assert!(out[0].ends_with("partner: this one is hard"));
        assert_eq!(host.core.current_messages().len(), 1);
    }

    #[test]
    fn late_joiner_catches_up() {
        let hub = MemoryHub::new();
        let (mut host, mut host_rx) = controller(&hub);
        say(&mut host, "create");
        say(&mut host, "start warm-up");
        say(&mut host, "next");
        say(&mut host, "next");

        let (mut guest, mut guest_rx) = controller(&hub);
        say(&mut guest, &format!("join {}", room_of(&host)));
        pump(&mut host, &mut host_rx);
        pump(&mut guest, &mut guest_rx);
        let state = guest.core.state().unwrap();
        assert_eq!(state.card_index(), 2);
        assert_eq!(state.cards(), host.core.state().unwrap().cards());
    }

    #[test]
    fn partner_leaving_keeps_game() {
        let hub = MemoryHub::new();
        let (mut host, mut host_rx) = controller(&hub);
        let (mut guest, mut guest_rx) = controller(&hub);
        say(&mut host, "create");
        say(&mut guest, &format!("join {}", room_of(&host)));
        say(&mut host, "start deep");
        pump(&mut guest, &mut guest_rx);
        pump(&mut host, &mut host_rx);

        say(&mut guest, "leave");
        assert_eq!(guest.core.phase(), Phase::NoSession);
        assert!(guest.core.state().is_none());
        let out = pump(&mut host, &mut host_rx);
        assert_eq!(out, vec![console::status_line(Phase::WaitingForPeer)]);
        assert!(host.core.state().is_some());
    }

    #[test]
    fn stale_room_traffic_is_ignored_after_switching() {
        let hub = MemoryHub::new();
        let (mut host, mut host_rx) = controller(&hub);
        let (mut guest, mut guest_rx) = controller(&hub);
        say(&mut host, "create");
        say(&mut guest, &format!("join {}", room_of(&host)));
        say(&mut host, "start deep");
        // Guest switches rooms before draining the old room's queue.
        say(&mut guest, "join elsewhere");
        pump(&mut guest, &mut guest_rx);
        assert!(guest.core.state().is_none());
        assert_eq!(guest.core.phase(), Phase::WaitingForHost);
        pump(&mut host, &mut host_rx);
    }

    #[test]
    fn precondition_errors_are_printed() {
        let hub = MemoryHub::new();
        let (mut guest, _rx) = controller(&hub);
        assert_eq!(say(&mut guest, "next"), vec!["! not in a room".to_owned()]);
        say(&mut guest, "join abc123");
        assert_eq!(
            say(&mut guest, "start deep"),
            vec!["! only the host can start a game".to_owned()]
        );
        assert_eq!(say(&mut guest, "say hi"), vec!["! no game in progress".to_owned()]);
        assert_eq!(
            say(&mut guest, "start nope"),
            vec!["! no deck named \"nope\"".to_owned()]
        );
        assert!(say(&mut guest, "join https://deeptalk.app/")[0].starts_with("! bad invite"));
    }

    #[tokio::test]
    async fn run_loop_processes_lines_until_quit() {
        let hub = MemoryHub::new();
        let (ctrl, events) = controller(&hub);
        let (tx, rx) = mpsc::channel(8);
        for line in ["create", "start deep", "flip", "quit", "next"] {
            tx.send(line.to_owned()).await.unwrap();
        }
        let out = run(ctrl, rx, events, Vec::new()).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("invite: https://deeptalk.app/?room="));
        assert!(text.contains("[Deep 1/5] When did you last feel truly understood?"));
        assert!(!text.contains("[Deep 2/5]"));
    }

    struct UnreachableTransport(PeerId);

    impl Transport for UnreachableTransport {
        fn join(&mut self, _: &RoomId, _: EventSender) -> Result<Box<dyn RoomHandle>, TransportError> {
            Err(TransportError::Closed)
        }

        fn local_id(&self) -> PeerId {
            self.0
        }
    }

    #[test]
    fn failed_join_keeps_session_and_reports_connecting() {
        for line in ["create", "join ab12cd34"] {
            let (mut ctrl, _events) = Controller::new(
                TalkCore::new(),
                UnreachableTransport(PeerId::generate()),
                DeckSet::builtin(),
                Url::parse("https://deeptalk.app/").unwrap(),
            );
            let mut out = Vec::new();
            assert_eq!(ctrl.line(line, &mut out), Flow::Continue);
            assert_eq!(out.last().map(String::as_str), Some("* still connecting"), "{line}");
            assert!(ctrl.core.session().is_some());
            assert!(ctrl.room.is_none());
        }
    }
}
