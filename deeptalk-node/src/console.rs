//! Line-oriented console: command parsing and text rendering of the session.

use std::str::FromStr;

use deeptalk_core::{ChatMessage, Origin, Phase, SharedState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create,
    Join(String),
    Leave,
    Decks,
    Start(String),
    Next,
    Prev,
    Flip,
    Shuffle,
    Say(String),
    Show,
    Link,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?} (try `help`)")]
    Unknown(String),
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };
        let arg = |name: &'static str| {
            if rest.is_empty() {
                Err(ParseCommandError::MissingArgument(name))
            } else {
                Ok(rest.to_owned())
            }
        };
        Ok(match word.to_ascii_lowercase().as_str() {
            "" => return Err(ParseCommandError::Empty),
            "create" | "host" => Command::Create,
            "join" => Command::Join(arg("join")?),
            "leave" => Command::Leave,
            "decks" => Command::Decks,
            "start" => Command::Start(arg("start")?),
            "next" | "n" => Command::Next,
            "prev" | "p" => Command::Prev,
            "flip" | "f" => Command::Flip,
            "shuffle" => Command::Shuffle,
            "say" => Command::Say(arg("say")?),
            "show" => Command::Show,
            "link" => Command::Link,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => return Err(ParseCommandError::Unknown(word.to_owned())),
        })
    }
}

pub const HELP: &str = "\
create            host a new room and print its invite link
join <invite>     join a room by invite link or room id
leave             leave the room
decks             list decks
start <deck>      start a game (host)
next | prev       move between cards
flip              reveal or hide the current card
shuffle           shuffle the deck and go back to the first card
say <text>        chat about the current card
show              print the current card and its chat
link              print the invite link
quit";

pub fn status_line(phase: Phase) -> String {
    format!("* {}", phase.describe())
}

pub fn card_line(state: &SharedState) -> String {
    let card = state.current_card();
    let face = if state.revealed() {
        card.text.as_str()
    } else {
        "(face down, `flip` to reveal)"
    };
    format!(
        "[{} {}/{}] {}",
        state.deck_name(),
        state.card_index() + 1,
        state.cards().len(),
        face
    )
}

pub fn chat_line(msg: &ChatMessage) -> String {
    let who = match msg.origin {
        Origin::Local => "you",
        Origin::Remote => "partner",
    };
    format!("{} {}: {}", msg.sent_at.format("%H:%M"), who, msg.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deeptalk_core::{Card, CardId, StateChange};

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!("create".parse::<Command>(), Ok(Command::Create));
        assert_eq!(
            "join  https://deeptalk.app/?room=ab12 ".parse::<Command>(),
            Ok(Command::Join("https://deeptalk.app/?room=ab12".into()))
        );
        assert_eq!(
            "say what a question".parse::<Command>(),
            Ok(Command::Say("what a question".into()))
        );
        assert_eq!("NEXT".parse::<Command>(), Ok(Command::Next));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("  ".parse::<Command>(), Err(ParseCommandError::Empty));
        assert_eq!(
            "start".parse::<Command>(),
            Err(ParseCommandError::MissingArgument("start"))
        );
        assert_eq!(
            "dance".parse::<Command>(),
            Err(ParseCommandError::Unknown("dance".into()))
        );
    }

    #[test]
    fn card_hidden_until_flipped() {
        let mut state =
            SharedState::start("Deep", vec![Card::new("Q1", "Why?"), Card::new("Q2", "How?")])
                .unwrap();
        assert_eq!(card_line(&state), "[Deep 1/2] (face down, `flip` to reveal)");
        state
            .apply(&StateChange {
                revealed: Some(true),
                ..StateChange::default()
            })
            .unwrap();
        assert_eq!(card_line(&state), "[Deep 1/2] Why?");
    }

    #[test]
    fn chat_line_names_author() {
        let msg = ChatMessage {
            text: "hi".into(),
            card_id: CardId::new("Q1"),
            sent_at: chrono::Utc::now(),
            origin: Origin::Remote,
        };
        assert!(chat_line(&msg).ends_with("partner: hi"));
    }
}
