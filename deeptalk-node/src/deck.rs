//! Question decks: a built-in set, or a TOML file of `[[deck]]` tables.

use std::path::Path;

use deeptalk_core::Card;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deck {
    pub name: String,
    pub cards: Vec<Card>,
}

impl Deck {
    /// Build a deck, giving every question a fresh card id.
    pub fn new(name: impl Into<String>, questions: impl IntoIterator<Item = String>) -> Self {
        let cards = questions
            .into_iter()
            .map(|text| Card::new(uuid::Uuid::new_v4().simple().to_string(), text))
            .collect();
        Self {
            name: name.into(),
            cards,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeckFile {
    #[serde(rename = "deck", default)]
    decks: Vec<DeckEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeckEntry {
    name: String,
    #[serde(default)]
    questions: Vec<String>,
}

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "Warm-up",
        &[
            "What made you smile this week?",
            "Which small habit of mine do you secretly like?",
            "Where would you go tomorrow if work did not exist?",
            "What song reminds you of us?",
        ],
    ),
    (
        "Deep",
        &[
            "When did you last feel truly understood?",
            "What do you wish you had been told as a child?",
            "What are you still afraid to ask me?",
            "What does home mean to you now?",
            "Which memory of us would you keep if you could keep only one?",
        ],
    ),
];

/// Named decks available to the host.
#[derive(Debug, Clone, Default)]
pub struct DeckSet {
    decks: Vec<Deck>,
}

impl DeckSet {
    pub fn builtin() -> Self {
        let decks = BUILTIN
            .iter()
            .map(|(name, qs)| Deck::new(*name, qs.iter().map(|q| q.to_string())))
            .collect();
        Self { decks }
    }

    pub fn load(path: &Path) -> Result<Self, DeckError> {
        let s = std::fs::read_to_string(path)?;
        Self::parse(&s)
    }

    /// Parse a deck file. Blank questions are dropped; duplicate names are an error.
    pub fn parse(s: &str) -> Result<Self, DeckError> {
        let file: DeckFile = toml::from_str(s)?;
        let mut decks: Vec<Deck> = Vec::with_capacity(file.decks.len());
        for entry in file.decks {
            let name = entry.name.trim().to_owned();
            if name.is_empty() {
                return Err(DeckError::UnnamedDeck);
            }
            if decks.iter().any(|d| d.name.eq_ignore_ascii_case(&name)) {
                return Err(DeckError::DuplicateName(name));
            }
            let questions = entry
                .questions
                .into_iter()
                .map(|q| q.trim().to_owned())
                .filter(|q| !q.is_empty());
            decks.push(Deck::new(name, questions));
        }
        Ok(Self { decks })
    }

    /// Deck by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&Deck> {
        let name = name.trim();
        self.decks.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Deck> {
        self.decks.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.decks.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error("read deck file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse deck file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("deck without a name")]
    UnnamedDeck,
    #[error("deck {0:?} defined twice")]
    DuplicateName(String),
}
