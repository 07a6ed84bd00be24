//! Shared game state: deck, current card, reveal flag, and the partial changes gameplay produces.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::identity::CardId;

/// One question card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub text: String,
}

impl Card {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: CardId::new(id),
            text: text.into(),
        }
    }
}

/// How the state record was produced. SessionStart replaces wholesale on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    SessionStart,
    Sync,
}

/// Direction of the last navigation; the presentation layer animates with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

/// The replicated game state. Each peer's local copy is authoritative until overwritten.
///
/// Invariant: `cards` is non-empty and `card_index < cards.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedState {
    kind: StateKind,
    deck_name: String,
    cards: Vec<Card>,
    card_index: usize,
    revealed: bool,
    navigation_direction: Direction,
}

impl SharedState {
    /// Fresh game at the first card, face down.
    pub fn start(deck_name: impl Into<String>, cards: Vec<Card>) -> Result<Self, StateError> {
        if cards.is_empty() {
            return Err(StateError::EmptyDeck);
        }
        Ok(Self {
            kind: StateKind::SessionStart,
            deck_name: deck_name.into(),
            cards,
            card_index: 0,
            revealed: false,
            navigation_direction: Direction::Forward,
        })
    }

    /// Build a state from already-validated parts (remote snapshot).
    pub(crate) fn from_parts(
        kind: StateKind,
        deck_name: String,
        cards: Vec<Card>,
        card_index: usize,
        revealed: bool,
        navigation_direction: Direction,
    ) -> Result<Self, StateError> {
        check_position(&cards, card_index)?;
        Ok(Self {
            kind,
            deck_name,
            cards,
            card_index,
            revealed,
            navigation_direction,
        })
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn deck_name(&self) -> &str {
        &self.deck_name
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn card_index(&self) -> usize {
        self.card_index
    }

    pub fn revealed(&self) -> bool {
        self.revealed
    }

    pub fn navigation_direction(&self) -> Direction {
        self.navigation_direction
    }

    /// The card in play.
    pub fn current_card(&self) -> &Card {
        &self.cards[self.card_index]
    }

    pub fn is_first(&self) -> bool {
        self.card_index == 0
    }

    pub fn is_last(&self) -> bool {
        self.card_index + 1 == self.cards.len()
    }

    pub(crate) fn set_kind(&mut self, kind: StateKind) {
        self.kind = kind;
    }

    pub(crate) fn set_deck_name(&mut self, deck_name: String) {
        self.deck_name = deck_name;
    }

    /// Apply a partial change. Validates first; on error nothing is modified.
    pub fn apply(&mut self, change: &StateChange) -> Result<(), StateError> {
        let cards = change.cards.as_ref().unwrap_or(&self.cards);
        let card_index = change.card_index.unwrap_or(self.card_index);
        check_position(cards, card_index)?;

        if let Some(cards) = &change.cards {
            self.cards = cards.clone();
        }
        self.card_index = card_index;
        if let Some(revealed) = change.revealed {
            self.revealed = revealed;
        }
        if let Some(direction) = change.navigation_direction {
            self.navigation_direction = direction;
        }
        Ok(())
    }

    /// Change for "next card". None at the last card.
    pub fn next(&self) -> Option<StateChange> {
        if self.is_last() {
            return None;
        }
        Some(StateChange {
            card_index: Some(self.card_index + 1),
            revealed: Some(false),
            navigation_direction: Some(Direction::Forward),
            cards: None,
        })
    }

    /// Change for "previous card". None at the first card.
    pub fn previous(&self) -> Option<StateChange> {
        if self.is_first() {
            return None;
        }
        Some(StateChange {
            card_index: Some(self.card_index - 1),
            revealed: Some(false),
            navigation_direction: Some(Direction::Backward),
            cards: None,
        })
    }

    /// Change that toggles the reveal flag.
    pub fn flip(&self) -> StateChange {
        StateChange {
            revealed: Some(!self.revealed),
            ..StateChange::default()
        }
    }

    /// Change that replaces the deck order with a fresh permutation and rewinds to card 0.
    pub fn shuffle<R: Rng + ?Sized>(&self, rng: &mut R) -> StateChange {
        let mut cards = self.cards.clone();
        cards.shuffle(rng);
        StateChange {
            card_index: Some(0),
            revealed: Some(false),
            navigation_direction: Some(Direction::Forward),
            cards: Some(cards),
        }
    }
}

fn check_position(cards: &[Card], card_index: usize) -> Result<(), StateError> {
    if cards.is_empty() {
        return Err(StateError::EmptyDeck);
    }
    if card_index >= cards.len() {
        return Err(StateError::IndexOutOfRange {
            index: card_index,
            len: cards.len(),
        });
    }
    Ok(())
}

/// Partial update produced by a gameplay action. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChange {
    pub card_index: Option<usize>,
    pub revealed: Option<bool>,
    pub navigation_direction: Option<Direction>,
    /// Replacement deck order (shuffle). Never edited in place.
    pub cards: Option<Vec<Card>>,
}

impl StateChange {
    pub fn is_empty(&self) -> bool {
        self.card_index.is_none()
            && self.revealed.is_none()
            && self.navigation_direction.is_none()
            && self.cards.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("deck has no cards")]
    EmptyDeck,
    #[error("card index {index} out of range for {len} cards")]
    IndexOutOfRange { index: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn three_cards() -> Vec<Card> {
        vec![
            Card::new("Q1", "What made you laugh today?"),
            Card::new("Q2", "What are you grateful for?"),
            Card::new("Q3", "Where would you go tomorrow?"),
        ]
    }

    #[test]
    fn start_rejects_empty_deck() {
        assert_eq!(
            SharedState::start("Empty", vec![]),
            Err(StateError::EmptyDeck)
        );
    }

    #[test]
    fn start_is_first_card_face_down() {
        let s = SharedState::start("Deep", three_cards()).unwrap();
        assert_eq!(s.kind(), StateKind::SessionStart);
        assert_eq!(s.card_index(), 0);
        assert!(!s.revealed());
        assert_eq!(s.navigation_direction(), Direction::Forward);
        assert_eq!(s.current_card().id.as_str(), "Q1");
    }

    #[test]
    fn next_and_previous_stop_at_bounds() {
        let mut s = SharedState::start("Deep", three_cards()).unwrap();
        assert!(s.previous().is_none());
        s.apply(&s.next().unwrap()).unwrap();
        s.apply(&s.next().unwrap()).unwrap();
        assert!(s.is_last());
        assert!(s.next().is_none());

        let back = s.previous().unwrap();
        assert_eq!(back.navigation_direction, Some(Direction::Backward));
        s.apply(&back).unwrap();
        assert_eq!(s.card_index(), 1);
    }

    #[test]
    fn navigation_hides_the_card() {
        let mut s = SharedState::start("Deep", three_cards()).unwrap();
        s.apply(&s.flip()).unwrap();
        assert!(s.revealed());
        s.apply(&s.next().unwrap()).unwrap();
        assert!(!s.revealed());
    }

    #[test]
    fn flip_touches_only_revealed() {
        let s = SharedState::start("Deep", three_cards()).unwrap();
        let change = s.flip();
        assert_eq!(change.revealed, Some(true));
        assert!(change.card_index.is_none());
        assert!(change.cards.is_none());
    }

    #[test]
    fn shuffle_is_permutation_and_rewinds() {
        let mut s = SharedState::start("Deep", three_cards()).unwrap();
        s.apply(&StateChange {
            card_index: Some(2),
            ..StateChange::default()
        })
        .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let change = s.shuffle(&mut rng);
        s.apply(&change).unwrap();

        assert_eq!(s.card_index(), 0);
        let mut ids: Vec<&str> = s.cards().iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["Q1", "Q2", "Q3"]);
    }

    #[test]
    fn apply_out_of_range_leaves_state_untouched() {
        let mut s = SharedState::start("Deep", three_cards()).unwrap();
        let before = s.clone();
        let err = s
            .apply(&StateChange {
                card_index: Some(3),
                revealed: Some(true),
                ..StateChange::default()
            })
            .unwrap_err();
        assert_eq!(err, StateError::IndexOutOfRange { index: 3, len: 3 });
        assert_eq!(s, before);
    }

    #[test]
    fn apply_replacing_cards_checks_index_against_new_deck() {
        let mut s = SharedState::start("Deep", three_cards()).unwrap();
        s.apply(&StateChange {
            card_index: Some(2),
            ..StateChange::default()
        })
        .unwrap();
        let shorter = vec![Card::new("Q9", "Only one")];
        assert!(s
            .apply(&StateChange {
                cards: Some(shorter),
                ..StateChange::default()
            })
            .is_err());
        assert_eq!(s.cards().len(), 3);
    }
}
