use crate::models::ConversationTurn;
use serde::Serialize;

/// Append-only chat history. Turns are never removed or reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, turn: ConversationTurn) -> ConversationLog {
        let mut next = self.clone();
        next.push(turn);
        next
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn all(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent `max_turns` turns; `0` means the whole log.
    pub fn window(&self, max_turns: usize) -> &[ConversationTurn] {
        if max_turns == 0 || max_turns >= self.turns.len() {
            &self.turns
        } else {
            &self.turns[self.turns.len() - max_turns..]
        }
    }
}
