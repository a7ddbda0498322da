//! Per-(book, session) navigation stacks.
//!
//! The history stack is a capped, branch-truncating view over the durable
//! turn log: pushing while the cursor sits mid-sequence discards the
//! abandoned forward branch, and overflow evicts from the oldest end. The
//! return stack records reading positions saved before citation jumps.

use std::collections::VecDeque;

use crate::core::errors::EngineError;
use crate::library::types::{QaTurn, ReadingPosition};

#[derive(Debug, Clone)]
pub struct HistoryStack {
    turns: VecDeque<QaTurn>,
    /// Index of the turn the reader is looking at; `None` when empty.
    cursor: Option<usize>,
    cap: usize,
}

impl HistoryStack {
    pub fn new(cap: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            cursor: None,
            cap: cap.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&QaTurn> {
        self.cursor.and_then(|c| self.turns.get(c))
    }

    pub fn turns(&self) -> impl Iterator<Item = &QaTurn> {
        self.turns.iter()
    }

    /// Replace the in-memory view with the most recent `cap` turns from
    /// durable storage, cursor at the end.
    pub fn hydrate(&mut self, turns: Vec<QaTurn>) {
        let skip = turns.len().saturating_sub(self.cap);
        self.turns = turns.into_iter().skip(skip).collect();
        self.cursor = self.turns.len().checked_sub(1);
    }

    pub fn push(&mut self, turn: QaTurn) {
        // Discard the abandoned forward branch before appending.
        if let Some(cursor) = self.cursor {
            self.turns.truncate(cursor + 1);
        }

        self.turns.push_back(turn);
        if self.turns.len() > self.cap {
            self.turns.pop_front();
        }
        self.cursor = Some(self.turns.len() - 1);
    }

    pub fn back(&mut self) -> Result<&QaTurn, EngineError> {
        match self.cursor {
            Some(cursor) if cursor > 0 => {
                self.cursor = Some(cursor - 1);
                Ok(&self.turns[cursor - 1])
            }
            _ => Err(EngineError::HistoryNavigationUnavailable("back")),
        }
    }

    pub fn forward(&mut self) -> Result<&QaTurn, EngineError> {
        match self.cursor {
            Some(cursor) if cursor + 1 < self.turns.len() => {
                self.cursor = Some(cursor + 1);
                Ok(&self.turns[cursor + 1])
            }
            _ => Err(EngineError::HistoryNavigationUnavailable("forward")),
        }
    }
}

/// Saved reading positions for undoing citation-driven jumps. Plain LIFO:
/// unlike the history stack there is no branch truncation, only a cap to
/// keep a jump-happy session from growing without bound.
#[derive(Debug, Clone)]
pub struct ReturnStack {
    positions: Vec<ReadingPosition>,
    cap: usize,
}

impl ReturnStack {
    pub fn new(cap: usize) -> Self {
        Self {
            positions: Vec::new(),
            cap: cap.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn push_jump(&mut self, position: ReadingPosition) {
        self.positions.push(position);
        if self.positions.len() > self.cap {
            self.positions.remove(0);
        }
    }

    pub fn pop_return(&mut self) -> Option<ReadingPosition> {
        self.positions.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(label: &str) -> QaTurn {
        QaTurn {
            question: label.to_string(),
            answer_text: format!("answer to {label}"),
            resolved_citations: Vec::new(),
            position_context: None,
            model: "test".to_string(),
            timestamp: String::new(),
        }
    }

    fn questions(stack: &HistoryStack) -> Vec<String> {
        stack.turns().map(|t| t.question.clone()).collect()
    }

    #[test]
    fn empty_stack_has_no_cursor_and_refuses_navigation() {
        let mut stack = HistoryStack::new(40);
        assert_eq!(stack.cursor(), None);
        assert!(matches!(
            stack.back(),
            Err(EngineError::HistoryNavigationUnavailable("back"))
        ));
        assert!(matches!(
            stack.forward(),
            Err(EngineError::HistoryNavigationUnavailable("forward"))
        ));
    }

    #[test]
    fn push_past_cap_keeps_the_most_recent_turns() {
        let mut stack = HistoryStack::new(40);
        for i in 0..45 {
            stack.push(turn(&format!("q{i}")));
        }

        assert_eq!(stack.len(), 40);
        assert_eq!(stack.cursor(), Some(39));
        assert_eq!(stack.turns().next().unwrap().question, "q5");
        assert_eq!(stack.current().unwrap().question, "q44");
    }

    #[test]
    fn push_after_back_truncates_the_forward_branch() {
        let mut stack = HistoryStack::new(40);
        stack.push(turn("A"));
        stack.push(turn("B"));
        stack.push(turn("C"));

        stack.back().unwrap();
        stack.back().unwrap();
        stack.push(turn("D"));

        assert_eq!(questions(&stack), vec!["A", "D"]);
        assert_eq!(stack.cursor(), Some(1));
    }

    #[test]
    fn back_and_forward_walk_the_sequence() {
        let mut stack = HistoryStack::new(40);
        stack.push(turn("A"));
        stack.push(turn("B"));

        assert_eq!(stack.back().unwrap().question, "A");
        assert!(stack.back().is_err());
        assert_eq!(stack.forward().unwrap().question, "B");
        assert!(stack.forward().is_err());
    }

    #[test]
    fn hydrate_keeps_the_most_recent_cap_turns() {
        let mut stack = HistoryStack::new(3);
        stack.hydrate((0..5).map(|i| turn(&format!("q{i}"))).collect());

        assert_eq!(questions(&stack), vec!["q2", "q3", "q4"]);
        assert_eq!(stack.cursor(), Some(2));
    }

    #[test]
    fn hydrate_with_nothing_leaves_the_stack_empty() {
        let mut stack = HistoryStack::new(3);
        stack.hydrate(Vec::new());
        assert!(stack.is_empty());
        assert_eq!(stack.cursor(), None);
    }

    #[test]
    fn return_stack_is_lifo_with_eviction() {
        let mut stack = ReturnStack::new(2);
        stack.push_jump(ReadingPosition::new(0, 1));
        stack.push_jump(ReadingPosition::new(0, 2));
        stack.push_jump(ReadingPosition::new(0, 3));

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop_return().unwrap().position_index, 3);
        assert_eq!(stack.pop_return().unwrap().position_index, 2);
        assert!(stack.pop_return().is_none());
    }
}
