//! Bounded conversation history.

use crate::backend::ChatMessage;
use std::collections::VecDeque;

/// Ordered user/assistant entries, oldest evicted first once `cap` is reached.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    entries: VecDeque<ChatMessage>,
    cap: usize,
}

impl ConversationHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        if self.cap == 0 {
            return;
        }
        while self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    /// The trailing `n` entries in order.
    pub fn window(&self, n: usize) -> Vec<ChatMessage> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Role;

    #[test]
    fn test_cap_evicts_oldest_first() {
        let mut history = ConversationHistory::new(10);
        for turn in 0..6 {
            history.push(ChatMessage::user(format!("q{turn}")));
            history.push(ChatMessage::assistant(format!("a{turn}")));
        }

        assert_eq!(history.len(), 10);
        let contents: Vec<&str> = history.entries().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["q1", "a1", "q2", "a2", "q3", "a3", "q4", "a4", "q5", "a5"]
        );
    }

    #[test]
    fn test_window_returns_trailing_entries() {
        let mut history = ConversationHistory::new(10);
        history.push(ChatMessage::user("one"));
        history.push(ChatMessage::assistant("two"));
        history.push(ChatMessage::user("three"));

        let window = history.window(2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].role, Role::Assistant);
        assert_eq!(window[1].content, "three");

        assert_eq!(history.window(8).len(), 3);
    }

    #[test]
    fn test_zero_cap_keeps_nothing() {
        let mut history = ConversationHistory::new(0);
        history.push(ChatMessage::user("ignored"));
        assert!(history.is_empty());
    }
}
