//! Conversation windowing.
//!
//! `limit` counts turns, and a turn is a user message plus its assistant
//! reply, so the window keeps the last `2 * limit` messages after the new
//! user message is appended. The new message is always kept, even when
//! `limit` is 0.

use crate::models::Message;

pub const DEFAULT_HISTORY_TURNS: usize = 5;

/// Append `new_user_message` to `history` and keep the most recent turns.
pub fn window(history: &[Message], new_user_message: &str, limit: usize) -> Vec<Message> {
    let keep = (limit * 2).max(1);
    let start = (history.len() + 1).saturating_sub(keep);

    let mut out: Vec<Message> = history[start.min(history.len())..].to_vec();
    out.push(Message::user(new_user_message));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn alternating(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("q{}", i))
                } else {
                    Message::assistant(format!("a{}", i))
                }
            })
            .collect()
    }

    #[test]
    fn test_ten_messages_limit_two() {
        let history = alternating(10);
        let out = window(&history, "new", 2);
        assert_eq!(out.len(), 4);
        assert_eq!(&out[..3], &history[7..]);
        assert_eq!(out[3], Message::user("new"));
    }

    #[test]
    fn test_limit_zero_keeps_only_new_message() {
        let out = window(&alternating(6), "only", 0);
        assert_eq!(out, vec![Message::user("only")]);
    }

    #[test]
    fn test_short_history_kept_whole() {
        let history = alternating(3);
        let out = window(&history, "next", 5);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], history[0]);
    }

    #[test]
    fn test_empty_history() {
        let out = window(&[], "hello", 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
    }

    #[test]
    fn test_window_never_exceeds_two_per_turn() {
        for limit in 0..6 {
            for n in 0..15 {
                let out = window(&alternating(n), "x", limit);
                assert!(out.len() <= (limit * 2).max(1));
                assert_eq!(out.last().unwrap().content, "x");
            }
        }
    }
}
