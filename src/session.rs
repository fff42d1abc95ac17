use crate::io_struct::ChatMessage;

/// Caller-supplied history plus the new user message, oldest first.
/// The caller's history is never mutated.
pub fn build_transcript(history: &[ChatMessage], message: &str) -> Vec<ChatMessage> {
    let mut transcript = history.to_vec();
    transcript.push(ChatMessage::user(message));
    transcript
}

/// History extended with the user message and the final answer, in that
/// order. This is the history handed back to the caller; the server keeps
/// no copy of it.
pub fn merge_result(history: &[ChatMessage], message: &str, answer: &str) -> Vec<ChatMessage> {
    let mut updated = history.to_vec();
    updated.push(ChatMessage::user(message));
    updated.push(ChatMessage::assistant(answer));
    updated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("what is the marginal fuel?"),
            ChatMessage::assistant("Natural gas is currently on the margin."),
        ]
    }

    #[test]
    fn build_transcript_appends_a_user_turn() {
        let history = sample_history();
        let transcript = build_transcript(&history, "and the grid demand?");

        assert_eq!(transcript.len(), history.len() + 1);
        assert_eq!(&transcript[..history.len()], &history[..]);
        assert_eq!(
            transcript.last().unwrap(),
            &ChatMessage::user("and the grid demand?")
        );
    }

    #[test]
    fn merge_result_appends_user_then_assistant() {
        let history = sample_history();
        let updated = merge_result(&history, "and the grid demand?", "About 14 GW.");

        assert_eq!(updated.len(), history.len() + 2);
        assert_eq!(&updated[..history.len()], &history[..]);
        assert_eq!(
            updated[history.len()],
            ChatMessage::user("and the grid demand?")
        );
        assert_eq!(
            updated[history.len() + 1],
            ChatMessage::assistant("About 14 GW.")
        );
    }

    #[test]
    fn merge_result_leaves_the_input_history_untouched() {
        let history = sample_history();
        let snapshot = history.clone();
        let _updated = merge_result(&history, "more", "answer");
        assert_eq!(history, snapshot);
    }

    #[test]
    fn merge_result_from_empty_history_is_a_two_turn_exchange() {
        let updated = merge_result(&[], "What is the current marginal fuel?", "Natural gas.");
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].role, crate::io_struct::Role::User);
        assert_eq!(updated[1].role, crate::io_struct::Role::Assistant);
    }
}
