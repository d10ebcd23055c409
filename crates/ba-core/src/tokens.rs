use crate::message::Message;

/// Characters per token used for the rough estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Cheap upper-ish estimate of the tokens a request will cost.
pub fn estimate_tokens(system_prompt: &str, messages: &[Message]) -> usize {
    let chars: usize = system_prompt.len() + messages.iter().map(Message::char_len).sum::<usize>();
    chars.div_ceil(CHARS_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_counts_system_prompt_and_messages() {
        let msgs = vec![Message::user("a".repeat(40)), Message::assistant("b".repeat(40))];
        assert_eq!(estimate_tokens("c".repeat(20).as_str(), &msgs), 25);
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens("abcde", &[]), 2);
        assert_eq!(estimate_tokens("", &[]), 0);
    }
}
