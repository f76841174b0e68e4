//! Slash commands typed at the chat prompt.

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Models,
    /// Switch model. `None` when the name was omitted.
    Model(Option<String>),
    /// Save history, optionally to a named file.
    Save(Option<String>),
    /// Load history. `None` when the file was omitted.
    Load(Option<String>),
    Clear,
    Stats,
    ToggleStream,
    History,
    Quit,
    Unknown(String),
}

impl Command {
    /// Parse a prompt line. Returns `None` for ordinary chat input.
    ///
    /// The command word is case-insensitive; its argument is kept verbatim
    /// since model names and paths are case-sensitive.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if !input.starts_with('/') {
            return None;
        }

        let (word, arg) = match input.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, Some(rest.trim()).filter(|a| !a.is_empty())),
            None => (input, None),
        };
        let arg = arg.map(str::to_string);

        let command = match word.to_lowercase().as_str() {
            "/help" | "/h" => Self::Help,
            "/models" => Self::Models,
            "/model" => Self::Model(arg),
            "/save" => Self::Save(arg),
            "/load" => Self::Load(arg),
            "/clear" => Self::Clear,
            "/stats" => Self::Stats,
            "/stream" => Self::ToggleStream,
            "/history" => Self::History,
            "/quit" | "/exit" | "/q" => Self::Quit,
            _ => Self::Unknown(word.to_string()),
        };
        Some(command)
    }

    /// Help text listing every command.
    #[must_use]
    pub fn help() -> &'static str {
        "\
/help, /h          Show this help
/models            List installed models
/model <name>      Switch to another installed model
/save [file]       Save the conversation as JSON
/load <file>       Load a saved conversation
/clear             Clear the conversation history
/stats             Show session statistics
/stream            Toggle streaming responses
/history           Show the conversation history
/quit, /exit, /q   Leave the chat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(Command::parse("what is rust?"), None);
        assert_eq!(Command::parse("  "), None);
    }

    #[test]
    fn test_aliases() {
        for quit in ["/quit", "/exit", "/q", "  /QUIT  "] {
            assert_eq!(Command::parse(quit), Some(Command::Quit));
        }
        assert_eq!(Command::parse("/h"), Some(Command::Help));
        assert_eq!(Command::parse("/stream"), Some(Command::ToggleStream));
    }

    #[test]
    fn test_arguments_keep_case() {
        assert_eq!(
            Command::parse("/Model Phi4-Mini:3.8b"),
            Some(Command::Model(Some("Phi4-Mini:3.8b".to_string())))
        );
        assert_eq!(
            Command::parse("/save  Notes/Chat.json "),
            Some(Command::Save(Some("Notes/Chat.json".to_string())))
        );
        assert_eq!(Command::parse("/save"), Some(Command::Save(None)));
        assert_eq!(Command::parse("/load"), Some(Command::Load(None)));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            Command::parse("/frobnicate now"),
            Some(Command::Unknown("/frobnicate".to_string()))
        );
    }
}
