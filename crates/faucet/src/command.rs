//! Chat command parsing

/// Command found in a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!request <address>`
    Request(String),
    /// `!status [prefix]`
    Status(Option<String>),
    /// `!help`
    Help,
}

const KEYWORDS: [&str; 3] = ["request", "status", "help"];

/// Find every command in `content`, in order of appearance.
///
/// A command's argument runs up to the next command or the end of the text.
pub fn parse_commands(content: &str) -> Vec<Command> {
    let mut starts = Vec::new();
    for (idx, _) in content.match_indices('!') {
        let rest = &content[idx + 1..];
        if let Some(keyword) = KEYWORDS.iter().find(|k| rest.starts_with(*k)) {
            starts.push((idx, *keyword));
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, (idx, keyword))| {
            let arg_start = idx + 1 + keyword.len();
            let arg_end = starts.get(i + 1).map(|(next, _)| *next).unwrap_or(content.len());
            let arg = content[arg_start..arg_end].trim();
            match *keyword {
                "request" => Command::Request(arg.to_string()),
                "status" if arg.is_empty() => Command::Status(None),
                "status" => Command::Status(Some(arg.to_string())),
                _ => Command::Help,
            }
        })
        .collect()
}
