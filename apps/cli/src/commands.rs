use std::path::PathBuf;

use shared::domain::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Peer(UserId),
    Image(PathBuf),
    Users,
    Logout,
    Quit,
    Text(String),
    Unknown(String),
}

impl Command {
    /// Slash commands are recognised; anything else is chat text.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Text(line.to_string()));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let command = match (name, arg) {
            ("peer", id) => match id.parse::<i64>() {
                Ok(id) => Command::Peer(UserId(id)),
                Err(_) => Command::Unknown(line.to_string()),
            },
            ("image", path) if !path.is_empty() => Command::Image(PathBuf::from(path)),
            ("users", "") => Command::Users,
            ("logout", "") => Command::Logout,
            ("quit", "") | ("exit", "") => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        };
        Some(command)
    }
}
