//! Recognition of tunnel processes in a snapshot
//!
//! Command lines are split into whitespace tokens and read against a small
//! table of known flags. Both `--flag=value` and `--flag value` spellings are
//! accepted, flag order is irrelevant and unknown tokens are skipped. A field
//! that cannot be read is left unset; it never drops the process.

use tracing::debug;

use crate::snapshot::ProcessEntry;
use crate::tunnel::{TunnelKind, TunnelProcess};

/// Flags the tool understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Port,
    Name,
    Http,
    Persist,
}

struct FlagSpec {
    token: &'static str,
    flag: Flag,
    takes_value: bool,
}

const FLAG_TABLE: &[FlagSpec] = &[
    FlagSpec {
        token: "--port",
        flag: Flag::Port,
        takes_value: true,
    },
    FlagSpec {
        token: "--name",
        flag: Flag::Name,
        takes_value: true,
    },
    FlagSpec {
        token: "--http",
        flag: Flag::Http,
        takes_value: false,
    },
    FlagSpec {
        token: "--persist",
        flag: Flag::Persist,
        takes_value: false,
    },
];

/// Interpreters a script-installed tool may run under
const INTERPRETERS: &[&str] = &["python", "python3", "sh", "bash"];

/// Tunnel fields read from a token stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelFlags {
    pub port: Option<u16>,
    pub name: Option<String>,
    pub http: bool,
    pub persist: bool,
}

impl TunnelFlags {
    /// Read recognised flags from tokens; the first occurrence of a flag wins
    pub fn from_tokens(tokens: &[&str]) -> Self {
        let mut flags = TunnelFlags::default();
        let mut seen_port = false;
        let mut seen_name = false;
        let mut i = 0;

        while i < tokens.len() {
            let (key, inline_value) = match tokens[i].split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (tokens[i], None),
            };
            i += 1;

            let Some(spec) = FLAG_TABLE.iter().find(|spec| spec.token == key) else {
                continue;
            };

            let value = if !spec.takes_value {
                None
            } else if inline_value.is_some() {
                inline_value
            } else if i < tokens.len() && !tokens[i].starts_with("--") {
                i += 1;
                Some(tokens[i - 1])
            } else {
                None
            };

            match spec.flag {
                Flag::Port if !seen_port => {
                    seen_port = true;
                    flags.port = value
                        .and_then(|v| v.parse::<u16>().ok())
                        .filter(|port| *port != 0);
                }
                Flag::Name if !seen_name => {
                    seen_name = true;
                    flags.name = value.filter(|v| !v.is_empty()).map(str::to_string);
                }
                Flag::Http => flags.http = true,
                Flag::Persist => flags.persist = true,
                _ => {}
            }
        }

        flags
    }

    /// Tokenize a free-form argument string and read its flags
    pub fn from_args(args: &str) -> Self {
        let tokens: Vec<&str> = args.split_whitespace().collect();
        Self::from_tokens(&tokens)
    }
}

/// Filters snapshots down to tunnel processes
#[derive(Debug, Clone)]
pub struct TunnelParser {
    tool_name: String,
}

impl TunnelParser {
    /// Create a parser for the given tool; a path is reduced to its file name
    pub fn new(tool: &str) -> Self {
        Self {
            tool_name: basename(tool).to_string(),
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Extract tunnel records, keeping snapshot order
    pub fn parse(&self, snapshot: &[ProcessEntry]) -> Vec<TunnelProcess> {
        let tunnels: Vec<TunnelProcess> = snapshot
            .iter()
            .filter_map(|entry| self.parse_entry(entry))
            .collect();

        debug!(
            "Found {} {} process(es) in {} entries",
            tunnels.len(),
            self.tool_name,
            snapshot.len()
        );

        tunnels
    }

    /// Parse one process, returning `None` if it is not a tool invocation
    pub fn parse_entry(&self, entry: &ProcessEntry) -> Option<TunnelProcess> {
        let tokens: Vec<&str> = entry.command_line.split_whitespace().collect();
        let tool_index = self.tool_position(&tokens)?;
        let flags = TunnelFlags::from_tokens(&tokens[tool_index + 1..]);

        Some(TunnelProcess {
            pid: entry.pid,
            port: flags.port,
            name: flags.name,
            kind: if flags.http {
                TunnelKind::Http
            } else {
                TunnelKind::Tcp
            },
            persistent_flag: flags.persist,
            raw_command_line: entry.command_line.clone(),
        })
    }

    /// Index of the tool token, either leading or right after an interpreter
    fn tool_position(&self, tokens: &[&str]) -> Option<usize> {
        let first = basename(tokens.first()?);
        if first == self.tool_name {
            return Some(0);
        }
        if !is_interpreter(first) {
            return None;
        }

        let (index, script) = tokens
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, token)| !token.starts_with('-'))?;

        (basename(script) == self.tool_name).then_some(index)
    }
}

fn basename(token: &str) -> &str {
    token.rsplit('/').next().unwrap_or(token)
}

fn is_interpreter(name: &str) -> bool {
    INTERPRETERS.contains(&name)
        || name
            .strip_prefix("python3.")
            .is_some_and(|minor| !minor.is_empty() && minor.chars().all(|c| c.is_ascii_digit()))
}
