//! Tunnel records and validated requests

use std::fmt;

use crate::error::ValidationError;
use crate::registry::PersistentTunnel;

/// Longest name the tool accepts, one DNS label
pub const MAX_NAME_LEN: usize = 63;

/// Tunnel mode selected at launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    Http,
    Tcp,
}

impl fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelKind::Http => write!(f, "HTTP"),
            TunnelKind::Tcp => write!(f, "TCP"),
        }
    }
}

/// A running tunnel process, rebuilt from every snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelProcess {
    pub pid: u32,
    /// `None` when the port flag is missing or unreadable
    pub port: Option<u16>,
    /// `None` means the tool picks the name
    pub name: Option<String>,
    pub kind: TunnelKind,
    /// Launched with the persistence flag
    pub persistent_flag: bool,
    pub raw_command_line: String,
}

impl TunnelProcess {
    /// Port for display, `?` when unknown
    pub fn port_label(&self) -> String {
        self.port
            .map(|port| port.to_string())
            .unwrap_or_else(|| "?".to_string())
    }

    /// Name for display
    pub fn name_label(&self) -> &str {
        self.name.as_deref().unwrap_or("(default)")
    }
}

/// A validated request to start a tunnel
///
/// Only constructible through [`TunnelRequest::new`], so holding one means the
/// port and name already passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    port: u16,
    is_http: bool,
    name: Option<String>,
    persistent: bool,
}

impl TunnelRequest {
    pub fn new(
        port: u16,
        is_http: bool,
        name: Option<String>,
        persistent: bool,
    ) -> Result<Self, ValidationError> {
        if port == 0 {
            return Err(ValidationError::PortOutOfRange(0));
        }
        if let Some(name) = &name {
            validate_name(name)?;
        }

        Ok(Self {
            port,
            is_http,
            name,
            persistent,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_http(&self) -> bool {
        self.is_http
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// Whether a listed process is the tunnel this request asked for
    pub fn matches(&self, process: &TunnelProcess) -> bool {
        process.port == Some(self.port) && process.name.as_deref() == self.name()
    }
}

/// A request to stop a tunnel from the latest listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationRequest {
    pub pid: u32,
    known_registration: Option<Option<PersistentTunnel>>,
}

impl TerminationRequest {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            known_registration: None,
        }
    }

    /// Reuse a boot registration lookup the caller already made
    /// (`None` meaning the tunnel is known not to be registered)
    pub fn with_registration(mut self, registration: Option<PersistentTunnel>) -> Self {
        self.known_registration = Some(registration);
        self
    }

    /// `None` when the registration still has to be looked up
    pub fn known_registration(&self) -> Option<Option<&PersistentTunnel>> {
        self.known_registration.as_ref().map(Option::as_ref)
    }
}

/// Parse operator input into a port number
pub fn parse_port(input: &str) -> Result<u16, ValidationError> {
    let trimmed = input.trim();
    let value: u32 = trimmed
        .parse()
        .map_err(|_| ValidationError::InvalidPort(trimmed.to_string()))?;

    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ValidationError::PortOutOfRange(value)),
    }
}

/// Validate a tunnel name as a subdomain label
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong(name.len()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        || name.starts_with('-')
        || name.ends_with('-')
    {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(())
}
