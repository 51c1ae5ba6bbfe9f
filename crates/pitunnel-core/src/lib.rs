//! PiTunnel process discovery and tunnel lifecycle
//!
//! Finds the `pitunnel` processes running on this machine, starts new
//! tunnels through the tool and stops existing ones, confirming each change
//! against a fresh read of the process table.
//!
//! # Example
//! ```ignore
//! use pitunnel_core::{Orchestrator, OrchestratorConfig, SessionContext, TunnelRequest};
//!
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default());
//! let mut ctx = SessionContext::new();
//!
//! let request = TunnelRequest::new(8080, true, Some("demo".to_string()), false)?;
//! let outcome = orchestrator.create_tunnel(&mut ctx, &request).await?;
//! let tunnels = orchestrator.list_tunnels(&mut ctx)?;
//! ```

pub mod command;
pub mod error;
pub mod invoke;
pub mod orchestrator;
pub mod parser;
pub mod registry;
pub mod snapshot;
pub mod tunnel;

pub use command::{CommandBuilder, RemovalPlan};
pub use error::{TunnelError, ValidationError};
pub use invoke::{
    Invocation, ProcessTerminator, SignalTerminator, SystemToolRunner, ToolOutput, ToolRunner,
};
pub use orchestrator::{
    CreateOutcome, Orchestrator, OrchestratorConfig, Phase, RemoveOutcome, SessionContext,
};
pub use parser::{TunnelFlags, TunnelParser};
pub use registry::{find_registration, parse_registrations, PersistentTunnel};
pub use snapshot::{ProcessEntry, ProcessSource, SystemProcessSource};
pub use tunnel::{
    parse_port, validate_name, TerminationRequest, TunnelKind, TunnelProcess, TunnelRequest,
};
