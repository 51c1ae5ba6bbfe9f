//! Argument vectors for the external tool
//!
//! Pure construction only; running them is the orchestrator's job.

use crate::registry::PersistentTunnel;
use crate::tunnel::{TerminationRequest, TunnelRequest};

/// How a tunnel is taken down
///
/// The running process is always stopped by signal. When the tunnel is also
/// registered for boot, the tool's own `--remove <id>` runs first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalPlan {
    pub pid: u32,
    pub deregister: Option<Vec<String>>,
}

/// Builds tool invocations
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: String,
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Creation command, flags always in port/http/name/persist order
    pub fn build_create(&self, request: &TunnelRequest) -> Vec<String> {
        let mut argv = vec![self.program.clone(), format!("--port={}", request.port())];

        if request.is_http() {
            argv.push("--http".to_string());
        }
        if let Some(name) = request.name() {
            argv.push(format!("--name={}", name));
        }
        if request.persistent() {
            argv.push("--persist".to_string());
        }

        argv
    }

    pub fn build_remove(
        &self,
        request: &TerminationRequest,
        registration: Option<&PersistentTunnel>,
    ) -> RemovalPlan {
        RemovalPlan {
            pid: request.pid,
            deregister: registration.map(|reg| self.build_deregister(&reg.id)),
        }
    }

    /// Lists the boot registrations
    pub fn build_list_registered(&self) -> Vec<String> {
        vec![self.program.clone(), "--list".to_string()]
    }

    pub fn build_deregister(&self, id: &str) -> Vec<String> {
        vec![self.program.clone(), "--remove".to_string(), id.to_string()]
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new("pitunnel")
    }
}
