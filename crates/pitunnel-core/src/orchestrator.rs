//! Tunnel lifecycle orchestration
//!
//! Every operation runs to completion and leaves the session back in
//! [`Phase::Idle`]. Failures come back as [`TunnelError`] values for the menu
//! to show; nothing here ends the program.
//!
//! The only state carried between operations is the latest listing, held in
//! a [`SessionContext`] owned by the caller. Operations take it by `&mut`, so
//! at most one of them can touch it at a time.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::CommandBuilder;
use crate::error::TunnelError;
use crate::invoke::{
    Invocation, ProcessTerminator, SignalTerminator, SystemToolRunner, ToolRunner,
};
use crate::parser::TunnelParser;
use crate::registry::{find_registration, parse_registrations, PersistentTunnel};
use crate::snapshot::{ProcessSource, SystemProcessSource};
use crate::tunnel::{TerminationRequest, TunnelProcess, TunnelRequest};

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Tool binary, bare name or path
    pub tool: String,
    /// Upper bound on any single tool invocation
    pub invocation_timeout: Duration,
    /// How long to look for a newly created tunnel
    pub settle_delay: Duration,
    /// How long to wait for a terminated tunnel to disappear
    pub removal_grace: Duration,
    /// Pause between confirmation snapshots
    pub confirm_interval: Duration,
    /// Query `--list` before removal so boot registrations are removed too
    pub check_registrations: bool,
    /// Where launched tunnels write their output
    pub log_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tool: "pitunnel".to_string(),
            invocation_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(1500),
            removal_grace: Duration::from_millis(3000),
            confirm_interval: Duration::from_millis(250),
            check_registrations: true,
            log_dir: None,
        }
    }
}

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Listing,
    Creating,
    Removing,
    Error,
}

/// Caller-owned state shared across operations
#[derive(Debug, Default)]
pub struct SessionContext {
    phase: Phase,
    listing: Option<Vec<TunnelProcess>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Latest listing, `None` until listed or after a mutating action
    pub fn listing(&self) -> Option<&[TunnelProcess]> {
        self.listing.as_deref()
    }

    pub fn find(&self, pid: u32) -> Option<&TunnelProcess> {
        self.listing.as_ref()?.iter().find(|tunnel| tunnel.pid == pid)
    }

    pub fn invalidate(&mut self) {
        self.listing = None;
    }

    fn store(&mut self, listing: Vec<TunnelProcess>) {
        self.listing = Some(listing);
    }

    fn enter(&mut self, phase: Phase) {
        debug!("Orchestrator phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn settle<T>(&mut self, result: Result<T, TunnelError>) -> Result<T, TunnelError> {
        if let Err(e) = &result {
            self.enter(Phase::Error);
            debug!("Operation failed: {}", e);
        }
        self.enter(Phase::Idle);
        result
    }
}

/// Result of a creation the tool accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new matching process was found
    Confirmed(TunnelProcess),
    /// The tool exited 0 but no matching process showed up
    Unconfirmed { command: String },
}

/// Result of a termination that was delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The pid is gone; `deregistered` names the boot registration removed
    Confirmed {
        pid: u32,
        deregistered: Option<String>,
    },
    /// The signal was sent but the process was still listed
    Unconfirmed { pid: u32 },
}

/// Lists, creates and removes tunnels
pub struct Orchestrator {
    config: OrchestratorConfig,
    parser: TunnelParser,
    commands: CommandBuilder,
    source: Arc<dyn ProcessSource>,
    runner: Arc<dyn ToolRunner>,
    terminator: Arc<dyn ProcessTerminator>,
}

impl Orchestrator {
    /// Orchestrator over the live process table and real tool
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_components(
            config,
            Arc::new(SystemProcessSource::new()),
            Arc::new(SystemToolRunner::new()),
            Arc::new(SignalTerminator::new()),
        )
    }

    pub fn with_components(
        config: OrchestratorConfig,
        source: Arc<dyn ProcessSource>,
        runner: Arc<dyn ToolRunner>,
        terminator: Arc<dyn ProcessTerminator>,
    ) -> Self {
        Self {
            parser: TunnelParser::new(&config.tool),
            commands: CommandBuilder::new(config.tool.clone()),
            config,
            source,
            runner,
            terminator,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The exact command a creation would run
    pub fn preview_create(&self, request: &TunnelRequest) -> Vec<String> {
        self.commands.build_create(request)
    }

    /// List running tunnels and remember them for later removals
    pub fn list_tunnels(
        &self,
        ctx: &mut SessionContext,
    ) -> Result<Vec<TunnelProcess>, TunnelError> {
        ctx.enter(Phase::Listing);

        let result = self.snapshot_tunnels();
        match &result {
            Ok(tunnels) => ctx.store(tunnels.clone()),
            Err(_) => ctx.invalidate(),
        }

        ctx.settle(result)
    }

    /// Launch a tunnel and look for it in the process table
    pub async fn create_tunnel(
        &self,
        ctx: &mut SessionContext,
        request: &TunnelRequest,
    ) -> Result<CreateOutcome, TunnelError> {
        ctx.enter(Phase::Creating);
        let result = self.run_create(ctx, request).await;
        ctx.settle(result)
    }

    /// Stop a tunnel from the latest listing
    pub async fn remove_tunnel(
        &self,
        ctx: &mut SessionContext,
        request: &TerminationRequest,
    ) -> Result<RemoveOutcome, TunnelError> {
        ctx.enter(Phase::Removing);
        let result = self.run_remove(ctx, request).await;
        ctx.settle(result)
    }

    /// Tunnels registered to start on boot
    pub async fn persistent_tunnels(&self) -> Result<Vec<PersistentTunnel>, TunnelError> {
        let invocation = Invocation::new(
            self.commands.build_list_registered(),
            self.config.invocation_timeout,
        );
        let output = self.runner.run(&invocation).await?;

        if !output.success() {
            return Err(TunnelError::invocation_failed(
                &invocation.argv,
                output.status,
                output.diagnostic(),
            ));
        }

        Ok(parse_registrations(&output.stdout))
    }

    /// Boot registration for a listed tunnel, if registrations are checked
    ///
    /// An unreadable registration list is logged and treated as "not
    /// registered"; the tunnel can still be stopped.
    pub async fn registration_for(&self, process: &TunnelProcess) -> Option<PersistentTunnel> {
        if !self.config.check_registrations || process.port.is_none() {
            return None;
        }

        match self.persistent_tunnels().await {
            Ok(registrations) => find_registration(process, &registrations).cloned(),
            Err(e) => {
                warn!("Could not read persistent tunnels: {}", e);
                None
            }
        }
    }

    fn ensure_still_running(
        &self,
        ctx: &mut SessionContext,
        process: &TunnelProcess,
    ) -> Result<(), TunnelError> {
        let current = self.snapshot_tunnels()?;
        let unchanged = current.iter().any(|tunnel| {
            tunnel.pid == process.pid && tunnel.raw_command_line == process.raw_command_line
        });

        if !unchanged {
            warn!(
                "Process {} is no longer the listed tunnel, not signalling it",
                process.pid
            );
            ctx.store(current);
            return Err(TunnelError::StaleReference { pid: process.pid });
        }
        Ok(())
    }

    fn snapshot_tunnels(&self) -> Result<Vec<TunnelProcess>, TunnelError> {
        let snapshot = self.source.snapshot()?;
        Ok(self.parser.parse(&snapshot))
    }

    async fn run_create(
        &self,
        ctx: &mut SessionContext,
        request: &TunnelRequest,
    ) -> Result<CreateOutcome, TunnelError> {
        let baseline: HashSet<u32> = self
            .snapshot_tunnels()?
            .iter()
            .map(|tunnel| tunnel.pid)
            .collect();

        let mut invocation = Invocation::new(
            self.commands.build_create(request),
            self.config.invocation_timeout,
        );
        if let Some(dir) = &self.config.log_dir {
            invocation =
                invocation.with_log_file(dir.join(format!("pitunnel-{}.log", request.port())));
        }

        ctx.invalidate();
        let output = self.runner.run(&invocation).await?;

        if !output.success() {
            return Err(TunnelError::invocation_failed(
                &invocation.argv,
                output.status,
                output.diagnostic(),
            ));
        }

        let is_new_match =
            |tunnel: &TunnelProcess| !baseline.contains(&tunnel.pid) && request.matches(tunnel);

        let (tunnels, found) = self
            .poll_listing(self.config.settle_delay, |tunnels| {
                tunnels.iter().any(is_new_match)
            })
            .await?;
        let created = tunnels.iter().find(|tunnel| is_new_match(tunnel)).cloned();
        ctx.store(tunnels);

        match created {
            Some(tunnel) if found => {
                info!(
                    "Tunnel created: pid {} on port {}",
                    tunnel.pid,
                    tunnel.port_label()
                );
                Ok(CreateOutcome::Confirmed(tunnel))
            }
            _ => {
                warn!(
                    "`{}` succeeded but no matching process appeared",
                    invocation.command_line()
                );
                Ok(CreateOutcome::Unconfirmed {
                    command: invocation.command_line(),
                })
            }
        }
    }

    async fn run_remove(
        &self,
        ctx: &mut SessionContext,
        request: &TerminationRequest,
    ) -> Result<RemoveOutcome, TunnelError> {
        let process = ctx
            .find(request.pid)
            .cloned()
            .ok_or(TunnelError::StaleReference { pid: request.pid })?;

        let registration = match request.known_registration() {
            Some(known) => known.cloned(),
            None => self.registration_for(&process).await,
        };

        // The listing may be minutes old; the pid must still be the same tunnel
        self.ensure_still_running(ctx, &process)?;

        let plan = self.commands.build_remove(request, registration.as_ref());

        let mut deregistered = None;
        if let (Some(argv), Some(registration)) = (plan.deregister, registration) {
            let invocation = Invocation::new(argv, self.config.invocation_timeout);
            let output = self.runner.run(&invocation).await?;
            if !output.success() {
                return Err(TunnelError::invocation_failed(
                    &invocation.argv,
                    output.status,
                    output.diagnostic(),
                ));
            }
            info!("Removed persistent tunnel registration {}", registration.id);
            deregistered = Some(registration.id);
        }

        ctx.invalidate();
        self.terminator.terminate(plan.pid)?;

        let (tunnels, gone) = self
            .poll_listing(self.config.removal_grace, |tunnels| {
                !tunnels.iter().any(|tunnel| tunnel.pid == plan.pid)
            })
            .await?;
        ctx.store(tunnels);

        if gone {
            info!("Tunnel with pid {} terminated", plan.pid);
            Ok(RemoveOutcome::Confirmed {
                pid: plan.pid,
                deregistered,
            })
        } else {
            warn!("Process {} still running after SIGTERM", plan.pid);
            Ok(RemoveOutcome::Unconfirmed { pid: plan.pid })
        }
    }

    /// Re-list until `done` holds or `window` has passed; always lists once
    async fn poll_listing<F>(
        &self,
        window: Duration,
        mut done: F,
    ) -> Result<(Vec<TunnelProcess>, bool), TunnelError>
    where
        F: FnMut(&[TunnelProcess]) -> bool,
    {
        let deadline = Instant::now() + window;

        loop {
            let tunnels = self.snapshot_tunnels()?;
            if done(tunnels.as_slice()) {
                return Ok((tunnels, true));
            }
            if Instant::now() >= deadline {
                return Ok((tunnels, false));
            }
            tokio::time::sleep(self.config.confirm_interval).await;
        }
    }
}
