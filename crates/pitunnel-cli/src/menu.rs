//! Interactive terminal menu
//!
//! A thin loop over the orchestrator: show the running tunnels, read a
//! choice, run it, report the outcome, repeat. Input and output are generic
//! so the whole flow can be driven from a script in tests.

use std::io::{self, BufRead, Write};

use pitunnel_core::{
    parse_port, validate_name, CreateOutcome, Orchestrator, PersistentTunnel,
    RemoveOutcome, SessionContext, TerminationRequest, TunnelError, TunnelProcess, TunnelRequest,
};

const RULE_WIDTH: usize = 80;
const COMMAND_PREVIEW: usize = 40;

/// Render the running tunnels as a numbered table
pub fn render_tunnels(tunnels: &[TunnelProcess]) -> String {
    if tunnels.is_empty() {
        return "No active PiTunnel processes found.\n".to_string();
    }

    let rule = "-".repeat(RULE_WIDTH);
    let mut out = String::new();
    out.push_str("Active PiTunnel processes:\n");
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!(
        "{:<3} {:<8} {:<6} {:<5} {:<20} {}\n",
        "#", "PID", "Port", "Type", "Name", "Command"
    ));
    out.push_str(&rule);
    out.push('\n');

    for (i, tunnel) in tunnels.iter().enumerate() {
        out.push_str(&format!(
            "{:<3} {:<8} {:<6} {:<5} {:<20} {}\n",
            i + 1,
            tunnel.pid,
            tunnel.port_label(),
            tunnel.kind.to_string(),
            tunnel.name_label(),
            truncate(&tunnel.raw_command_line, COMMAND_PREVIEW)
        ));
    }

    out
}

/// Render boot registrations
pub fn render_registrations(registrations: &[PersistentTunnel]) -> String {
    if registrations.is_empty() {
        return "No persistent tunnels registered.\n".to_string();
    }

    let mut out = format!("{:<6} {}\n", "ID", "Arguments");
    for registration in registrations {
        out.push_str(&format!("{:<6} {}\n", registration.id, registration.args));
    }
    out
}

pub fn describe_create(outcome: &CreateOutcome) -> String {
    match outcome {
        CreateOutcome::Confirmed(tunnel) => format!(
            "✅ Tunnel started: PID {}, port {}, name {}",
            tunnel.pid,
            tunnel.port_label(),
            tunnel.name_label()
        ),
        CreateOutcome::Unconfirmed { command } => format!(
            "⚠️  `{}` was accepted, but no matching tunnel process is running yet.\n   Refresh the list to check again.",
            command
        ),
    }
}

pub fn describe_remove(outcome: &RemoveOutcome) -> String {
    match outcome {
        RemoveOutcome::Confirmed { pid, deregistered } => {
            let mut message = String::new();
            if let Some(id) = deregistered {
                message.push_str(&format!(
                    "✅ Persistent tunnel (ID {}) has been removed.\n",
                    id
                ));
            }
            message.push_str(&format!("✅ Tunnel with PID {} has been terminated.", pid));
            message
        }
        RemoveOutcome::Unconfirmed { pid } => format!(
            "⚠️  Sent SIGTERM to PID {}, but it is still running. Refresh the list to check again.",
            pid
        ),
    }
}

/// A creation whose tool call outlived the timeout, with the tunnel found
/// in a fresh listing if it is already up
pub fn describe_create_timeout(err: &TunnelError, started: Option<&TunnelProcess>) -> String {
    match started {
        Some(tunnel) => format!(
            "⚠️  {}\n✅ Tunnel is running: PID {}, port {}, name {}",
            err,
            tunnel.pid,
            tunnel.port_label(),
            tunnel.name_label()
        ),
        None => format!(
            "⚠️  {}\n   The tunnel may still be starting; refresh the list to see it.",
            err
        ),
    }
}

pub fn describe_error(err: &TunnelError) -> String {
    format!("❌ {}", err)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// The interactive session
pub struct Menu<R, W> {
    orchestrator: Orchestrator,
    ctx: SessionContext,
    input: R,
    output: W,
    clear_screen: bool,
}

impl<R: BufRead, W: Write> Menu<R, W> {
    pub fn new(orchestrator: Orchestrator, input: R, output: W) -> Self {
        Self {
            orchestrator,
            ctx: SessionContext::new(),
            input,
            output,
            clear_screen: false,
        }
    }

    /// Clear the terminal before each redraw
    pub fn with_clear_screen(mut self, clear: bool) -> Self {
        self.clear_screen = clear;
        self
    }

    /// Run until the operator quits or input ends
    pub async fn run(&mut self) -> io::Result<()> {
        loop {
            if self.clear_screen {
                write!(self.output, "\x1B[2J\x1B[1;1H")?;
            }
            writeln!(self.output, "{}", "=".repeat(60))?;
            writeln!(self.output, "{:^60}", "PiTunnel Manager")?;
            writeln!(self.output, "{}", "=".repeat(60))?;

            match self.orchestrator.list_tunnels(&mut self.ctx) {
                Ok(tunnels) => write!(self.output, "\n{}", render_tunnels(&tunnels))?,
                Err(e) => writeln!(self.output, "\n{}", describe_error(&e))?,
            }

            writeln!(self.output, "\nMenu options:")?;
            writeln!(self.output, "1. Create a new tunnel")?;
            writeln!(self.output, "2. Remove a tunnel")?;
            writeln!(self.output, "3. Refresh tunnel list")?;
            writeln!(self.output, "4. Show persistent tunnels")?;
            writeln!(self.output, "q. Quit")?;

            let Some(choice) = self.prompt("\nSelect an option: ")? else {
                break;
            };

            match choice.to_lowercase().as_str() {
                "1" => self.create_flow().await?,
                "2" => self.remove_flow().await?,
                "3" => {}
                "4" => self.registrations_flow().await?,
                "q" => break,
                _ => writeln!(self.output, "Invalid option. Please try again.")?,
            }
        }

        writeln!(self.output, "Exiting PiTunnel Manager. Goodbye!")?;
        Ok(())
    }

    /// Print a prompt and read one trimmed line; `None` on end of input
    fn prompt(&mut self, text: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", text)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn confirm(&mut self, text: &str) -> io::Result<bool> {
        Ok(self
            .prompt(text)?
            .is_some_and(|answer| answer.to_lowercase().starts_with('y')))
    }

    async fn create_flow(&mut self) -> io::Result<()> {
        writeln!(self.output, "\nCreate a new PiTunnel")?;
        writeln!(self.output, "{}", "-".repeat(40))?;

        let port = loop {
            let Some(input) = self.prompt("Local port to expose: ")? else {
                return Ok(());
            };
            match parse_port(&input) {
                Ok(port) => break port,
                Err(e) => writeln!(self.output, "{}", e)?,
            }
        };

        writeln!(self.output, "\nTunnel type:")?;
        writeln!(self.output, "1. HTTP (default)")?;
        writeln!(self.output, "2. TCP")?;
        let is_http = loop {
            let Some(input) = self.prompt("Select tunnel type [1]: ")? else {
                return Ok(());
            };
            match input.as_str() {
                "" | "1" => break true,
                "2" => break false,
                _ => writeln!(self.output, "Please enter 1 or 2.")?,
            }
        };

        let name = loop {
            let Some(input) = self.prompt("\nTunnel name (subdomain) [optional]: ")? else {
                return Ok(());
            };
            if input.is_empty() {
                break None;
            }
            match validate_name(&input) {
                Ok(()) => break Some(input),
                Err(e) => writeln!(self.output, "{}", e)?,
            }
        };

        let persistent = self.confirm("\nMake tunnel persistent? (y/n) [n]: ")?;

        let request = match TunnelRequest::new(port, is_http, name, persistent) {
            Ok(request) => request,
            Err(e) => {
                writeln!(self.output, "❌ {}", e)?;
                return Ok(());
            }
        };

        writeln!(self.output, "\nCommand to execute:")?;
        writeln!(
            self.output,
            "  {}",
            self.orchestrator.preview_create(&request).join(" ")
        )?;

        if !self.confirm("\nCreate tunnel? (y/n): ")? {
            writeln!(self.output, "Tunnel creation cancelled.")?;
            return Ok(());
        }

        let result = self.orchestrator.create_tunnel(&mut self.ctx, &request).await;
        let message = match result {
            Ok(outcome) => describe_create(&outcome),
            Err(e @ TunnelError::InvocationTimedOut { .. }) => {
                // A foreground tunnel keeps running past the timeout
                let started = self
                    .orchestrator
                    .list_tunnels(&mut self.ctx)
                    .ok()
                    .and_then(|tunnels| tunnels.into_iter().find(|t| request.matches(t)));
                describe_create_timeout(&e, started.as_ref())
            }
            Err(e) => describe_error(&e),
        };
        writeln!(self.output, "{}", message)?;
        self.pause()
    }

    async fn remove_flow(&mut self) -> io::Result<()> {
        let tunnels = self.ctx.listing().map(<[_]>::to_vec).unwrap_or_default();
        if tunnels.is_empty() {
            writeln!(self.output, "\nNo active tunnels to remove.")?;
            return self.pause();
        }

        let tunnel = loop {
            let Some(input) =
                self.prompt("\nEnter the number of the tunnel to remove (or 0 to cancel): ")?
            else {
                return Ok(());
            };
            match input.parse::<usize>() {
                Ok(0) => return Ok(()),
                Ok(n) if n <= tunnels.len() => break tunnels[n - 1].clone(),
                Ok(_) => writeln!(self.output, "Invalid selection. Please try again.")?,
                Err(_) => writeln!(self.output, "Please enter a valid number.")?,
            }
        };

        let registration = if self.orchestrator.config().check_registrations {
            self.orchestrator.registration_for(&tunnel).await
        } else {
            None
        };

        let question = if registration.is_some() || tunnel.persistent_flag {
            format!(
                "Tunnel PID {} (port {}) is persistent. Remove permanently? (y/n): ",
                tunnel.pid,
                tunnel.port_label()
            )
        } else {
            format!(
                "Are you sure you want to terminate tunnel PID {}? (y/n): ",
                tunnel.pid
            )
        };

        if !self.confirm(&question)? {
            writeln!(self.output, "Operation cancelled.")?;
            return Ok(());
        }

        let message = match self
            .orchestrator
            .remove_tunnel(
                &mut self.ctx,
                &TerminationRequest::new(tunnel.pid).with_registration(registration),
            )
            .await
        {
            Ok(outcome) => describe_remove(&outcome),
            Err(e) => describe_error(&e),
        };
        writeln!(self.output, "{}", message)?;
        self.pause()
    }

    async fn registrations_flow(&mut self) -> io::Result<()> {
        let message = match self.orchestrator.persistent_tunnels().await {
            Ok(registrations) => render_registrations(&registrations),
            Err(e) => format!("{}\n", describe_error(&e)),
        };
        write!(self.output, "\n{}", message)?;
        self.pause()
    }

    fn pause(&mut self) -> io::Result<()> {
        self.prompt("Press Enter to continue...")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitunnel_core::TunnelKind;

    fn tunnel(pid: u32, port: Option<u16>, name: Option<&str>, line: &str) -> TunnelProcess {
        TunnelProcess {
            pid,
            port,
            name: name.map(str::to_string),
            kind: TunnelKind::Http,
            persistent_flag: false,
            raw_command_line: line.to_string(),
        }
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_tunnels(&[]), "No active PiTunnel processes found.\n");
    }

    #[test]
    fn test_render_rows_with_placeholders_and_truncation() {
        let long = format!("/usr/bin/pitunnel --port=80 --http {}", "x".repeat(60));
        let out = render_tunnels(&[
            tunnel(101, Some(3000), Some("myapp"), "/usr/bin/pitunnel --port 3000 --name myapp"),
            tunnel(205, None, None, &long),
        ]);

        let rows: Vec<&str> = out.lines().skip(4).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("1   101      3000   HTTP  myapp"));
        assert!(rows[1].starts_with("2   205      ?      HTTP  (default)"));
        assert!(rows[1].ends_with("..."));
        assert!(!rows[1].contains(&"x".repeat(60)));
    }

    #[test]
    fn test_describe_outcomes() {
        let created = describe_create(&CreateOutcome::Confirmed(tunnel(
            7,
            Some(8080),
            Some("demo"),
            "",
        )));
        assert_eq!(created, "✅ Tunnel started: PID 7, port 8080, name demo");

        let removed = describe_remove(&RemoveOutcome::Confirmed {
            pid: 7,
            deregistered: Some("2".to_string()),
        });
        assert!(removed.contains("Persistent tunnel (ID 2) has been removed."));
        assert!(removed.ends_with("Tunnel with PID 7 has been terminated."));

        let timed_out = TunnelError::InvocationTimedOut {
            command: "pitunnel --port=8080".to_string(),
            timeout: std::time::Duration::from_secs(5),
        };
        let running = tunnel(9, Some(8080), None, "pitunnel --port=8080");
        let message = describe_create_timeout(&timed_out, Some(&running));
        assert!(message.starts_with("⚠️  "));
        assert!(message.ends_with("✅ Tunnel is running: PID 9, port 8080, name (default)"));
        assert!(describe_create_timeout(&timed_out, None).contains("refresh the list"));

        let stale = describe_error(&TunnelError::StaleReference { pid: 7 });
        assert!(stale.starts_with("❌ Process 7"));
    }

    #[test]
    fn test_render_registrations() {
        assert_eq!(
            render_registrations(&[]),
            "No persistent tunnels registered.\n"
        );
        let out = render_registrations(&[PersistentTunnel {
            id: "3".to_string(),
            args: "--port=22".to_string(),
        }]);
        assert!(out.contains("3      --port=22"));
    }
}
