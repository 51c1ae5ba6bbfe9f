//! Boot registrations reported by `pitunnel --list`
//!
//! The tool prints an ASCII table:
//!
//! ```text
//! +----+---------------------------+
//! | ID | Arguments                 |
//! +----+---------------------------+
//! | 1  | --port=22                 |
//! | 2  | --port=80 --http --name=x |
//! +----+---------------------------+
//! ```

use crate::parser::TunnelFlags;
use crate::tunnel::{TunnelKind, TunnelProcess};

/// A tunnel registered to start on boot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentTunnel {
    pub id: String,
    pub args: String,
}

/// Read the registration table out of the tool's stdout
pub fn parse_registrations(stdout: &str) -> Vec<PersistentTunnel> {
    let mut registrations = Vec::new();
    let mut in_table = false;

    for line in stdout.lines() {
        let line = line.trim();
        if line.contains("| ID |") {
            in_table = true;
            continue;
        }
        if !in_table || line.starts_with('+') || !line.starts_with('|') {
            continue;
        }

        let mut cells = line.split('|').skip(1);
        let (Some(id), Some(args)) = (cells.next(), cells.next()) else {
            continue;
        };
        let id = id.trim();
        if id.is_empty() {
            continue;
        }

        registrations.push(PersistentTunnel {
            id: id.to_string(),
            args: args.trim().to_string(),
        });
    }

    registrations
}

/// Find the registration a running tunnel was started from
///
/// Port, name and mode must all agree. An unnamed tunnel only matches an
/// unnamed registration, so removing it never drops someone else's boot entry.
pub fn find_registration<'a>(
    process: &TunnelProcess,
    registrations: &'a [PersistentTunnel],
) -> Option<&'a PersistentTunnel> {
    let port = process.port?;
    let is_http = process.kind == TunnelKind::Http;

    registrations.iter().find(|registration| {
        let flags = TunnelFlags::from_args(&registration.args);
        flags.port == Some(port)
            && flags.name.as_deref() == process.name.as_deref()
            && flags.http == is_http
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_OUTPUT: &str = "\
Persistent tunnels:
+----+------------------------------+
| ID | Arguments                    |
+----+------------------------------+
| 1  | --port=22                    |
| 2  | --port=80 --http --name=blog |
|    |                              |
+----+------------------------------+
";

    fn process(port: Option<u16>, name: Option<&str>, kind: TunnelKind) -> TunnelProcess {
        TunnelProcess {
            pid: 500,
            port,
            name: name.map(str::to_string),
            kind,
            persistent_flag: true,
            raw_command_line: String::new(),
        }
    }

    #[test]
    fn test_parse_registrations() {
        let registrations = parse_registrations(LIST_OUTPUT);
        assert_eq!(
            registrations,
            vec![
                PersistentTunnel {
                    id: "1".to_string(),
                    args: "--port=22".to_string(),
                },
                PersistentTunnel {
                    id: "2".to_string(),
                    args: "--port=80 --http --name=blog".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_registrations_without_table() {
        assert!(parse_registrations("No persistent tunnels configured.\n").is_empty());
        assert!(parse_registrations("").is_empty());
    }

    #[test]
    fn test_find_registration_by_port_and_name() {
        let registrations = parse_registrations(LIST_OUTPUT);

        let found = find_registration(
            &process(Some(80), Some("blog"), TunnelKind::Http),
            &registrations,
        );
        assert_eq!(found.map(|r| r.id.as_str()), Some("2"));

        let found = find_registration(&process(Some(22), None, TunnelKind::Tcp), &registrations);
        assert_eq!(found.map(|r| r.id.as_str()), Some("1"));

        let http = TunnelKind::Http;
        assert!(find_registration(&process(Some(80), Some("shop"), http), &registrations).is_none());
        assert!(find_registration(&process(Some(8080), None, http), &registrations).is_none());
        assert!(find_registration(&process(None, Some("blog"), http), &registrations).is_none());
    }

    #[test]
    fn test_unnamed_tunnel_does_not_claim_named_registration() {
        let registrations = vec![PersistentTunnel {
            id: "9".to_string(),
            args: "--port=80 --http --name=blog".to_string(),
        }];
        assert!(
            find_registration(&process(Some(80), None, TunnelKind::Http), &registrations).is_none()
        );
    }

    #[test]
    fn test_mode_must_match() {
        let registrations = parse_registrations(LIST_OUTPUT);

        // registration 1 is a TCP tunnel on port 22
        let http_on_22 = process(Some(22), None, TunnelKind::Http);
        assert!(find_registration(&http_on_22, &registrations).is_none());

        // registration 2 is HTTP
        let tcp_blog = process(Some(80), Some("blog"), TunnelKind::Tcp);
        assert!(find_registration(&tcp_blog, &registrations).is_none());
    }

    #[test]
    fn test_port_match_is_exact() {
        let registrations = vec![PersistentTunnel {
            id: "9".to_string(),
            args: "--port=8080".to_string(),
        }];
        assert!(
            find_registration(&process(Some(80), None, TunnelKind::Tcp), &registrations).is_none()
        );
    }
}
