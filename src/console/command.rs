use thiserror::Error;

/// Output filter stage appended to a command: `| include <token>`.
pub const INCLUDE: &str = "include";
/// Paging-disable stage: `| no-more`.
pub const NO_MORE: &str = "no-more";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    // ---- Liveness ----
    ShowBgpSummary,

    // ---- Sessions ----
    ShowSystemSessions { includes: Vec<String> },
    ClearBgpNeighbors,

    // ---- Config mode ----
    Configure,
    InterfaceMtu { interface: String, mtu: u32 },
    Commit,
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("unsupported pipe stage: {0}")]
    BadStage(String),
    #[error("invalid integer for {0}: {1}")]
    BadInt(&'static str, String),
}

/// Serialize a command to the text typed at the prompt (no line ending).
pub fn format_command(cmd: &CliCommand) -> String {
    use CliCommand::*;
    match cmd {
        ShowBgpSummary => "show bgp summary".to_string(),
        ShowSystemSessions { includes } => {
            let mut out = String::from("show system sessions");
            for token in includes {
                out.push_str(" | ");
                out.push_str(INCLUDE);
                out.push(' ');
                out.push_str(token);
            }
            out
        }
        ClearBgpNeighbors => "clear bgp neighbor *".to_string(),
        Configure => "configure".to_string(),
        InterfaceMtu { interface, mtu } => format!("interface {interface} mtu {mtu}"),
        Commit => "commit".to_string(),
        Exit => "exit".to_string(),
    }
}

/// Parse a typed line back into a command. `| no-more` stages are accepted
/// on any command and dropped.
pub fn parse_command(line: &str) -> Result<CliCommand, CommandParseError> {
    let s = line.trim_matches(|c| c == '\r' || c == '\n' || c == ' ');
    if s.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let mut stages = s.split('|').map(str::trim);
    let head = stages.next().unwrap_or_default();
    let mut includes = Vec::new();
    for stage in stages {
        if stage == NO_MORE {
            continue;
        }
        match stage.split_once(' ') {
            Some((INCLUDE, token)) if !token.trim().is_empty() => {
                includes.push(token.trim().to_string())
            }
            _ => return Err(CommandParseError::BadStage(stage.to_string())),
        }
    }

    let words: Vec<&str> = head.split_whitespace().collect();
    use CliCommand::*;
    let cmd = match words.as_slice() {
        ["show", "bgp", "summary"] => ShowBgpSummary,
        ["show", "system", "sessions"] => {
            return Ok(ShowSystemSessions { includes });
        }
        ["clear", "bgp", "neighbor", "*"] => ClearBgpNeighbors,
        ["configure"] => Configure,
        ["interface", interface, "mtu", mtu] => InterfaceMtu {
            interface: interface.to_string(),
            mtu: mtu
                .parse::<u32>()
                .map_err(|_| CommandParseError::BadInt("mtu", mtu.to_string()))?,
        },
        ["commit"] => Commit,
        ["exit"] => Exit,
        _ => return Err(CommandParseError::Unknown(head.to_string())),
    };
    if !includes.is_empty() {
        return Err(CommandParseError::BadStage(format!("{INCLUDE} on {head}")));
    }
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_session_query_with_filters() {
        let cmd = CliCommand::ShowSystemSessions {
            includes: vec!["11.11.11.11".into(), "179".into()],
        };
        assert_eq!(
            format_command(&cmd),
            "show system sessions | include 11.11.11.11 | include 179"
        );
    }

    #[test]
    fn parse_session_query_with_no_more() {
        let cmd =
            parse_command("show system sessions | include 179 | include 18.18.18.18 | no-more\r\n")
                .unwrap();
        match cmd {
            CliCommand::ShowSystemSessions { includes } => {
                assert_eq!(includes, vec!["179", "18.18.18.18"]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parse_interface_mtu() {
        let cmd = parse_command("  interface ge100-0/0/18.2232 mtu 9100").unwrap();
        assert_eq!(
            cmd,
            CliCommand::InterfaceMtu {
                interface: "ge100-0/0/18.2232".into(),
                mtu: 9100
            }
        );
    }

    #[test]
    fn roundtrip_fixed_commands() {
        for cmd in [
            CliCommand::ShowBgpSummary,
            CliCommand::ClearBgpNeighbors,
            CliCommand::Configure,
            CliCommand::Commit,
            CliCommand::Exit,
        ] {
            assert_eq!(parse_command(&format_command(&cmd)).unwrap(), cmd);
        }
    }

    #[test]
    fn test_error_cases() {
        assert_eq!(parse_command(""), Err(CommandParseError::Empty));
        assert!(matches!(
            parse_command("show running-config"),
            Err(CommandParseError::Unknown(_))
        ));
        assert!(matches!(
            parse_command("interface ge100-0/0/3 mtu big"),
            Err(CommandParseError::BadInt("mtu", _))
        ));
        assert!(matches!(
            parse_command("show system sessions | grep 179"),
            Err(CommandParseError::BadStage(_))
        ));
        assert!(matches!(
            parse_command("commit | include x"),
            Err(CommandParseError::BadStage(_))
        ));
    }
}
