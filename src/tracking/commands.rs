use std::str::FromStr;

use crate::{
    models::{AuthEvent, PermissionScope, PermissionState},
    upload::location_path,
    AppState,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    SignIn { user_id: String },
    SignOut,
    OpenReport { user_id: String },
    CloseReport { report_id: String },
    State,
    Config,
    Permission {
        scope: PermissionScope,
        state: PermissionState,
    },
    /// Without a user, lists every location stored under the report.
    Where {
        report_id: String,
        user_id: Option<String>,
    },
    Help,
    Quit,
}

pub const HELP: &str = "commands: signin <uid> | signout | open <uid> | close <report> | \
state | config | permission <foreground|background> <granted|denied|undetermined> | \
where <report> [uid] | help | quit";

fn parse_scope(raw: &str) -> Option<PermissionScope> {
    match raw {
        "foreground" | "fg" => Some(PermissionScope::Foreground),
        "background" | "bg" => Some(PermissionScope::Background),
        _ => None,
    }
}

fn parse_permission(raw: &str) -> Option<PermissionState> {
    match raw {
        "granted" => Some(PermissionState::Granted),
        "denied" => Some(PermissionState::Denied),
        "undetermined" => Some(PermissionState::Undetermined),
        _ => None,
    }
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Err("empty command".into());
        };
        let args: Vec<&str> = parts.collect();

        let command = match (verb, args.as_slice()) {
            ("signin", [user_id]) => ConsoleCommand::SignIn {
                user_id: user_id.to_string(),
            },
            ("signout", []) => ConsoleCommand::SignOut,
            ("open", [user_id]) => ConsoleCommand::OpenReport {
                user_id: user_id.to_string(),
            },
            ("close", [report_id]) => ConsoleCommand::CloseReport {
                report_id: report_id.to_string(),
            },
            ("state", []) => ConsoleCommand::State,
            ("config", []) => ConsoleCommand::Config,
            ("permission", [scope, state]) => {
                match (parse_scope(scope), parse_permission(state)) {
                    (Some(scope), Some(state)) => ConsoleCommand::Permission { scope, state },
                    _ => return Err(format!("unrecognised permission '{scope} {state}'; {HELP}")),
                }
            }
            ("where", [report_id]) => ConsoleCommand::Where {
                report_id: report_id.to_string(),
                user_id: None,
            },
            ("where", [report_id, user_id]) => ConsoleCommand::Where {
                report_id: report_id.to_string(),
                user_id: Some(user_id.to_string()),
            },
            ("help", []) => ConsoleCommand::Help,
            ("quit" | "exit", []) => ConsoleCommand::Quit,
            _ => return Err(format!("unrecognised command '{line}'; {HELP}")),
        };
        Ok(command)
    }
}

/// Run one console command. Sign-in and sign-out go through the auth event
/// channel the supervisor listens on, like any other auth source.
pub async fn execute(command: ConsoleCommand, state: &AppState) -> Result<String, String> {
    match command {
        ConsoleCommand::SignIn { user_id } => {
            send_auth(state, AuthEvent::SignedIn { user_id: user_id.clone() }).await?;
            Ok(format!("sign-in queued for {user_id}"))
        }
        ConsoleCommand::SignOut => {
            send_auth(state, AuthEvent::SignedOut).await?;
            Ok("sign-out queued".into())
        }
        ConsoleCommand::OpenReport { user_id } => {
            let report = state
                .db
                .open_report(&user_id)
                .await
                .map_err(|e| e.to_string())?;
            Ok(format!("opened report {} for {}", report.id, report.user_id))
        }
        ConsoleCommand::CloseReport { report_id } => {
            let closed = state
                .db
                .close_report(&report_id)
                .await
                .map_err(|e| e.to_string())?;
            if closed {
                Ok(format!("closed report {report_id}"))
            } else {
                Err(format!("no open report {report_id}"))
            }
        }
        ConsoleCommand::State => {
            let snapshot = state.supervisor.snapshot().await;
            serde_json::to_string(&snapshot).map_err(|e| e.to_string())
        }
        ConsoleCommand::Config => {
            serde_json::to_string_pretty(&state.settings.tracking()).map_err(|e| e.to_string())
        }
        ConsoleCommand::Permission { scope, state: permission } => {
            match scope {
                PermissionScope::Foreground => state.provider.set_foreground_permission(permission),
                PermissionScope::Background => state.provider.set_background_permission(permission),
            }
            Ok(format!("{scope} permission now answers {permission:?}"))
        }
        ConsoleCommand::Where {
            report_id,
            user_id: Some(user_id),
        } => {
            let path = location_path(&report_id, &user_id);
            match state.db.get_node(&path).await.map_err(|e| e.to_string())? {
                Some(value) => Ok(format!("{path} = {value}")),
                None => Ok(format!("{path} is empty")),
            }
        }
        ConsoleCommand::Where {
            report_id,
            user_id: None,
        } => {
            let prefix = format!("reports/{report_id}/locations");
            let nodes = state
                .db
                .list_nodes(&prefix)
                .await
                .map_err(|e| e.to_string())?;
            if nodes.is_empty() {
                return Ok(format!("{prefix} is empty"));
            }
            Ok(nodes
                .into_iter()
                .map(|(path, value)| format!("{path} = {value}"))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        ConsoleCommand::Help => Ok(HELP.into()),
        ConsoleCommand::Quit => Ok("bye".into()),
    }
}

async fn send_auth(state: &AppState, event: AuthEvent) -> Result<(), String> {
    state
        .auth_events
        .send(event)
        .await
        .map_err(|_| "tracking supervisor is not running".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(
            "signin alice".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::SignIn {
                user_id: "alice".into()
            })
        );
        assert_eq!(
            "  where R1   alice ".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Where {
                report_id: "R1".into(),
                user_id: Some("alice".into())
            })
        );
        assert_eq!("exit".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!("signin".parse::<ConsoleCommand>().is_err());
        assert!("signout now".parse::<ConsoleCommand>().is_err());
        assert!("".parse::<ConsoleCommand>().is_err());
    }

    #[test]
    fn parses_permission_and_report_listing() {
        assert_eq!(
            "permission background denied".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Permission {
                scope: PermissionScope::Background,
                state: PermissionState::Denied
            })
        );
        assert!("permission sideways denied".parse::<ConsoleCommand>().is_err());
        assert_eq!(
            "where R1".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Where {
                report_id: "R1".into(),
                user_id: None
            })
        );
    }
}
