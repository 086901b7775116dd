//! User-facing notice for a second launch
//!
//! Uses whatever notification tool the desktop ships with. Failing to show
//! the notice is not an error; it falls back to the log.

use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

const TITLE: &str = "SnapLog";
const ALREADY_RUNNING: &str = "SnapLog is already running";

/// A command line that displays a notification
#[derive(Debug, Clone, PartialEq, Eq)]
struct Notifier {
    program: &'static str,
    args: Vec<String>,
}

impl Notifier {
    fn new(program: &'static str, args: &[&str]) -> Self {
        Self {
            program,
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn run(&self) -> bool {
        match Command::new(self.program)
            .args(&self.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => true,
            Ok(status) => {
                debug!(program = self.program, ?status, "notifier exited unsuccessfully");
                false
            }
            Err(e) => {
                debug!(program = self.program, error = %e, "notifier unavailable");
                false
            }
        }
    }
}

/// Notifiers to try in order for this platform
fn notifiers(title: &str, message: &str) -> Vec<Notifier> {
    if cfg!(target_os = "macos") {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            message.replace('"', "\\\""),
            title.replace('"', "\\\""),
        );
        vec![Notifier::new("osascript", &["-e", &script])]
    } else if cfg!(windows) {
        let script = format!(
            "Add-Type -AssemblyName PresentationFramework; \
             [System.Windows.MessageBox]::Show('{}', '{}', 'OK', 'Information')",
            message.replace('\'', "''"),
            title.replace('\'', "''"),
        );
        vec![Notifier::new("powershell", &["-NoProfile", "-Command", &script])]
    } else {
        vec![
            Notifier::new("notify-send", &[title, message]),
            Notifier::new("zenity", &["--info", "--text", message, "--title", title]),
        ]
    }
}

/// Tell the user an instance is already running
pub fn show_already_running() {
    info!("{}", ALREADY_RUNNING);
    if notifiers(TITLE, ALREADY_RUNNING).iter().any(Notifier::run) {
        return;
    }
    warn!("no desktop notifier available, notice only logged");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_has_a_notifier() {
        let list = notifiers(TITLE, ALREADY_RUNNING);
        assert!(!list.is_empty());
        assert!(list[0].args.iter().any(|arg| arg.contains(ALREADY_RUNNING)));
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    #[test]
    fn test_linux_falls_back_to_zenity() {
        let list = notifiers(TITLE, ALREADY_RUNNING);
        let programs: Vec<_> = list.iter().map(|n| n.program).collect();
        assert_eq!(programs, vec!["notify-send", "zenity"]);
    }

    #[test]
    fn test_missing_program_reports_failure() {
        let notifier = Notifier::new("snaplog-no-such-notifier", &[]);
        assert!(!notifier.run());
    }
}
