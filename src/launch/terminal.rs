use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::error::LauncherError;
use crate::launch::script::shell_single_quote;
use crate::platform::Os;

const LINUX_TERMINALS: [&str; 10] = [
    "gnome-terminal",
    "konsole",
    "xfce4-terminal",
    "alacritty",
    "kitty",
    "wezterm",
    "tilix",
    "terminator",
    "xterm",
    "x-terminal-emulator",
];

/// Opens a new, visible terminal session running a generated script.
pub trait TerminalLauncher {
    /// Returns the name of the terminal that was started.
    fn launch(
        &self,
        script: &Path,
        working_dir: &Path,
        preferred: Option<&str>,
    ) -> Result<String, LauncherError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TerminalCommand {
    fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
        }
    }
}

/// Preferred terminal first (if any), then the built-in search order.
pub fn linux_candidates(preferred: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(preferred) = preferred.map(str::trim).filter(|p| !p.is_empty()) {
        out.push(preferred.to_string());
    }
    for name in LINUX_TERMINALS {
        if !out.iter().any(|existing| existing == name) {
            out.push(name.to_string());
        }
    }
    out
}

pub fn terminal_command(
    os: Os,
    terminal: &str,
    script: &Path,
    working_dir: &Path,
) -> TerminalCommand {
    let script_arg = script.to_string_lossy().to_string();
    let wd = working_dir.to_string_lossy().to_string();
    match os {
        Os::Darwin => {
            let quoted = shell_single_quote(&script_arg)
                .replace('\\', "\\\\")
                .replace('"', "\\\"");
            TerminalCommand::new(
                "osascript",
                vec![
                    "-e".to_string(),
                    format!("tell application \"Terminal\" to do script \"bash {quoted}\""),
                    "-e".to_string(),
                    "tell application \"Terminal\" to activate".to_string(),
                ],
            )
        }
        Os::Windows => TerminalCommand::new(
            "cmd",
            vec![
                "/C".to_string(),
                "start".to_string(),
                // Empty title: quoted as `""` on the command line, so `start`
                // never mistakes the working directory or program for one.
                String::new(),
                "/D".to_string(),
                wd,
                "cmd".to_string(),
                "/K".to_string(),
                script_arg,
            ],
        ),
        Os::Linux | Os::Unknown => {
            let bash = || vec!["bash".to_string(), script_arg.clone()];
            let args = match terminal {
                "gnome-terminal" => [vec![format!("--working-directory={wd}"), "--".to_string()], bash()].concat(),
                "konsole" => [vec!["--workdir".to_string(), wd, "-e".to_string()], bash()].concat(),
                "xfce4-terminal" | "terminator" => [
                    vec!["--working-directory".to_string(), wd, "-x".to_string()],
                    bash(),
                ]
                .concat(),
                "alacritty" => [
                    vec!["--working-directory".to_string(), wd, "-e".to_string()],
                    bash(),
                ]
                .concat(),
                "kitty" => [vec!["--directory".to_string(), wd], bash()].concat(),
                "wezterm" => [
                    vec!["start".to_string(), "--cwd".to_string(), wd, "--".to_string()],
                    bash(),
                ]
                .concat(),
                "tilix" => vec![
                    "--working-directory".to_string(),
                    wd,
                    "-e".to_string(),
                    format!("bash {}", shell_single_quote(&script_arg)),
                ],
                _ => [vec!["-e".to_string()], bash()].concat(),
            };
            TerminalCommand::new(terminal, args)
        }
    }
}

pub struct SystemTerminal {
    os: Os,
}

impl SystemTerminal {
    pub fn new(os: Os) -> Self {
        Self { os }
    }

    fn spawn(command: &TerminalCommand, working_dir: &Path) -> std::io::Result<()> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if working_dir.is_dir() {
            cmd.current_dir(working_dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd.spawn()?;
        debug!(pid = child.id(), program = %command.program, "terminal spawned");
        Ok(())
    }
}

impl TerminalLauncher for SystemTerminal {
    fn launch(
        &self,
        script: &Path,
        working_dir: &Path,
        preferred: Option<&str>,
    ) -> Result<String, LauncherError> {
        match self.os {
            Os::Darwin | Os::Windows => {
                let command = terminal_command(self.os, "", script, working_dir);
                Self::spawn(&command, working_dir).map_err(|err| {
                    LauncherError::NoTerminal(format!("{}: {err}", command.program))
                })?;
                info!(program = %command.program, "launched terminal");
                Ok(command.program)
            }
            Os::Linux | Os::Unknown => {
                let candidates = linux_candidates(preferred);
                for name in &candidates {
                    if which::which(name).is_err() {
                        continue;
                    }
                    let command = terminal_command(self.os, name, script, working_dir);
                    match Self::spawn(&command, working_dir) {
                        Ok(()) => {
                            info!(terminal = %name, "launched terminal");
                            return Ok(name.clone());
                        }
                        Err(err) => warn!("failed to start {name}: {err}"),
                    }
                }
                Err(LauncherError::NoTerminal(format!(
                    "tried {}; set launch.terminal or run {} yourself",
                    candidates.join(", "),
                    script.display()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn preferred_terminal_goes_first_without_duplicates() {
        let list = linux_candidates(Some("kitty"));
        assert_eq!(list[0], "kitty");
        assert_eq!(list.iter().filter(|name| *name == "kitty").count(), 1);
        assert_eq!(list.last().map(String::as_str), Some("x-terminal-emulator"));
        assert_eq!(linux_candidates(Some("  ")).len(), LINUX_TERMINALS.len());
        assert_eq!(linux_candidates(None)[0], "gnome-terminal");
    }

    #[test]
    fn linux_commands_run_the_script_with_bash() {
        let script = PathBuf::from("/home/u/.config/claude-launcher/launch.sh");
        let wd = PathBuf::from("/home/u/project");
        let gnome = terminal_command(Os::Linux, "gnome-terminal", &script, &wd);
        assert_eq!(
            gnome.args,
            vec![
                "--working-directory=/home/u/project",
                "--",
                "bash",
                "/home/u/.config/claude-launcher/launch.sh"
            ]
        );
        let konsole = terminal_command(Os::Linux, "konsole", &script, &wd);
        assert_eq!(&konsole.args[..2], ["--workdir", "/home/u/project"]);
        let xterm = terminal_command(Os::Linux, "xterm", &script, &wd);
        assert_eq!(xterm.program, "xterm");
        assert_eq!(xterm.args, vec!["-e", "bash", "/home/u/.config/claude-launcher/launch.sh"]);
    }

    #[test]
    fn macos_uses_terminal_app() {
        let command = terminal_command(
            Os::Darwin,
            "",
            Path::new("/Users/u/launch.sh"),
            Path::new("/Users/u"),
        );
        assert_eq!(command.program, "osascript");
        assert!(command.args[1].contains("do script \"bash '/Users/u/launch.sh'\""));
    }

    #[test]
    fn windows_uses_start() {
        let command = terminal_command(
            Os::Windows,
            "",
            Path::new("C:\\cfg\\launch.cmd"),
            Path::new("C:\\work"),
        );
        assert_eq!(command.program, "cmd");
        assert_eq!(command.args[..2], ["/C".to_string(), "start".to_string()]);
        assert_eq!(command.args[2], "");
        assert!(command.args.iter().all(|arg| !arg.contains('"')));
        assert_eq!(command.args[3..5], ["/D".to_string(), "C:\\work".to_string()]);
        assert_eq!(command.args.last().map(String::as_str), Some("C:\\cfg\\launch.cmd"));
    }
}
