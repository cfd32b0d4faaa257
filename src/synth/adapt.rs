//! Shell-indirection adaptation of launcher commands and its inverse.
//!
//! Some interpreter launchers cannot be spawned directly by the gateway on
//! hosts where they are shell scripts (`npx.cmd` and friends). Adaptation
//! rewrites `npx pkg` into `cmd /c npx -y pkg`; de-adaptation turns an
//! imported `cmd /c npx -y pkg` back into `npx pkg`.

/// Shell used for the indirection.
pub const SHELL: &str = "cmd";

/// Flag telling the shell to run the rest of the line.
pub const SHELL_FLAG: &str = "/c";

/// A launcher that gets wrapped behind the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launcher {
    pub name: &'static str,
    /// Inserted right after the launcher unless already present in the args.
    pub default_flag: Option<&'static str>,
}

/// Recognized launchers.
pub const LAUNCHERS: &[Launcher] = &[
    Launcher {
        name: "npx",
        default_flag: Some("-y"),
    },
    Launcher {
        name: "uvx",
        default_flag: None,
    },
    Launcher {
        name: "docker",
        default_flag: Some("run"),
    },
];

/// Final path component of `command`, split on both separators.
fn basename(command: &str) -> &str {
    command.rsplit(['/', '\\']).next().unwrap_or(command)
}

/// Look up the launcher matching the file name of `command`, case-insensitively.
pub fn find_launcher(command: &str) -> Option<&'static Launcher> {
    let base = basename(command);
    LAUNCHERS.iter().find(|l| base.eq_ignore_ascii_case(l.name))
}

fn is_shell(command: &str) -> bool {
    let base = basename(command);
    base.eq_ignore_ascii_case(SHELL) || base.eq_ignore_ascii_case("cmd.exe")
}

/// Wrap a launcher invocation behind the shell.
///
/// Commands that are not recognized launchers are returned unchanged.
pub fn adapt(command: &str, args: &[String]) -> (String, Vec<String>) {
    let Some(launcher) = find_launcher(command) else {
        return (command.to_string(), args.to_vec());
    };

    let mut adapted = Vec::with_capacity(args.len() + 3);
    adapted.push(SHELL_FLAG.to_string());
    adapted.push(command.to_string());
    if let Some(flag) = launcher.default_flag
        && !args.iter().any(|a| a == flag)
    {
        adapted.push(flag.to_string());
    }
    adapted.extend(args.iter().cloned());

    tracing::debug!(
        command = %command,
        launcher = launcher.name,
        "adapted launcher command for shell indirection"
    );
    (SHELL.to_string(), adapted)
}

/// Whether `command`/`args` look like an adapted launcher invocation.
pub fn is_adapted(command: &str, args: &[String]) -> bool {
    is_shell(command)
        && args.len() >= 2
        && args[0].eq_ignore_ascii_case(SHELL_FLAG)
        && find_launcher(&args[1]).is_some()
}

/// Undo [`adapt`]. Invocations that are not adapted are returned unchanged.
///
/// The launcher's default flag is removed when it directly follows the
/// launcher, since that is where adaptation inserts it.
pub fn deadapt(command: &str, args: &[String]) -> (String, Vec<String>) {
    if !is_adapted(command, args) {
        return (command.to_string(), args.to_vec());
    }
    let launcher_token = &args[1];
    let mut rest = &args[2..];
    if let Some(launcher) = find_launcher(launcher_token)
        && let Some(flag) = launcher.default_flag
        && rest.first().map(String::as_str) == Some(flag)
    {
        rest = &rest[1..];
    }

    tracing::debug!(command = %launcher_token, "de-adapted shell-wrapped launcher command");
    (launcher_token.clone(), rest.to_vec())
}
