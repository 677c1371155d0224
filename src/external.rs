use crate::command::ExitCode;
use crate::env::Environment;
use anyhow::{Context, Result, anyhow};
use log::debug;
use nix::sys::signal::{SigSet, Signal};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};

/// Starts `args[0]` with `args[1..]` in its own process group.
///
/// The child's standard error is always the session's. SIGINT is unblocked
/// in the child, since the shell's threads keep it blocked for the relay.
pub fn spawn(args: &[String], stdin: Stdio, stdout: Stdio, env: &Environment) -> Result<Child> {
    let (name, rest) = args.split_first().ok_or_else(|| anyhow!("empty command"))?;
    let search_paths = env.get_var("PATH").unwrap_or_default();
    let executable = find_command_path(OsStr::new(&search_paths), &env.current_dir, Path::new(name))
        .ok_or_else(|| anyhow!("command not found"))?;

    let mut interrupts = SigSet::empty();
    interrupts.add(Signal::SIGINT);

    let mut command = std::process::Command::new(&*executable);
    command
        .arg0(name)
        .args(rest)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::inherit())
        .env_clear()
        .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&env.current_dir)
        .process_group(0);
    // SAFETY: the hook only calls sigprocmask, which is async-signal-safe,
    // on a set built before forking.
    unsafe {
        command.pre_exec(move || interrupts.thread_unblock().map_err(io::Error::from));
    }
    let child = command
        .spawn()
        .with_context(|| format!("can't start {}", executable.display()))?;
    debug!("spawned {} as pid {}", name, child.id());
    Ok(child)
}

/// Waits for `child` and maps its status to an exit code.
pub fn wait(mut child: Child) -> Result<ExitCode> {
    let exit_status = child.wait().context("can't wait for child process")?;
    match exit_status.code() {
        Some(x) => Ok(x),
        None => Ok(terminated_by_signal(exit_status)),
    }
}

fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = exit_status.signal() {
        128 + signal
    } else if exit_status.core_dumped() {
        255
    } else {
        1
    }
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Path with more than one component (e.g., `bin/sh` or `./foo`): resolved
///   against `cwd` and returned if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first existing match.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup or relative to `cwd`.
pub fn find_command_path<'a>(
    search_paths: &OsStr,
    cwd: &Path,
    path: &'a Path,
) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (None, None) => {
            // Empty path -> not found
            None
        }
        (Some(x), None) if !path.starts_with(".") => {
            // Single component -> search in PATH
            find_in_path(search_paths, x.as_os_str()).map(Cow::Owned)
        }
        _ => {
            // Multiple components -> search in current dir
            let joined = cwd.join(path);
            find_by_path(&joined).map(|p| Cow::Owned(p.to_path_buf()))
        }
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(search_paths) {
        let path = dir.join(cmd);
        if let Some(path) = find_by_path(&path) {
            return Some(path.to_owned());
        }
    }
    None
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.is_file() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::fs::File;

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    fn env_in(dir: &Path) -> Environment {
        Environment::with_current_dir(dir)
    }

    #[test]
    fn absolute_existing_true() {
        let path = Path::new("/bin/sh");
        let res = find_command_path(osstr("/bin"), Path::new("/"), path);
        assert!(res.is_some(), "Expected to find /bin/sh via absolute path");
        let found = res.unwrap();
        assert_eq!(found.as_ref(), path);
    }

    #[test]
    fn absolute_nonexisting() {
        let path = Path::new("/bin/nonexisting");
        let res = find_command_path(osstr("/bin"), Path::new("/"), path);
        assert!(
            res.is_none(),
            "Expected not to find /bin/nonexisting via absolute path"
        );
    }

    #[test]
    fn single_component_found_in_path() {
        // Search for "sh" in PATH that includes /bin
        let path = Path::new("sh");
        let res = find_command_path(osstr("/bin"), Path::new("/"), path);
        let found = res.expect("Expected to find 'sh' in /bin via PATH search");
        assert!(
            found.as_ref().ends_with("sh"),
            "Found path should end with 'sh' but was {:?}",
            found
        );
        assert!(
            found.as_ref().starts_with("/bin"),
            "Expected path in /bin, got {:?}",
            found
        );
    }

    #[test]
    fn single_component_not_found_in_path() {
        let path = Path::new("nonexisting");
        let res = find_command_path(osstr("/bin"), Path::new("/"), path);
        assert!(res.is_none(), "Expected not to find 'nonexisting' in PATH");
    }

    #[test]
    fn multiple_components_relative_to_cwd() {
        let tmp = tempfile::tempdir().expect("temp dir");
        fs::create_dir_all(tmp.path().join("bin")).expect("create temp bin dir");
        File::create(tmp.path().join("bin").join("sh")).expect("touch bin/sh");

        let res = find_command_path(osstr("/does/not/matter"), tmp.path(), Path::new("bin/sh"));
        let found = res.expect("Expected to find relative 'bin/sh' in cwd");
        assert_eq!(found.as_ref(), tmp.path().join("bin/sh"));
    }

    #[test]
    fn current_dir_with_dot_prefix() {
        let tmp = tempfile::tempdir().expect("temp dir");
        File::create(tmp.path().join("foo")).expect("touch foo");

        let res = find_command_path(osstr("/bin"), tmp.path(), Path::new("./foo"));
        let found = res.expect("Expected to find './foo' in cwd");
        assert!(found.as_ref().ends_with("foo"));
        assert!(found.as_ref().starts_with(tmp.path()));
    }

    #[test]
    fn empty_path_is_none() {
        let res = find_command_path(osstr("/bin"), Path::new("/"), Path::new(""));
        assert!(res.is_none(), "Empty path should not resolve to anything");
    }

    #[test]
    fn spawn_reports_exit_code() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let args: Vec<String> = ["sh", "-c", "exit 7"].iter().map(|s| s.to_string()).collect();
        let child = spawn(&args, Stdio::null(), Stdio::null(), &env_in(tmp.path())).unwrap();
        assert_eq!(wait(child).unwrap(), 7);
    }

    #[test]
    fn spawn_runs_in_session_dir() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let args = vec!["sh".to_string(), "-c".to_string(), "touch marker".to_string()];
        let child = spawn(&args, Stdio::null(), Stdio::null(), &env_in(tmp.path())).unwrap();
        assert_eq!(wait(child).unwrap(), 0);
        assert!(tmp.path().join("marker").exists());
    }

    #[test]
    fn spawn_unknown_command_fails() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let args = vec!["definitely-not-a-command-xyz".to_string()];
        let err = spawn(&args, Stdio::null(), Stdio::null(), &env_in(tmp.path())).unwrap_err();
        assert!(err.to_string().contains("command not found"));
    }

    #[test]
    fn spawned_child_receives_sigint_despite_blocked_mask() {
        let mut blocked = SigSet::empty();
        blocked.add(Signal::SIGINT);
        blocked.thread_block().unwrap();

        let tmp = tempfile::tempdir().expect("temp dir");
        let args = vec!["sleep".to_string(), "30".to_string()];
        let child = spawn(&args, Stdio::null(), Stdio::null(), &env_in(tmp.path())).unwrap();
        let pid = nix::unistd::Pid::from_raw(child.id() as i32);
        nix::sys::signal::kill(pid, Signal::SIGINT).unwrap();
        let code = wait(child).unwrap();

        blocked.thread_unblock().unwrap();
        assert_eq!(code, 128 + Signal::SIGINT as i32);
    }

    #[test]
    fn killed_child_maps_to_128_plus_signal() {
        let child = std::process::Command::new("sh")
            .args(["-c", "kill -9 $$"])
            .spawn()
            .unwrap();
        assert_eq!(wait(child).unwrap(), 128 + 9);
    }
}
