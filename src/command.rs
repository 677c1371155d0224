use crate::builtin::{Builtin, BuiltinKind};
use crate::env::Environment;
use crate::external;
use crate::session::ActiveProcesses;
use log::debug;
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, Stdio};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Abstraction over a readable input stream that can also be converted into
/// a [`Stdio`] handle for spawning external processes.
///
/// A blanket implementation exists for any type that implements `Read` and
/// `Into<Stdio>` (e.g. `File`, which covers both redirections and pipe ends).
pub trait Stdin: Read + Send {
    /// Convert this input into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;
}

impl<T: Read + Into<Stdio> + Send> Stdin for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// Abstraction over a writable output stream that can also be converted into
/// a [`Stdio`] handle for spawning external processes.
///
/// A blanket implementation exists for any type that implements `Write` and `Into<Stdio>`.
pub trait Stdout: Write + Send {
    /// Convert this output into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;
}

impl<T: Write + Into<Stdio> + Send> Stdout for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// The session's own standard input.
pub struct InheritedStdin(io::Stdin);

impl InheritedStdin {
    pub fn new() -> Self {
        Self(io::stdin())
    }
}

impl Read for InheritedStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Stdin for InheritedStdin {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::inherit()
    }
}

/// The session's own standard output.
pub struct InheritedStdout(io::Stdout);

impl InheritedStdout {
    pub fn new() -> Self {
        Self(io::stdout())
    }
}

impl Write for InheritedStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Stdout for InheritedStdout {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::inherit()
    }
}

/// Outcome of one finished unit.
#[derive(Debug, Default)]
pub struct UnitStatus {
    pub exit_code: ExitCode,
    pub error: Option<anyhow::Error>,
}

impl UnitStatus {
    pub fn failed(error: anyhow::Error) -> Self {
        Self {
            exit_code: 1,
            error: Some(error),
        }
    }
}

/// Executable counterpart of a parsed pipeline stage.
///
/// A unit owns both of its stream ends. They are released when the unit
/// finishes (or, for external programs, as soon as the child holds its own
/// copies), which is what lets the next stage see end-of-stream.
pub struct RuntimeUnit {
    pub name: String,
    args: Vec<String>,
    builtin: Option<BuiltinKind>,
    stdin: Box<dyn Stdin>,
    stdout: Box<dyn Stdout>,
    exit_code: ExitCode,
    last_error: Option<anyhow::Error>,
    child: Option<Child>,
}

impl fmt::Debug for RuntimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeUnit")
            .field("args", &self.args)
            .field("builtin", &self.builtin)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}

impl RuntimeUnit {
    /// `args[0]` is the program name.
    pub fn new(args: Vec<String>, stdin: Box<dyn Stdin>, stdout: Box<dyn Stdout>) -> Self {
        let name = args.first().cloned().unwrap_or_default();
        let builtin = BuiltinKind::resolve(&name);
        Self {
            name,
            args,
            builtin,
            stdin,
            stdout,
            exit_code: 0,
            last_error: None,
            child: None,
        }
    }

    /// Runs the unit to completion and returns its status.
    ///
    /// External processes are registered in `active` as soon as they are
    /// spawned so an interrupt can be relayed to them.
    pub fn run(mut self, env: &mut Environment, active: &ActiveProcesses) -> UnitStatus {
        match self.builtin {
            Some(kind) => self.run_builtin(kind, env),
            None => self.start_external(env, active),
        }
        if let Some(child) = self.child.take() {
            let pid = child.id();
            match external::wait(child) {
                Ok(code) => self.exit_code = code,
                Err(e) => {
                    self.exit_code = 1;
                    self.last_error = Some(e);
                }
            }
            // Once reaped, the pid may be reused by an unrelated process.
            active.unregister(pid);
        }
        debug!("{} finished with {}", self.name, self.exit_code);
        UnitStatus {
            exit_code: self.exit_code,
            error: self.last_error,
        }
    }

    fn run_builtin(&mut self, kind: BuiltinKind, env: &mut Environment) {
        let args: Vec<&str> = self.args.iter().skip(1).map(String::as_str).collect();
        let result = match kind.parse(&args) {
            Ok(builtin) => builtin.execute(&mut self.stdin, &mut self.stdout, env),
            Err(early) => Builtin::report_early_exit(early, &mut self.stdout),
        };
        let flushed = self.stdout.flush().map_err(anyhow::Error::from);
        match result.and_then(|code| flushed.map(|()| code)) {
            Ok(code) => self.exit_code = code,
            Err(e) => {
                self.exit_code = 1;
                self.last_error = Some(e);
            }
        }
    }

    fn start_external(&mut self, env: &Environment, active: &ActiveProcesses) {
        // The child gets the stream ends; Command drops our copies right after spawning.
        let stdin = std::mem::replace(&mut self.stdin, Box::new(Detached));
        let stdout = std::mem::replace(&mut self.stdout, Box::new(Detached));
        match external::spawn(&self.args, stdin.stdio(), stdout.stdio(), env) {
            Ok(child) => {
                active.register(child.id());
                self.child = Some(child);
            }
            Err(e) => {
                self.exit_code = 1;
                self.last_error = Some(e);
            }
        }
    }
}

/// What a unit is left holding once its real streams went to a child process.
struct Detached;

impl Read for Detached {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for Detached {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stdin for Detached {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::null()
    }
}

impl Stdout for Detached {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn unit(args: &[&str], out: File) -> RuntimeUnit {
        let args = args.iter().map(|s| s.to_string()).collect();
        let stdin = File::open("/dev/null").unwrap();
        RuntimeUnit::new(args, Box::new(stdin), Box::new(out))
    }

    #[test]
    fn test_external_unit_leaves_active_set_when_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environment::with_current_dir(dir.path());
        let active = ActiveProcesses::default();
        active.register(1);

        let out = tempfile::tempfile().unwrap();
        let status = unit(&["sh", "-c", "exit 3"], out).run(&mut env, &active);
        assert_eq!(status.exit_code, 3);
        assert!(status.error.is_none());
        assert_eq!(active.drain(), vec![nix::unistd::Pid::from_raw(1)]);
    }

    #[test]
    fn test_builtin_unit_writes_to_its_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut env = Environment::with_current_dir(dir.path());
        let active = ActiveProcesses::default();

        let status = unit(&["echo", "hi"], File::create(&path).unwrap()).run(&mut env, &active);
        assert_eq!(status.exit_code, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hi
");
        assert!(active.is_empty());
    }

    #[test]
    fn test_unknown_program_fails_the_unit() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environment::with_current_dir(dir.path());
        let active = ActiveProcesses::default();

        let out = tempfile::tempfile().unwrap();
        let status = unit(&["no-such-program-xyz"], out).run(&mut env, &active);
        assert_eq!(status.exit_code, 1);
        assert!(status.error.unwrap().to_string().contains("command not found"));
    }
}
