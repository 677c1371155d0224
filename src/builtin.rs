use crate::command::ExitCode;
use crate::env::Environment;
use anyhow::{Context, Result, anyhow};
use argh::{EarlyExit, FromArgs};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    const NAME: &'static str;

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;

    fn parse(args: &[&str]) -> Result<Self, EarlyExit> {
        Self::from_args(&[Self::NAME], args)
    }
}

/// The closed set of builtins, resolved once per command from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Cd,
    Pwd,
    Echo,
    Kill,
    Ps,
    Exit,
}

impl BuiltinKind {
    /// Returns `None` for anything that has to be spawned as a program.
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "cd" => Some(BuiltinKind::Cd),
            "pwd" => Some(BuiltinKind::Pwd),
            "echo" => Some(BuiltinKind::Echo),
            "kill" => Some(BuiltinKind::Kill),
            "ps" => Some(BuiltinKind::Ps),
            "exit" => Some(BuiltinKind::Exit),
            _ => None,
        }
    }

    pub(crate) fn parse(self, args: &[&str]) -> Result<Builtin, EarlyExit> {
        Ok(match self {
            BuiltinKind::Cd => Builtin::Cd(Cd::parse(args)?),
            BuiltinKind::Pwd => Builtin::Pwd(Pwd::parse(args)?),
            BuiltinKind::Echo => Builtin::Echo(Echo::parse(args)?),
            BuiltinKind::Kill => Builtin::Kill(Kill::parse(args)?),
            BuiltinKind::Ps => Builtin::Ps(Ps::parse(args)?),
            BuiltinKind::Exit => Builtin::Exit(Exit::parse(args)?),
        })
    }
}

/// A builtin with its arguments parsed.
pub(crate) enum Builtin {
    Cd(Cd),
    Pwd(Pwd),
    Echo(Echo),
    Kill(Kill),
    Ps(Ps),
    Exit(Exit),
}

impl Builtin {
    pub(crate) fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match self {
            Builtin::Cd(cmd) => cmd.execute(stdin, stdout, env),
            Builtin::Pwd(cmd) => cmd.execute(stdin, stdout, env),
            Builtin::Echo(cmd) => cmd.execute(stdin, stdout, env),
            Builtin::Kill(cmd) => cmd.execute(stdin, stdout, env),
            Builtin::Ps(cmd) => cmd.execute(stdin, stdout, env),
            Builtin::Exit(cmd) => cmd.execute(stdin, stdout, env),
        }
    }

    /// `--help` output goes to `stdout` with status 0; usage errors become
    /// the unit's error.
    pub(crate) fn report_early_exit(early: EarlyExit, stdout: &mut dyn Write) -> Result<ExitCode> {
        let EarlyExit { output, status } = early;
        match status {
            Ok(()) => {
                stdout.write_all(output.as_bytes())?;
                Ok(0)
            }
            Err(()) => Err(anyhow!("{}", output.trim_end())),
        }
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    const NAME: &'static str = "pwd";

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", env.current_dir.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to $HOME, or to / when HOME is not set.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    const NAME: &'static str = "cd";

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let target = match self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => env
                .get_var("HOME")
                .filter(|home| !home.is_empty())
                .map_or_else(|| PathBuf::from("/"), PathBuf::from),
        };

        let new_dir = env.current_dir.join(target);
        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("can't change directory to {}", new_dir.display()))?;
        if !canonical.is_dir() {
            return Err(anyhow!("{}: not a directory", canonical.display()));
        }

        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// End the shell session.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    const NAME: &'static str = "exit";

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(0)
    }
}

/// Write the arguments to standard output, separated by spaces.
///
/// Any leading run of `-n`, `-nn`, ... arguments suppresses the trailing
/// newline. The two-character sequence `\n` in the output becomes a newline.
/// There is no `--help`: every other argument is printed as is.
pub struct Echo {
    pub no_newline: bool,
    pub args: Vec<String>,
}

impl FromArgs for Echo {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        let flags = args.iter().take_while(|arg| is_no_newline_flag(arg)).count();
        Ok(Echo {
            no_newline: flags > 0,
            args: args[flags..].iter().map(|s| s.to_string()).collect(),
        })
    }
}

fn is_no_newline_flag(arg: &str) -> bool {
    arg.strip_prefix('-')
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c == 'n'))
}

impl BuiltinCommand for Echo {
    const NAME: &'static str = "echo";

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let s = self.args.join(" ").replace("\\n", "\n");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Kill a process by its numeric id.
pub struct Kill {
    #[argh(positional)]
    /// id of the process to kill.
    pub pid: i32,
}

impl BuiltinCommand for Kill {
    const NAME: &'static str = "kill";

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        // 0 and negative ids address process groups, the shell's own included.
        if self.pid <= 0 {
            return Err(anyhow!("invalid process id {}", self.pid));
        }
        signal::kill(Pid::from_raw(self.pid), Signal::SIGKILL)
            .with_context(|| format!("can't kill process {}", self.pid))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Show the shell's own process.
pub struct Ps {}

impl BuiltinCommand for Ps {
    const NAME: &'static str = "ps";

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{:>6} {:>6} {:>8} {}", "PID", "PPID", "OS", "ARCH")?;
        writeln!(
            stdout,
            "{:>6} {:>6} {:>8} {}",
            std::process::id(),
            std::os::unix::process::parent_id(),
            std::env::consts::OS,
            std::env::consts::ARCH
        )?;
        Ok(0)
    }
}
