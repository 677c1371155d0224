use crate::command::{
    ExitCode, InheritedStdin, InheritedStdout, RuntimeUnit, Stdin, Stdout, UnitStatus,
};
use crate::env::Environment;
use crate::parser::{LineParser, LogicalCommand, LogicalOp, Pipeline};
use crate::session::Session;
use crate::signals::SignalRelay;
use anyhow::{Context, anyhow};
use log::{debug, info};
use nix::fcntl::OFlag;
use nix::unistd;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fs::File;
use std::io::{self, IsTerminal, Read};
use std::os::fd::AsFd;
use std::thread;

/// A minimal shell interpreter: pipelines, redirections and `&&` / `||` chains
/// over a handful of builtins and external programs.
///
/// The interpreter owns the [`Environment`] and the [`Session`] state; every
/// executed line goes through [`Interpreter::execute_line`].
///
/// Example
/// ```
/// use pipesh::Interpreter;
/// let mut sh = Interpreter::default();
/// assert_eq!(sh.execute_line("true && echo hello"), 0);
/// assert_eq!(sh.execute_line("false || false"), 1);
/// ```
pub struct Interpreter {
    env: Environment,
    session: Session,
}

impl Interpreter {
    /// Create an interpreter over an existing environment.
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            session: Session::new(),
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// False once `exit` ran.
    pub fn is_running(&self) -> bool {
        self.session.running
    }

    /// Starts forwarding Ctrl-C to the programs of the line being executed.
    ///
    /// Call once, from the main thread, before anything is executed.
    pub fn start_signal_relay(&self) -> anyhow::Result<SignalRelay> {
        SignalRelay::spawn(self.session.active.clone(), self.session.prompt.clone())
    }

    /// Expand, parse and execute one input line and return its exit code.
    ///
    /// Parse errors are printed to standard error and yield 1 without
    /// running anything.
    pub fn execute_line(&mut self, line: &str) -> ExitCode {
        let line = self.env.expand(line, self.session.last_exit_code);
        let parsed = LineParser::new(&self.env.current_dir).parse_line(&line);
        let code = match parsed {
            Ok(logical) => {
                debug!("parsed {:?}", logical);
                self.execute_logical(logical)
            }
            Err(e) => {
                eprintln!("parse error: {e}");
                1
            }
        };

        self.session.active.clear();
        self.session.last_exit_code = code;
        if self.env.should_exit {
            self.session.running = false;
        }
        code
    }

    /// Runs the pipelines in order, deciding after each one whether the
    /// chain goes on.
    ///
    /// After a failure followed by `&&`, the whole run of `&&`-joined
    /// pipelines is skipped and execution resumes after it. A success
    /// followed by `||` ends the chain.
    fn execute_logical(&mut self, logical: LogicalCommand) -> ExitCode {
        let LogicalCommand {
            pipelines,
            operators,
        } = logical;
        let mut pipelines: Vec<Option<Pipeline>> = pipelines.into_iter().map(Some).collect();
        let last = pipelines.len().saturating_sub(1);

        let mut exit_code = 0;
        let mut i = 0;
        while i < pipelines.len() {
            if let Some(pipeline) = pipelines[i].take() {
                exit_code = self.execute_pipeline(pipeline);
            }
            if i == last {
                break;
            }

            match (exit_code != 0, operators[i]) {
                (true, LogicalOp::And) => {
                    while i < operators.len() && operators[i] == LogicalOp::And {
                        i += 1;
                    }
                    // `i` is the last pipeline of the failed AND run; it does not run either.
                    i += 1;
                    debug!("&& chain failed, resuming at pipeline {i}");
                }
                (true, LogicalOp::Or) | (false, LogicalOp::And) => i += 1,
                (false, LogicalOp::Or) => {
                    debug!("|| satisfied at pipeline {i}");
                    break;
                }
            }
        }
        exit_code
    }

    /// Runs every stage of `pipeline` concurrently and waits for all of them.
    ///
    /// The result is the last stage's exit code; failures of earlier stages
    /// are reported but don't change it.
    fn execute_pipeline(&mut self, pipeline: Pipeline) -> ExitCode {
        let units = match wire(pipeline) {
            Ok(units) => units,
            Err(e) => {
                eprintln!("pipeline: {e:#}");
                return 1;
            }
        };
        let single = units.len() == 1;

        let statuses: Vec<(String, UnitStatus, Option<Environment>)> = thread::scope(|scope| {
            let workers: Vec<_> = units
                .into_iter()
                .map(|unit| {
                    let name = unit.name.clone();
                    let mut env = self.env.clone();
                    let active = self.session.active.clone();
                    let worker = scope.spawn(move || {
                        let status = unit.run(&mut env, &active);
                        (status, env)
                    });
                    (name, worker)
                })
                .collect();

            workers
                .into_iter()
                .map(|(name, worker)| match worker.join() {
                    Ok((status, env)) => (name, status, Some(env)),
                    Err(_) => {
                        let error = anyhow!("worker panicked");
                        (name, UnitStatus::failed(error), None)
                    }
                })
                .collect()
        });

        let mut exit_code = 0;
        for (name, status, env) in statuses {
            if let Some(e) = &status.error {
                eprintln!("{name}: {e:#}");
            }
            // Builtins only change the session when they run on their own.
            if let (true, Some(env)) = (single, env) {
                self.env = env;
            }
            exit_code = status.exit_code;
        }
        exit_code
    }

    /// Read lines until end of input or `exit`, executing each one.
    ///
    /// Returns the last recorded exit code.
    pub fn repl(&mut self) -> anyhow::Result<ExitCode> {
        let mut input = LineReader::open()?;

        while self.session.running {
            let prompt = self.prompt();
            self.session.prompt.set(prompt.clone());
            let Some(line) = input.read_line(&prompt)? else {
                info!("end of input");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            self.execute_line(&line);
        }

        Ok(self.session.last_exit_code)
    }

    fn prompt(&self) -> String {
        let dir = self
            .env
            .current_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.env.current_dir.display().to_string());
        format!("[{dir}]$ ")
    }
}

impl Default for Interpreter {
    /// Create an interpreter over a snapshot of the process environment.
    fn default() -> Self {
        Self::new(Environment::new())
    }
}

/// Builds one unit per command and connects their streams.
///
/// Input comes from the `<` file, else the previous stage's pipe, else the
/// session's stdin. Output goes to the `>`/`>>` file, else a new pipe into
/// the next stage, else the session's stdout. A stage whose output is
/// redirected leaves the next stage reading the session's stdin.
fn wire(pipeline: Pipeline) -> anyhow::Result<Vec<RuntimeUnit>> {
    let count = pipeline.commands.len();
    let mut units = Vec::with_capacity(count);
    let mut upstream: Option<File> = None;

    for (i, command) in pipeline.commands.into_iter().enumerate() {
        let from_previous = upstream.take();
        let stdin: Box<dyn Stdin> = match (command.input, from_previous) {
            (Some(file), _) => Box::new(file),
            (None, Some(reader)) => Box::new(reader),
            (None, None) => Box::new(InheritedStdin::new()),
        };

        let stdout: Box<dyn Stdout> = match command.output {
            Some(file) => Box::new(file),
            None if i + 1 < count => {
                let (reader, writer) = pipe()?;
                upstream = Some(reader);
                Box::new(writer)
            }
            None => Box::new(InheritedStdout::new()),
        };

        units.push(RuntimeUnit::new(command.args, stdin, stdout));
    }
    Ok(units)
}

/// A close-on-exec pipe, so concurrently spawned children only ever hold the
/// ends given to them as stdin/stdout.
fn pipe() -> anyhow::Result<(File, File)> {
    let (reader, writer) = unistd::pipe2(OFlag::O_CLOEXEC).context("can't create pipe")?;
    Ok((File::from(reader), File::from(writer)))
}

/// Where input lines come from: an editor on a terminal, plain reads otherwise.
enum LineReader {
    Editor(DefaultEditor),
    /// Unbuffered handle on fd 0, so whatever follows the current line is
    /// left for the programs that inherit it.
    Piped(File),
}

impl LineReader {
    fn open() -> anyhow::Result<Self> {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            Ok(LineReader::Editor(DefaultEditor::new()?))
        } else {
            let fd = stdin.as_fd().try_clone_to_owned().context("can't duplicate stdin")?;
            Ok(LineReader::Piped(File::from(fd)))
        }
    }

    /// `None` at end of input.
    fn read_line(&mut self, prompt: &str) -> anyhow::Result<Option<String>> {
        match self {
            LineReader::Editor(editor) => match editor.readline(prompt) {
                Ok(line) => Ok(Some(line)),
                // Ctrl-C at the prompt drops the partial line.
                Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
                Err(ReadlineError::Eof) => Ok(None),
                Err(err) => Err(err.into()),
            },
            LineReader::Piped(stdin) => Ok(read_line_unbuffered(stdin)?),
        }
    }
}

/// Reads up to and including the next `\n`, one byte at a time.
///
/// Returns `None` at end of input. The line terminator is stripped.
fn read_line_unbuffered(reader: &mut impl Read) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) if line.is_empty() => return Ok(None),
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn interpreter_in(dir: &TempDir) -> Interpreter {
        Interpreter::new(Environment::with_current_dir(dir.path()))
    }

    fn read(dir: &TempDir, name: &str) -> String {
        fs::read_to_string(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_echo_pipe_wc_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);

        let code = interp.execute_line("echo \"22\" | wc -c > out.txt");
        assert_eq!(code, 0);
        assert_eq!(read(&dir, "out.txt").trim(), "3");
    }

    #[test]
    fn test_pipeline_status_is_last_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);
        assert_eq!(interp.execute_line("false | true"), 0);
        assert_eq!(interp.execute_line("true | false"), 1);
        assert_eq!(interp.execute_line("true | sh -c 'exit 5'"), 5);
    }

    #[test]
    fn test_logical_and_or() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);

        assert_eq!(interp.execute_line("false && echo X > and.txt"), 1);
        assert_eq!(read(&dir, "and.txt"), "");

        assert_eq!(interp.execute_line("true && echo X > and.txt"), 0);
        assert_eq!(read(&dir, "and.txt"), "X\n");

        assert_eq!(interp.execute_line("false || echo X > or.txt"), 0);
        assert_eq!(read(&dir, "or.txt"), "X\n");

        assert_eq!(interp.execute_line("true || echo Y > or.txt"), 0);
        assert_eq!(read(&dir, "or.txt"), "");
    }

    #[test]
    fn test_failed_and_run_is_skipped_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);

        let code = interp.execute_line(
            "false && echo a >> log.txt && echo b >> log.txt || echo c >> log.txt",
        );
        assert_eq!(code, 0);
        assert_eq!(read(&dir, "log.txt"), "c\n");
    }

    #[test]
    fn test_success_before_or_stops_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);

        let code = interp.execute_line("true || echo a >> log.txt && echo b >> log.txt");
        assert_eq!(code, 0);
        assert_eq!(read(&dir, "log.txt"), "");
    }

    #[test]
    fn test_or_then_and_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);

        let code = interp.execute_line("false || echo a >> log.txt && echo b >> log.txt");
        assert_eq!(code, 0);
        assert_eq!(read(&dir, "log.txt"), "a\nb\n");
    }

    #[test]
    fn test_parse_error_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);
        assert_eq!(interp.execute_line("echo 'open && echo hi > out.txt"), 1);
        assert!(!dir.path().join("out.txt").exists());
        assert_eq!(interp.execute_line("   "), 1);
        assert_eq!(interp.execute_line("cat < missing.txt"), 1);
    }

    #[test]
    fn test_unknown_command_fails_with_1() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);
        assert_eq!(interp.execute_line("no-such-command-xyz"), 1);
        assert_eq!(interp.execute_line("no-such-command-xyz || true"), 0);
    }

    #[test]
    fn test_cd_changes_session_dir_only_when_alone() {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        let mut interp = Interpreter::new(Environment::with_current_dir(&root));

        assert_eq!(interp.execute_line("cd sub | true"), 0);
        assert_eq!(interp.env().current_dir, root);

        assert_eq!(interp.execute_line("cd sub"), 0);
        assert_eq!(interp.env().current_dir, root.join("sub"));

        assert_eq!(interp.execute_line("pwd > where.txt"), 0);
        let written = fs::read_to_string(root.join("sub/where.txt")).unwrap();
        assert_eq!(written, format!("{}\n", root.join("sub").display()));
    }

    #[test]
    fn test_exit_stops_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);
        assert!(interp.is_running());
        assert_eq!(interp.execute_line("exit"), 0);
        assert!(!interp.is_running());
    }

    #[test]
    fn test_last_exit_code_is_recorded_and_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);
        interp.execute_line("sh -c 'exit 4'");
        assert_eq!(interp.session().last_exit_code, 4);
        interp.execute_line("echo $? > status.txt");
        assert_eq!(read(&dir, "status.txt"), "4\n");
    }

    #[test]
    fn test_piped_reader_leaves_the_rest_unread() {
        use std::io::{Read, Seek, SeekFrom, Write};

        let mut input = tempfile::tempfile().unwrap();
        input.write_all(b"cat\r\nhello\nlast").unwrap();
        input.seek(SeekFrom::Start(0)).unwrap();

        assert_eq!(read_line_unbuffered(&mut input).unwrap().as_deref(), Some("cat"));
        let mut rest = String::new();
        input.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "hello\nlast");

        let mut tail = &b"last"[..];
        assert_eq!(read_line_unbuffered(&mut tail).unwrap().as_deref(), Some("last"));
        assert_eq!(read_line_unbuffered(&mut tail).unwrap(), None);
    }

    #[test]
    fn test_active_processes_cleared_after_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter_in(&dir);
        interp.execute_line("true | true");
        assert!(interp.session().active.is_empty());
    }
}
