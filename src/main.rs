use argh::FromArgs;
use log::{LevelFilter, debug, warn};
use pipesh::Interpreter;
use simplelog::{Config, WriteLogger};

const LOG_ENV: &str = "PIPESH_LOG";

#[derive(FromArgs)]
/// A small shell with pipelines, redirections and && / || chains.
struct Options {
    #[argh(option, short = 'c')]
    /// execute this line and exit with its status
    command: Option<String>,

    #[argh(option)]
    /// log level: off, error, warn, info, debug or trace (defaults to $PIPESH_LOG, then warn)
    log_level: Option<LevelFilter>,
}

fn main() {
    let options: Options = argh::from_env();

    let level = options
        .log_level
        .or_else(|| std::env::var(LOG_ENV).ok()?.parse().ok())
        .unwrap_or(LevelFilter::Warn);
    // Logs go to stderr so they never mix with command output.
    if let Err(e) = WriteLogger::init(level, Config::default(), std::io::stderr()) {
        eprintln!("pipesh: can't initialize logging: {e}");
    }

    let mut interpreter = Interpreter::default();
    let _relay = match interpreter.start_signal_relay() {
        Ok(relay) => Some(relay),
        Err(e) => {
            warn!("interrupts will not be relayed: {e:#}");
            None
        }
    };

    let code = match options.command {
        Some(line) => interpreter.execute_line(&line),
        None => match interpreter.repl() {
            Ok(code) => code,
            Err(e) => {
                eprintln!("pipesh: {e:#}");
                1
            }
        },
    };
    debug!("session ended with {code}");
    std::process::exit(code)
}
