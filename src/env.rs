use regex::{Captures, Regex};
use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::command::ExitCode;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([^}]*)\}|([A-Za-z0-9_]+)|([?$]))").expect("variable pattern is valid")
});

/// Mutable, user-level view of the process environment used by the interpreter.
///
/// The environment contains:
/// - `vars`: a map of environment variables that will be visible to executed commands.
/// - `current_dir`: the working directory for command execution and redirections.
/// - `should_exit`: set by the `exit` builtin; the session stops once it is observed.
///
/// The interpreter never changes the process-wide working directory; `cd` only
/// updates `current_dir` here.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., PATH, HOME).
    pub vars: HashMap<String, String>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
    /// When set to true, indicates that the session should end.
    pub should_exit: bool,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    ///
    /// This copies variables from `std::env::vars()` and initializes `current_dir`
    /// from `std::env::current_dir()`. The `should_exit` flag is initialized to `false`.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            vars,
            current_dir,
            should_exit: false,
        }
    }

    /// Same as [`Environment::new`] but starting in `dir`.
    pub fn with_current_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            current_dir: dir.into(),
            ..Self::new()
        }
    }

    /// Get the value of an environment variable.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    /// Set or override an environment variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Substitute `$NAME`, `${NAME}`, `$?` and `$$` in a raw input line.
    ///
    /// Unset variables become the empty string. A `$` that does not start a
    /// name is kept as is.
    pub fn expand(&self, line: &str, last_exit_code: ExitCode) -> String {
        VARIABLE
            .replace_all(line, |caps: &Captures| {
                if let Some(special) = caps.get(3) {
                    return match special.as_str() {
                        "?" => last_exit_code.to_string(),
                        _ => std::process::id().to_string(),
                    };
                }
                let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
                self.get_var(name).unwrap_or_default()
            })
            .into_owned()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::env::Environment;
    use std::collections::HashMap;
    use std::env as stdenv;

    fn empty_env() -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: stdenv::current_dir().unwrap(),
            should_exit: false,
        }
    }

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = empty_env();

        // initially absent
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");

        assert_eq!(env.get_var("KEY"), Some("VALUE".to_string()));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
    }

    #[test]
    fn test_expand_both_forms() {
        let mut env = empty_env();
        env.set_var("USER", "alice");
        env.set_var("DIR", "/tmp");
        assert_eq!(env.expand("echo $USER ${DIR}/x", 0), "echo alice /tmp/x");
        assert_eq!(env.expand("echo ${USER}name", 0), "echo alicename");
    }

    #[test]
    fn test_expand_unset_is_empty() {
        let env = empty_env();
        assert_eq!(env.expand("a$NOPE_NOT_SET b", 0), "a b");
    }

    #[test]
    fn test_bare_dollar_stays_literal() {
        let env = empty_env();
        assert_eq!(env.expand("echo $ 5$", 0), "echo $ 5$");
        assert_eq!(env.expand("echo ${unterminated", 0), "echo ${unterminated");
    }

    #[test]
    fn test_expand_specials() {
        let env = empty_env();
        assert_eq!(env.expand("echo $?", 3), "echo 3");
        assert_eq!(env.expand("$$", 0), std::process::id().to_string());
    }
}
