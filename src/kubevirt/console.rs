//! VM serial console automation
//!
//! Drives `virtctl console` through a PTY: logs in, runs commands and logs
//! out. The console is blocking; async callers run it on
//! `tokio::task::spawn_blocking`.

use anyhow::Context;
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SuiteConfig;
use crate::utils::{SamplerError, TimeoutSampler};

const LOGIN_PROMPT: &str = "login:";
const PASSWORD_PROMPT: &str = "Password:";

/// Console failures
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("{what}: EOF while waiting for console output")]
    Eof { what: String },

    #[error("{vm}: unable to reach shell prompt after {attempts} attempts")]
    PromptTimeout { vm: String, attempts: u32 },

    #[error("{vm}: password prompt received but no password provided")]
    MissingPassword { vm: String },

    #[error("{vm}: timed out after {timeout:?} waiting for {expected}")]
    Timeout {
        vm: String,
        expected: String,
        timeout: Duration,
    },

    #[error("{vm}: console is not connected")]
    NotConnected { vm: String },

    #[error("Failed to spawn console: {0}")]
    Spawn(String),

    #[error("Console expect failed: {0}")]
    Expect(String),

    #[error("Invalid console pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Console I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of waiting for console output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpectOutcome {
    /// `patterns[index]` matched; `before` is the output preceding it
    Matched {
        index: usize,
        before: String,
        matched: String,
    },
    Eof,
    Timeout,
}

/// A live console process
pub trait ConsoleSession: Send {
    /// Write raw text to the console
    fn send(&mut self, data: &str) -> Result<(), ConsoleError>;

    /// Wait up to `timeout` for the first of `patterns`.
    ///
    /// Unmatched output stays buffered for the next call.
    fn expect(&mut self, patterns: &[Regex], timeout: Duration) -> Result<ExpectOutcome, ConsoleError>;

    /// Whether the underlying process has exited
    fn is_terminated(&mut self) -> bool;

    /// Terminate the process
    fn close(&mut self) -> Result<(), ConsoleError>;
}

/// Starts console processes
pub trait ConsoleSpawner: Send + Sync {
    fn spawn(&self, command: &str, log_path: &Path) -> Result<Box<dyn ConsoleSession>, ConsoleError>;
}

/// PTY-backed sessions via `rexpect`
#[derive(Clone, Debug)]
pub struct RexpectSpawner {
    /// Read timeout of one `exp_any` round; expect calls loop until their own deadline
    poll_interval: Duration,
}

impl Default for RexpectSpawner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl ConsoleSpawner for RexpectSpawner {
    fn spawn(&self, command: &str, log_path: &Path) -> Result<Box<dyn ConsoleSession>, ConsoleError> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new().create(true).append(true).open(log_path)?;

        let session = rexpect::spawn(command, Some(self.poll_interval.as_millis() as u64)).map_err(|e| match e {
            rexpect::error::Error::EOF { .. } => ConsoleError::Eof {
                what: command.to_string(),
            },
            other => ConsoleError::Spawn(other.to_string()),
        })?;

        debug!("Spawned `{}`, logging to {}", command, log_path.display());
        Ok(Box::new(RexpectSession { session, log }))
    }
}

struct RexpectSession {
    session: rexpect::session::PtySession,
    log: File,
}

impl RexpectSession {
    fn record(&mut self, text: &str) {
        if let Err(e) = self.log.write_all(text.as_bytes()) {
            debug!("Failed to write console log: {}", e);
        }
    }
}

impl ConsoleSession for RexpectSession {
    fn send(&mut self, data: &str) -> Result<(), ConsoleError> {
        self.session
            .send(data)
            .map_err(|e| ConsoleError::Expect(e.to_string()))?;
        self.session.flush().map_err(|e| ConsoleError::Expect(e.to_string()))
    }

    fn expect(&mut self, patterns: &[Regex], timeout: Duration) -> Result<ExpectOutcome, ConsoleError> {
        let deadline = Instant::now() + timeout;
        loop {
            let needles = patterns
                .iter()
                .map(|p| rexpect::ReadUntil::Regex(p.clone()))
                .collect();

            match self.session.exp_any(needles) {
                Ok((before, matched)) => {
                    self.record(&before);
                    self.record(&matched);
                    let index = patterns
                        .iter()
                        .position(|p| p.is_match(&matched))
                        .unwrap_or_default();
                    return Ok(ExpectOutcome::Matched {
                        index,
                        before,
                        matched,
                    });
                }
                Err(rexpect::error::Error::Timeout { .. }) => {
                    if Instant::now() >= deadline {
                        return Ok(ExpectOutcome::Timeout);
                    }
                }
                Err(rexpect::error::Error::EOF { got, .. }) => {
                    self.record(&got);
                    return Ok(ExpectOutcome::Eof);
                }
                Err(e) => return Err(ConsoleError::Expect(e.to_string())),
            }
        }
    }

    fn is_terminated(&mut self) -> bool {
        !matches!(
            self.session.process.status(),
            Some(rexpect::process::wait::WaitStatus::StillAlive)
        )
    }

    fn close(&mut self) -> Result<(), ConsoleError> {
        if self.is_terminated() {
            return Ok(());
        }
        self.session
            .process
            .exit()
            .map(|_| ())
            .map_err(|e| ConsoleError::Expect(e.to_string()))
    }
}

/// Console behaviour knobs
#[derive(Clone, Debug)]
pub struct ConsoleOptions {
    pub virtctl: String,
    pub log_dir: PathBuf,
    pub prompts: Vec<String>,
    pub max_attempts: u32,
    pub prompt_timeout: Duration,
    pub command_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub reconnect_sleep: Duration,
}

impl ConsoleOptions {
    pub fn from_config(config: &SuiteConfig) -> Self {
        let console = &config.console;
        Self {
            virtctl: config.virtctl.clone(),
            log_dir: config.data_dir.clone(),
            prompts: console.prompts.clone(),
            max_attempts: console.max_attempts,
            prompt_timeout: Duration::from_secs(console.prompt_timeout_secs),
            command_timeout: Duration::from_secs(console.command_timeout_secs),
            reconnect_timeout: Duration::from_secs(console.reconnect_timeout_secs),
            reconnect_sleep: Duration::from_secs(console.reconnect_sleep_secs),
        }
    }
}

/// The VM a console attaches to, and how to log in
#[derive(Clone, Debug, Default)]
pub struct ConsoleTarget {
    pub vm: String,
    pub namespace: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConsoleTarget {
    pub fn new(vm: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            vm: vm.into(),
            namespace,
            ..Default::default()
        }
    }

    /// Set credentials; explicit values win over ones already set
    pub fn credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username.or(self.username);
        self.password = password.or(self.password);
        self
    }

    fn command(&self, virtctl: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{virtctl} console {} -n {ns}", self.vm),
            None => format!("{virtctl} console {}", self.vm),
        }
    }
}

/// Steps of the login exchange
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectState {
    AwaitPrompt,
    SendUsername,
    SendPassword,
    ShellReady,
    FailEof,
    RetryTimeout,
}

impl ConnectState {
    /// Next step after waiting on `[login, password, prompts...]`
    fn after(outcome: &ExpectOutcome) -> Self {
        match outcome {
            ExpectOutcome::Matched { index: 0, .. } => ConnectState::SendUsername,
            ExpectOutcome::Matched { index: 1, .. } => ConnectState::SendPassword,
            ExpectOutcome::Matched { .. } => ConnectState::ShellReady,
            ExpectOutcome::Eof => ConnectState::FailEof,
            ExpectOutcome::Timeout => ConnectState::RetryTimeout,
        }
    }
}

/// Output of a command run on the console
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Serial console of one VM
pub struct Console {
    target: ConsoleTarget,
    options: ConsoleOptions,
    spawner: Arc<dyn ConsoleSpawner>,
    prompts: Vec<Regex>,
    session: Option<Box<dyn ConsoleSession>>,
    /// Commands run so far; numbers the sync markers
    commands: u32,
}

impl Console {
    pub fn new(
        target: ConsoleTarget,
        options: ConsoleOptions,
        spawner: Arc<dyn ConsoleSpawner>,
    ) -> Result<Self, ConsoleError> {
        let prompts = options
            .prompts
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            target,
            options,
            spawner,
            prompts,
            session: None,
            commands: 0,
        })
    }

    fn log_path(&self) -> PathBuf {
        self.options.log_dir.join(format!("{}.console.log", self.target.vm))
    }

    fn session(&mut self) -> Result<&mut Box<dyn ConsoleSession>, ConsoleError> {
        let vm = &self.target.vm;
        self.session
            .as_mut()
            .ok_or_else(|| ConsoleError::NotConnected { vm: vm.clone() })
    }

    /// Spawn the console process, retrying EOF until the reconnect budget runs out
    fn spawn_session(&mut self) -> Result<(), ConsoleError> {
        let command = self.target.command(&self.options.virtctl);
        let log_path = self.log_path();
        let sampler = TimeoutSampler::new(self.options.reconnect_timeout, self.options.reconnect_sleep);
        let spawner = Arc::clone(&self.spawner);

        let session = sampler
            .sample(
                || spawner.spawn(&command, &log_path).map(Some),
                |e| matches!(e, ConsoleError::Eof { .. }),
            )
            .map_err(|e| match e {
                SamplerError::Aborted(e) => e,
                timeout @ SamplerError::Timeout { .. } => {
                    ConsoleError::Spawn(format!("`{command}`: {timeout}"))
                }
            })?;

        self.session = Some(session);
        Ok(())
    }

    /// Attach to the console and log in
    pub fn connect(&mut self) -> Result<(), ConsoleError> {
        info!("Connect to {} console", self.target.vm);
        self.spawn_session()?;

        if let Err(e) = self.login() {
            warn!("Failed to connect to {} console: {}", self.target.vm, e);
            self.close_session();
            return Err(e);
        }
        Ok(())
    }

    fn login(&mut self) -> Result<(), ConsoleError> {
        let vm = self.target.vm.clone();
        let username = self.target.username.clone();
        let password = self.target.password.clone();
        let max_attempts = self.options.max_attempts;
        let prompt_timeout = self.options.prompt_timeout;

        let mut patterns = vec![
            Regex::new(&regex::escape(LOGIN_PROMPT))?,
            Regex::new(&regex::escape(PASSWORD_PROMPT))?,
        ];
        patterns.extend(self.prompts.iter().cloned());

        let session = self.session()?;
        session.send("\n\n")?;

        let Some(username) = username else {
            return Ok(());
        };

        let mut attempts = 0;
        let mut state = ConnectState::AwaitPrompt;
        loop {
            state = match state {
                ConnectState::AwaitPrompt => ConnectState::after(&session.expect(&patterns, prompt_timeout)?),
                ConnectState::SendUsername => {
                    info!("{}: Sending username", vm);
                    session.send(&format!("{username}\n"))?;
                    ConnectState::AwaitPrompt
                }
                ConnectState::SendPassword => {
                    let Some(password) = password.as_deref() else {
                        return Err(ConsoleError::MissingPassword { vm });
                    };
                    info!("{}: Sending password (masked)", vm);
                    session.send(&format!("{password}\n"))?;
                    ConnectState::AwaitPrompt
                }
                ConnectState::ShellReady => {
                    info!("{}: Shell prompt detected", vm);
                    return Ok(());
                }
                ConnectState::FailEof => return Err(ConsoleError::Eof { what: vm }),
                ConnectState::RetryTimeout => {
                    attempts += 1;
                    debug!(
                        "{}: Timeout waiting for login/prompt (attempt {}/{})",
                        vm, attempts, max_attempts
                    );
                    if attempts >= max_attempts {
                        return Err(ConsoleError::PromptTimeout { vm, attempts });
                    }
                    session.send("\n")?;
                    ConnectState::AwaitPrompt
                }
            };
        }
    }

    /// Log out and close the console process.
    ///
    /// The process is closed even when logging out fails.
    pub fn disconnect(&mut self) -> Result<(), ConsoleError> {
        let terminated = self
            .session
            .as_mut()
            .map(|s| s.is_terminated())
            .unwrap_or(true);
        if terminated {
            self.close_session();
            self.spawn_session()?;
        }

        let result = self.logout();
        self.close_session();
        result
    }

    fn logout(&mut self) -> Result<(), ConsoleError> {
        let vm = self.target.vm.clone();
        let timeout = self.options.command_timeout;
        let logged_in = self.target.username.is_some();
        let prompts = self.prompts.clone();

        let session = self.session()?;
        session.send("\n\n")?;
        expect_match(&mut **session, &vm, &prompts, timeout, "shell prompt")?;
        if logged_in {
            session.send("exit")?;
            session.send("\n\n")?;
            let login = Regex::new(&regex::escape(LOGIN_PROMPT))?;
            expect_match(&mut **session, &vm, &[login], timeout, LOGIN_PROMPT)?;
        }
        Ok(())
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close() {
                warn!("Failed to close {} console: {}", self.target.vm, e);
            }
        }
    }

    /// Run `command` in the logged-in shell and collect its exit status.
    ///
    /// A numbered marker is echoed first and awaited, so prompts left over
    /// from login or earlier commands are consumed before `command` runs.
    pub fn run_command(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ConsoleError> {
        self.commands += 1;
        let vm = self.target.vm.clone();
        let prompts = self.prompts.clone();
        let rc = Regex::new(r"rc=(\d+)")?;
        let (sync_command, sync) = sync_marker(self.commands)?;

        let session = self.session()?;
        session.send(&sync_command)?;
        expect_match(&mut **session, &vm, &[sync], timeout, "sync marker")?;
        expect_match(&mut **session, &vm, &prompts, timeout, "shell prompt")?;

        debug!("{}: Running `{}`", vm, command);
        session.send(&format!("{command}\n"))?;
        let (output, _) = expect_match(&mut **session, &vm, &prompts, timeout, "shell prompt")?;

        session.send("echo rc=$?\n")?;
        let (_, status) = expect_match(&mut **session, &vm, &[rc.clone()], timeout, "exit status")?;
        expect_match(&mut **session, &vm, &prompts, timeout, "shell prompt")?;

        let exit_status = rc
            .captures(&status)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(-1);

        Ok(CommandOutput {
            output: command_output(&output, command),
            exit_status,
        })
    }
}

/// Echo command for sync marker `n` and the pattern matching its output.
///
/// The quotes keep the terminal echo of the command from matching.
fn sync_marker(n: u32) -> Result<(String, Regex), ConsoleError> {
    let command = format!("echo '__localnet_sync_'{n}'__'\n");
    let pattern = Regex::new(&format!("__localnet_sync_{n}__"))?;
    Ok((command, pattern))
}

impl Drop for Console {
    fn drop(&mut self) {
        self.close_session();
    }
}

/// Wait for one of `patterns`; EOF and timeout are errors.
///
/// Returns the output preceding the match and the match itself.
fn expect_match(
    session: &mut dyn ConsoleSession,
    vm: &str,
    patterns: &[Regex],
    timeout: Duration,
    expected: &str,
) -> Result<(String, String), ConsoleError> {
    match session.expect(patterns, timeout)? {
        ExpectOutcome::Matched { before, matched, .. } => Ok((before, matched)),
        ExpectOutcome::Eof => Err(ConsoleError::Eof { what: vm.to_string() }),
        ExpectOutcome::Timeout => Err(ConsoleError::Timeout {
            vm: vm.to_string(),
            expected: expected.to_string(),
            timeout,
        }),
    }
}

/// Output of `command` as seen before the next prompt: the terminal echo
/// and the trailing partial prompt line are dropped
fn command_output(before: &str, command: &str) -> String {
    let mut lines: Vec<&str> = before.lines().map(|line| line.trim_end_matches('\r')).collect();
    if !before.ends_with('\n') {
        lines.pop();
    }
    lines
        .into_iter()
        .filter(|line| !line.trim_end().ends_with(command.trim()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Connect, run `f`, and always disconnect
pub fn with_console<T>(
    mut console: Console,
    f: impl FnOnce(&mut Console) -> Result<T, ConsoleError>,
) -> Result<T, ConsoleError> {
    console.connect()?;
    let result = f(&mut console);
    let disconnected = console.disconnect();

    match (result, disconnected) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(disconnect_error)) => {
            warn!(
                "Failed to disconnect from {} console: {}",
                console.target.vm, disconnect_error
            );
            Err(e)
        }
    }
}

/// Opens consoles that share options and a spawner
#[derive(Clone)]
pub struct ConsoleLauncher {
    options: ConsoleOptions,
    spawner: Arc<dyn ConsoleSpawner>,
}

impl ConsoleLauncher {
    pub fn new(options: ConsoleOptions, spawner: Arc<dyn ConsoleSpawner>) -> Self {
        Self { options, spawner }
    }

    /// PTY-backed launcher configured from `config`
    pub fn from_config(config: &SuiteConfig) -> Self {
        Self::new(ConsoleOptions::from_config(config), Arc::new(RexpectSpawner::default()))
    }

    pub fn console(&self, target: ConsoleTarget) -> Result<Console, ConsoleError> {
        Console::new(target, self.options.clone(), Arc::clone(&self.spawner))
    }

    /// Log in, run `command`, log out; on the blocking pool
    pub async fn run(&self, target: ConsoleTarget, command: String) -> anyhow::Result<CommandOutput> {
        let console = self.console(target)?;
        let timeout = self.options.command_timeout;
        let output = tokio::task::spawn_blocking(move || with_console(console, |c| c.run_command(&command, timeout)))
            .await
            .context("Console task panicked")??;
        Ok(output)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use std::sync::atomic::Ordering;

    fn fedora_target() -> ConsoleTarget {
        ConsoleTarget::new("test-vm1", Some("test-localnet-ns1".to_string()))
            .credentials(Some("fedora".to_string()), Some("fedora".to_string()))
    }

    fn console(spawner: FakeSpawner, target: ConsoleTarget) -> Console {
        Console::new(target, options(), Arc::new(spawner)).unwrap()
    }

    #[test]
    fn test_console_command() {
        let target = ConsoleTarget::new("vm", Some("ns".to_string()));
        assert_eq!(target.command("/usr/bin/virtctl"), "/usr/bin/virtctl console vm -n ns");
        assert_eq!(ConsoleTarget::new("vm", None).command("virtctl"), "virtctl console vm");
    }

    #[test]
    fn test_explicit_credentials_win() {
        let target = ConsoleTarget::new("vm", None)
            .credentials(Some("fedora".to_string()), Some("fedora".to_string()))
            .credentials(Some("root".to_string()), None);
        assert_eq!(target.username.as_deref(), Some("root"));
        assert_eq!(target.password.as_deref(), Some("fedora"));
    }

    #[test]
    fn test_transitions() {
        let matched = |index| ExpectOutcome::Matched {
            index,
            before: String::new(),
            matched: String::new(),
        };
        assert_eq!(ConnectState::after(&matched(0)), ConnectState::SendUsername);
        assert_eq!(ConnectState::after(&matched(1)), ConnectState::SendPassword);
        assert_eq!(ConnectState::after(&matched(2)), ConnectState::ShellReady);
        assert_eq!(ConnectState::after(&matched(4)), ConnectState::ShellReady);
        assert_eq!(ConnectState::after(&ExpectOutcome::Eof), ConnectState::FailEof);
        assert_eq!(ConnectState::after(&ExpectOutcome::Timeout), ConnectState::RetryTimeout);
    }

    #[test]
    fn test_connect_logs_in() {
        let (spawner, probe) = FakeSpawner::default().session(vec![
            Step::Silence,
            Step::Output("Fedora Linux 41\ntest-vm1 login: "),
            Step::Output("Password: "),
            Step::Output("[fedora@test-vm1 ~]$ "),
        ]);
        let mut console = console(spawner, fedora_target());

        console.connect().unwrap();
        assert_eq!(probe.sent(), vec!["\n\n", "\n", "fedora\n", "fedora\n"]);
        assert!(!probe.closed());
    }

    #[test]
    fn test_connect_already_logged_in() {
        let (spawner, probe) = FakeSpawner::default().session(vec![Step::Output("[fedora@test-vm1 ~]$ ")]);
        let mut console = console(spawner, fedora_target());

        console.connect().unwrap();
        assert_eq!(probe.sent(), vec!["\n\n"]);
    }

    #[test]
    fn test_connect_without_username_skips_login() {
        let (spawner, probe) = FakeSpawner::default().session(vec![]);
        let mut console = console(spawner, ConsoleTarget::new("vm", None));

        console.connect().unwrap();
        assert_eq!(probe.sent(), vec!["\n\n"]);
    }

    #[test]
    fn test_connect_times_out_after_max_attempts() {
        let (spawner, probe) = FakeSpawner::default().session(vec![Step::Silence; 10]);
        let mut console = console(spawner, fedora_target());

        match console.connect() {
            Err(ConsoleError::PromptTimeout { attempts, .. }) => assert_eq!(attempts, 5),
            other => panic!("Expected prompt timeout, got {other:?}"),
        }
        // one blank line pair, then a nudge after each of the first four windows
        assert_eq!(probe.sent().len(), 5);
        assert!(probe.closed());
    }

    #[test]
    fn test_connect_missing_password() {
        let (spawner, probe) = FakeSpawner::default().session(vec![Step::Output("login: "), Step::Output("Password: ")]);
        let target = ConsoleTarget::new("vm", None).credentials(Some("fedora".to_string()), None);
        let mut console = console(spawner, target);

        assert!(matches!(console.connect(), Err(ConsoleError::MissingPassword { .. })));
        assert!(probe.closed());
    }

    #[test]
    fn test_connect_fails_on_eof() {
        let (spawner, probe) = FakeSpawner::default().session(vec![Step::Eof]);
        let mut console = console(spawner, fedora_target());

        assert!(matches!(console.connect(), Err(ConsoleError::Eof { .. })));
        assert!(probe.closed());
    }

    #[test]
    fn test_spawn_retries_eof() {
        let spawner = FakeSpawner::default().failing(ConsoleError::Eof {
            what: "virtctl".to_string(),
        });
        let (spawner, probe) = spawner.session(vec![Step::Output("$ ")]);
        let spawner = Arc::new(spawner);
        let mut console = Console::new(fedora_target(), options(), spawner.clone()).unwrap();

        console.connect().unwrap();
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);
        assert_eq!(probe.sent(), vec!["\n\n"]);
    }

    #[test]
    fn test_spawn_does_not_retry_other_errors() {
        let spawner = Arc::new(FakeSpawner::default().failing(ConsoleError::Spawn("no virtctl".to_string())));
        let mut console = Console::new(fedora_target(), options(), spawner.clone()).unwrap();

        assert!(matches!(console.connect(), Err(ConsoleError::Spawn(_))));
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_logs_out() {
        let (spawner, probe) = FakeSpawner::default().session(vec![
            Step::Output("$ "),
            Step::Output("[fedora@test-vm1 ~]$ "),
            Step::Output("logout\ntest-vm1 login: "),
        ]);
        let mut console = console(spawner, fedora_target());

        console.connect().unwrap();
        console.disconnect().unwrap();
        assert_eq!(probe.sent(), vec!["\n\n", "\n\n", "exit", "\n\n"]);
        assert!(probe.closed());
    }

    #[test]
    fn test_disconnect_closes_on_failure() {
        let (spawner, probe) = FakeSpawner::default().session(vec![Step::Output("$ "), Step::Silence]);
        let mut console = console(spawner, fedora_target());

        console.connect().unwrap();
        assert!(matches!(console.disconnect(), Err(ConsoleError::Timeout { .. })));
        assert!(probe.closed());
    }

    #[test]
    fn test_disconnect_respawns_terminated_process() {
        let (spawner, first) = FakeSpawner::default().session_with(vec![Step::Output("$ ")], true);
        let (spawner, second) = spawner.session(vec![Step::Output("$ "), Step::Output("login: ")]);
        let mut console = console(spawner, fedora_target());

        console.connect().unwrap();
        console.disconnect().unwrap();
        assert!(first.closed());
        assert_eq!(second.sent(), vec!["\n\n", "exit", "\n\n"]);
        assert!(second.closed());
    }

    #[test]
    fn test_run_command_collects_exit_status() {
        let (spawner, probe) = FakeSpawner::default().session(vec![
            Step::Output("[fedora@test-vm1 ~]$ "),
            Step::Output("echo '__localnet_sync_'1'__'\r\n__localnet_sync_1__\r\n[fedora@test-vm1 ~]$ "),
            Step::Output("pgrep -f iperf3\r\r\n1234\r\r\n5678\r\r\n[fedora@test-vm1 ~]$ "),
            Step::Output("echo rc=$?\r\nrc=0\r\n"),
            Step::Output("[fedora@test-vm1 ~]$ "),
        ]);
        let mut console = console(spawner, fedora_target());
        console.connect().unwrap();

        let result = console.run_command("pgrep -f iperf3", Duration::from_millis(10)).unwrap();
        assert!(result.success());
        assert_eq!(result.output, "1234\n5678");
        assert_eq!(
            probe.sent(),
            vec![
                "\n\n",
                "echo '__localnet_sync_'1'__'\n",
                "pgrep -f iperf3\n",
                "echo rc=$?\n"
            ]
        );
    }

    #[test]
    fn test_run_command_skips_prompts_left_by_login() {
        // both blank lines sent on connect come back as prompts
        let (spawner, _) = FakeSpawner::default().session(vec![
            Step::Output("[fedora@test-vm1 ~]$ \r\n[fedora@test-vm1 ~]$ "),
            Step::Output("echo '__localnet_sync_'1'__'\r\n__localnet_sync_1__\r\n[fedora@test-vm1 ~]$ "),
            Step::Output("echo hi\r\nhi\r\n[fedora@test-vm1 ~]$ "),
            Step::Output("echo rc=$?\r\nrc=0\r\n[fedora@test-vm1 ~]$ "),
            Step::Output("\r\n[fedora@test-vm1 ~]$ "),
            Step::Output("logout\r\ntest-vm1 login: "),
        ]);
        let console = console(spawner, fedora_target());

        let output = with_console(console, |c| c.run_command("echo hi", Duration::from_millis(10))).unwrap();
        assert_eq!(output.output, "hi");
        assert_eq!(output.exit_status, 0);
    }

    #[test]
    fn test_run_command_numbers_sync_markers() {
        let (spawner, probe) = FakeSpawner::default().session(vec![
            Step::Output("$ "),
            Step::Output("__localnet_sync_1__\n$ "),
            Step::Output("true\n$ "),
            Step::Output("rc=0\n$ "),
            Step::Output("__localnet_sync_2__\n$ "),
            Step::Output("false\n$ "),
            Step::Output("rc=1\n$ "),
        ]);
        let mut console = console(spawner, fedora_target());
        console.connect().unwrap();

        assert!(console.run_command("true", Duration::from_millis(10)).unwrap().success());
        let failed = console.run_command("false", Duration::from_millis(10)).unwrap();
        assert_eq!(failed.exit_status, 1);
        assert!(probe.sent().contains(&"echo '__localnet_sync_'2'__'\n".to_string()));
    }

    #[test]
    fn test_command_output_strips_echo_and_carriage_returns() {
        let before = " ip -br addr\r\r\neth0 UP 10.0.0.1/24\r\r\nlo UNKNOWN 127.0.0.1/8\r\r\n[fedora@test-vm1 ~]";
        assert_eq!(
            command_output(before, "ip -br addr"),
            "eth0 UP 10.0.0.1/24\nlo UNKNOWN 127.0.0.1/8"
        );
    }

    #[test]
    fn test_run_command_requires_connection() {
        let mut console = console(FakeSpawner::default(), fedora_target());
        assert!(matches!(
            console.run_command("true", Duration::from_millis(10)),
            Err(ConsoleError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_with_console_disconnects_after_failure() {
        let (spawner, probe) = FakeSpawner::default().session(vec![
            Step::Output("$ "),
            Step::Output("$ "),
            Step::Output("login: "),
        ]);
        let console = console(spawner, fedora_target());

        let result: Result<(), _> = with_console(console, |_| Err(ConsoleError::Expect("boom".to_string())));
        assert!(matches!(result, Err(ConsoleError::Expect(_))));
        assert_eq!(probe.sent(), vec!["\n\n", "\n\n", "exit", "\n\n"]);
        assert!(probe.closed());
    }
}
