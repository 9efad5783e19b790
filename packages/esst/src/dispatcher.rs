use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::num::NonZero;

use thiserror::Error;
use tracing::debug;

use crate::{
    CompositePlan, Console, Field, HarnessConfig, ParamError, PromptError, StressKind,
    StressSuite, SuiteError, TestParameters, run_composite,
};

/// The prompt shown while waiting for a command.
pub const COMMAND_PROMPT: &str = "[ESST] >> ";

const MEMORY_WARNING: &str = "WARNING: the memory test floods every worker's buffer and hammers \
     adjacent DRAM rows. On unstable hardware this can corrupt data held by other programs.";

/// Whether the dispatcher keeps reading commands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ReplState {
    /// Waiting for the next command.
    Running,

    /// `exit` was entered or input ended.
    Terminated,
}

/// Why a command did not complete. None of these stop the dispatcher.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandError {
    /// A prompted field could not be read.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// The entered parameters were rejected.
    #[error(transparent)]
    Parameters(#[from] ParamError),

    /// The operator declined a confirmation.
    #[error("declined by operator")]
    Declined,

    /// The stress run failed.
    #[error(transparent)]
    Suite(#[from] SuiteError),

    /// Writing output failed.
    #[error(transparent)]
    Output(#[from] io::Error),
}

type Action<S, R, W> = fn(&mut Dispatcher<S, R, W>) -> Result<(), CommandError>;

struct Command<S, R, W> {
    summary: &'static str,
    action: Action<S, R, W>,
}

/// The interactive command loop.
///
/// Maps each command name to an action that receives the dispatcher itself. The table is built
/// once in [`new()`][Self::new]; every action prompts for what it needs through the console and
/// hands resolved [`TestParameters`] to the [`StressSuite`].
pub struct Dispatcher<S, R, W> {
    suite: S,
    console: Console<R, W>,
    plan: CompositePlan,
    intensity: NonZero<u64>,
    state: ReplState,
    commands: BTreeMap<&'static str, Command<S, R, W>>,
}

impl<S, R, W> Dispatcher<S, R, W>
where
    S: StressSuite,
    R: BufRead,
    W: Write,
{
    /// Creates a dispatcher that runs tests on `suite`, taking composite settings from
    /// `config` and talking to the operator through `console`.
    #[must_use]
    pub fn new(suite: S, config: &HarnessConfig, console: Console<R, W>) -> Self {
        let mut commands = BTreeMap::new();

        commands.insert("exit", Command::new("Leave ESST", Self::exit));
        commands.insert("menu", Command::new("List all commands", Self::menu));
        commands.insert(
            "avx",
            Command::new("Vector fused multiply-add stress", Self::arithmetic),
        );
        commands.insert(
            "3np1",
            Command::new("Collatz (3n + 1) integer pipeline stress", Self::collatz),
        );
        commands.insert(
            "aesenc",
            Command::new("AES-256 encryption stress", Self::aes_encrypt),
        );
        commands.insert(
            "aesdec",
            Command::new("AES-256 decryption stress", Self::aes_decrypt),
        );
        commands.insert("disk", Command::new("Synced disk write stress", Self::disk));
        commands.insert(
            "mem",
            Command::new("Memory flood and rowhammer stress (destructive)", Self::memory),
        );
        commands.insert(
            "full",
            Command::new("Run every test in sequence", Self::composite),
        );
        commands.insert("nuke", Command::new("Same as full", Self::composite));

        Self {
            suite,
            console,
            plan: config.composite_plan().clone(),
            intensity: config.intensity(),
            state: ReplState::Running,
            commands,
        }
    }

    /// Whether the dispatcher is still accepting commands.
    #[must_use]
    pub fn state(&self) -> ReplState {
        self.state
    }

    /// The stress suite commands are executed on.
    #[must_use]
    pub fn suite(&self) -> &S {
        &self.suite
    }

    /// Consumes the dispatcher, returning its console.
    #[must_use]
    pub fn into_console(self) -> Console<R, W> {
        self.console
    }

    /// Reads and executes commands until `exit` or end of input.
    ///
    /// # Errors
    ///
    /// Returns an error only if the console itself fails. Failing commands are reported to the
    /// operator and the loop continues.
    pub fn run(&mut self) -> io::Result<()> {
        self.console.say(format_args!(
            "ESST hardware stress tester, {} workers. Type 'menu' for a list of commands.",
            self.suite.worker_count()
        ))?;

        while self.state == ReplState::Running {
            match self.console.prompt(COMMAND_PROMPT)? {
                Some(line) => self.dispatch(&line)?,
                None => {
                    debug!("input ended, terminating");
                    self.state = ReplState::Terminated;
                }
            }
        }

        Ok(())
    }

    /// Executes one command line. Empty input does nothing; unknown commands are reported.
    ///
    /// # Errors
    ///
    /// Returns an error only if the console itself fails.
    pub fn dispatch(&mut self, line: &str) -> io::Result<()> {
        let name = line.trim();

        if name.is_empty() {
            return Ok(());
        }

        let Some(action) = self.commands.get(name).map(|command| command.action) else {
            return self
                .console
                .say(format_args!("Unknown command '{name}'. Type 'menu' for a list of commands."));
        };

        debug!(command = name, "dispatching command");

        match action(self) {
            Ok(()) | Err(CommandError::Declined) => Ok(()),
            Err(CommandError::Prompt(PromptError::Io(e)) | CommandError::Output(e)) => Err(e),
            Err(CommandError::Prompt(_)) => self.console.say("Invalid input!"),
            Err(CommandError::Parameters(ParamError::InvertedRange { .. })) => self
                .console
                .say("Invalid range! Lower bound must not exceed upper bound."),
            Err(CommandError::Parameters(e)) => {
                self.console.say(format_args!("Invalid input! {e}"))
            }
            Err(CommandError::Suite(e)) => self.console.say(format_args!("Test failed: {e}")),
        }
    }

    #[expect(
        clippy::unnecessary_wraps,
        reason = "every command action has the same signature"
    )]
    fn exit(&mut self) -> Result<(), CommandError> {
        self.state = ReplState::Terminated;
        Ok(())
    }

    fn menu(&mut self) -> Result<(), CommandError> {
        let lines: Vec<String> = self
            .commands
            .iter()
            .map(|(name, command)| format!("  {name:<8}{}", command.summary))
            .collect();

        self.console.say("Commands:")?;

        for line in lines {
            self.console.say(line)?;
        }

        Ok(())
    }

    fn arithmetic(&mut self) -> Result<(), CommandError> {
        let parameters = self.prompt_range()?;
        self.execute(StressKind::Arithmetic, &parameters)
    }

    fn collatz(&mut self) -> Result<(), CommandError> {
        let parameters = self.prompt_range()?;
        self.execute(StressKind::Collatz, &parameters)
    }

    fn aes_encrypt(&mut self) -> Result<(), CommandError> {
        let parameters = self.prompt_block()?;
        self.execute(StressKind::AesEncrypt, &parameters)
    }

    fn aes_decrypt(&mut self) -> Result<(), CommandError> {
        let parameters = self.prompt_block()?;
        self.execute(StressKind::AesDecrypt, &parameters)
    }

    fn disk(&mut self) -> Result<(), CommandError> {
        let parameters = self.prompt_block()?;
        self.execute(StressKind::Disk, &parameters)
    }

    fn memory(&mut self) -> Result<(), CommandError> {
        self.console.say(MEMORY_WARNING)?;

        if !self.console.confirm("Continue? [y/N] ")? {
            return Err(CommandError::Declined);
        }

        let iterations = self.console.prompt_u64(Field::Iterations)?;
        let parameters = TestParameters::new(iterations, 0, 0, None)?;

        self.execute(StressKind::Memory, &parameters)
    }

    fn composite(&mut self) -> Result<(), CommandError> {
        self.console.say("")?;

        run_composite(
            &self.suite,
            &self.plan,
            self.intensity,
            self.console.output_mut(),
        )?;

        Ok(())
    }

    fn prompt_range(&mut self) -> Result<TestParameters, CommandError> {
        let iterations = self.console.prompt_u64(Field::Iterations)?;
        let lower = self.console.prompt_u64(Field::LowerBound)?;
        let upper = self.console.prompt_u64(Field::UpperBound)?;

        Ok(TestParameters::new(iterations, lower, upper, None)?)
    }

    fn prompt_block(&mut self) -> Result<TestParameters, CommandError> {
        let iterations = self.console.prompt_u64(Field::Iterations)?;
        let block_size = self.console.prompt_u64(Field::BlockSize)?;

        Ok(TestParameters::new(iterations, 0, 0, Some(block_size))?)
    }

    fn execute(&mut self, kind: StressKind, parameters: &TestParameters) -> Result<(), CommandError> {
        // Reject mismatched parameters here so nothing is spawned or allocated for them.
        kind.validate(parameters)?;

        let report = self.suite.run(kind, parameters)?;

        // The last answer may not have been echoed, so the report starts on a fresh line.
        self.console.say("")?;
        self.console.say(report)?;

        Ok(())
    }
}

impl<S, R, W> Command<S, R, W> {
    fn new(summary: &'static str, action: Action<S, R, W>) -> Self {
        Self { summary, action }
    }
}

impl<S, R, W> fmt::Debug for Dispatcher<S, R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("intensity", &self.intensity)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Runs one command non-interactively, then stops. Used for `--run`.
///
/// # Errors
///
/// Returns an error only if the console itself fails.
pub fn run_single<S, R, W>(dispatcher: &mut Dispatcher<S, R, W>, command: &str) -> io::Result<()>
where
    S: StressSuite,
    R: BufRead,
    W: Write,
{
    dispatcher.dispatch(command)?;
    dispatcher.state = ReplState::Terminated;
    Ok(())
}
