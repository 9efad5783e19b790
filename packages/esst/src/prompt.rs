use std::fmt::{self, Display};
use std::io::{self, BufRead, Write};

use thiserror::Error;

/// A numeric field that the operator is asked for before a stress run.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Field {
    /// Per-worker iteration count.
    Iterations,

    /// Inclusive lower bound of the value range.
    LowerBound,

    /// Inclusive upper bound of the value range.
    UpperBound,

    /// Size of one data unit in bytes.
    BlockSize,
}

impl Field {
    /// The prompt text shown before reading the field.
    #[must_use]
    pub fn prompt(self) -> &'static str {
        match self {
            Self::Iterations => "Iterations? ",
            Self::LowerBound => "Lower bound? ",
            Self::UpperBound => "Upper bound? ",
            Self::BlockSize => "Blocksize? ",
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Iterations => "iterations",
            Self::LowerBound => "lower bound",
            Self::UpperBound => "upper bound",
            Self::BlockSize => "block size",
        };

        f.write_str(name)
    }
}

/// A prompted field could not be read.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PromptError {
    /// The operator typed something that is not an unsigned integer.
    #[error("'{input}' is not a valid {field}")]
    Parse {
        /// The field that was being read.
        field: Field,

        /// The rejected input, trimmed.
        input: String,
    },

    /// Input ended before the field was supplied.
    #[error("input ended while reading {field}")]
    EndOfInput {
        /// The field that was being read.
        field: Field,
    },

    /// Reading input or writing the prompt failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Line-based operator console over any buffered input and any output.
///
/// The interactive binary wires this to stdin/stdout; tests use in-memory buffers.
#[derive(Debug)]
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R, W> Console<R, W>
where
    R: BufRead,
    W: Write,
{
    /// Creates a console reading from `input` and writing to `output`.
    #[must_use]
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Reads one line, without surrounding whitespace. Returns `None` at end of input.
    ///
    /// Bytes that are not valid UTF-8 are replaced with U+FFFD, so such a line never parses as
    /// a number or matches a command name.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the input.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();

        if self.input.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }

        Ok(Some(String::from_utf8_lossy(&line).trim().to_owned()))
    }

    /// Writes `text` without a line break and reads the answer.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the input or output.
    pub fn prompt(&mut self, text: &str) -> io::Result<Option<String>> {
        write!(self.output, "{text}")?;
        self.output.flush()?;

        self.read_line()
    }

    /// Prompts for `field` and parses the answer as an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Parse`] for non-numeric input and [`PromptError::EndOfInput`] if
    /// input ends first.
    pub fn prompt_u64(&mut self, field: Field) -> Result<u64, PromptError> {
        let input = self
            .prompt(field.prompt())?
            .ok_or(PromptError::EndOfInput { field })?;

        input
            .parse()
            .ok()
            .ok_or(PromptError::Parse { field, input })
    }

    /// Asks a yes/no question. Only `y` or `Y` counts as yes; end of input counts as no.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the input or output.
    pub fn confirm(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.prompt(question)?;

        Ok(matches!(answer.as_deref(), Some("y" | "Y")))
    }

    /// Writes `line` followed by a line break.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the output.
    pub fn say(&mut self, line: impl Display) -> io::Result<()> {
        writeln!(self.output, "{line}")
    }

    /// The output side of the console, for writers that produce several lines at once.
    pub fn output_mut(&mut self) -> &mut W {
        &mut self.output
    }

    /// Splits the console back into its input and output.
    #[must_use]
    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }
}
