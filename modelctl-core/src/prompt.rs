//! # Confirmation Prompts
//!
//! Destructive operations that match more than one model ask before going ahead. The question
//! goes through the [`Confirm`] trait so that callers choose how to ask it.
use crate::error::Error;
use std::io::{BufRead, Write};

pub trait Confirm {
    /// Asks a yes/no question.
    fn confirm(&mut self, prompt: &str) -> Result<bool, Error>;
}

/// Answers yes without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _prompt: &str) -> Result<bool, Error> {
        Ok(true)
    }
}

/// Asks on a line based terminal, repeating the question until it gets a yes or a no.
#[derive(Debug)]
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

/// A [`LinePrompter`] on the standard streams.
pub type StdinPrompter = LinePrompter<std::io::StdinLock<'static>, std::io::Stdout>;

impl StdinPrompter {
    pub fn stdin() -> Self {
        LinePrompter::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for LinePrompter<R, W> {
    fn confirm(&mut self, prompt: &str) -> Result<bool, Error> {
        loop {
            write!(self.output, "{prompt}")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                // No more input, nobody said yes.
                return Ok(false);
            }

            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => {}
            }
        }
    }
}
