use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputEvent {
    Number(i64),
    Char(char),
    Binary(String),
}

impl fmt::Display for OutputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputEvent::Number(n) => writeln!(f, "{n}"),
            OutputEvent::Char(c) => write!(f, "{c}"),
            OutputEvent::Binary(bits) => writeln!(f, "{bits}"),
        }
    }
}

/// Where the VM gets input from and sends output to.
pub trait IoChannel {
    /// `None` suspends the VM until `resume_with_input`.
    fn provide_input(&mut self) -> Option<i64>;
    fn consume_output(&mut self, event: OutputEvent);
}

/// Queued inputs and recorded outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedIo {
    pub input: VecDeque<i64>,
    pub output: Vec<OutputEvent>,
}

impl BufferedIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(values: impl IntoIterator<Item = i64>) -> Self {
        Self {
            input: values.into_iter().collect(),
            output: Vec::new(),
        }
    }

    pub fn push_input(&mut self, value: i64) {
        self.input.push_back(value);
    }

    pub fn take_output(&mut self) -> Vec<OutputEvent> {
        std::mem::take(&mut self.output)
    }

    /// Output rendered as a terminal would show it.
    pub fn transcript(&self) -> String {
        self.output.iter().map(|e| e.to_string()).collect()
    }
}

impl IoChannel for BufferedIo {
    fn provide_input(&mut self) -> Option<i64> {
        self.input.pop_front()
    }

    fn consume_output(&mut self, event: OutputEvent) {
        self.output.push(event);
    }
}
