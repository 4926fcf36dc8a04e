use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use super::{parse_input, Input, InputType, Prompt};

const PROMPT: &str = "\x1b[1m\x1b[38;5;30m> \x1b[0m";

pub struct RustylinePrompt {
    editor: DefaultEditor,
}

impl RustylinePrompt {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl Prompt for RustylinePrompt {
    fn get_input(&mut self) -> Result<Input> {
        let line = match self.editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                return Ok(Input {
                    input_type: InputType::Exit,
                    content: None,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let input = parse_input(&line);
        if input.input_type == InputType::Message {
            // Best effort
            let _ = self.editor.add_history_entry(line.trim());
        }
        Ok(input)
    }
}
