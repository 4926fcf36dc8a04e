use anyhow::Result;

pub mod rustyline;

pub trait Prompt {
    fn get_input(&mut self) -> Result<Input>;

    fn help(&self) {
        println!("Commands:");
        println!("/exit | /quit - Exit the session");
        println!("/reset - Start the conversation over");
        println!("/clear-error - Dismiss the last connection error");
        println!("/? | /help - Display this help message");
        println!("Ctrl+C - Interrupt the agent (what arrived so far stays on screen)");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // Only set for messages
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    AskAgain, // Nothing to do, ask again
    Message,
    Exit,
    Reset,
    ClearError,
    Help,
}

impl Input {
    fn command(input_type: InputType) -> Self {
        Self {
            input_type,
            content: None,
        }
    }
}

/// Read one line typed by the user as a command or a message
pub fn parse_input(line: &str) -> Input {
    let text = line.trim();
    if text.is_empty() {
        return Input::command(InputType::AskAgain);
    }

    match text.to_ascii_lowercase().as_str() {
        "/exit" | "/quit" => Input::command(InputType::Exit),
        "/reset" => Input::command(InputType::Reset),
        "/clear-error" => Input::command(InputType::ClearError),
        "/?" | "/help" => Input::command(InputType::Help),
        _ => Input {
            input_type: InputType::Message,
            content: Some(text.to_string()),
        },
    }
}
