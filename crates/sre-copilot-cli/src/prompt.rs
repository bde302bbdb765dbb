use anyhow::Result;
use sre_copilot::client::ConversationView;
use sre_copilot::protocol::StreamEvent;

pub mod cliclack;

pub trait Prompt {
    /// Called for every event as it is applied to the view
    fn render_event(&mut self, event: &StreamEvent, view: &ConversationView);
    /// Called once a turn is complete
    fn render_surface(&mut self, view: &ConversationView);
    fn render_notice(&mut self, text: &str);
    fn render_error(&mut self, text: &str);
    fn get_input(&mut self) -> Result<Input>;
    fn show_busy(&mut self);
    fn hide_busy(&mut self);
    fn close(&self);
    fn ready(&self) {
        println!();
        println!("SRE Copilot is ready. Ask about metrics, incidents, or your cluster.");
        println!();
    }
}

pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // None for control commands
}

impl Input {
    pub fn message<S: Into<String>>(content: S) -> Self {
        Input {
            input_type: InputType::Message,
            content: Some(content.into()),
        }
    }

    pub fn exit() -> Self {
        Input {
            input_type: InputType::Exit,
            content: None,
        }
    }
}

pub enum InputType {
    AskAgain, // Ask the user for input again
    Message,  // User sent a message
    Exit,     // User wants to exit the session
}

pub enum Theme {
    Light,
    Dark,
}
