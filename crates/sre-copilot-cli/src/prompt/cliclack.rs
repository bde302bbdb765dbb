use std::io::{self, Write};

use anyhow::Result;
use bat::WrappingMode;
use cliclack::{input, spinner};
use console::style;
use sre_copilot::client::ConversationView;
use sre_copilot::protocol::StreamEvent;

use super::{Input, InputType, Prompt, Theme};
use crate::render;

pub struct CliclackPrompt {
    spinner: Option<cliclack::ProgressBar>,
    input_mode: InputMode,
    theme: Theme,
}

enum InputMode {
    Singleline,
    Multiline,
}

impl CliclackPrompt {
    pub fn new() -> Self {
        CliclackPrompt {
            spinner: None,
            input_mode: InputMode::Singleline,
            theme: Theme::Dark,
        }
    }

    fn theme_name(&self) -> &'static str {
        match self.theme {
            Theme::Light => "GitHub",
            Theme::Dark => "zenburn",
        }
    }
}

fn print_tool_request(content: &str, theme: &str, tool_name: &str) {
    let printed = bat::PrettyPrinter::new()
        .input(
            bat::Input::from_bytes(content.as_bytes()).name(format!("Tool Request: {}", tool_name)),
        )
        .theme(theme)
        .language("JSON")
        .grid(true)
        .header(true)
        .wrapping_mode(WrappingMode::Character)
        .print();
    if printed.is_err() {
        println!("Tool Request: {}\n{}", tool_name, content);
    }
}

fn print(content: &str, theme: &str) {
    let printed = bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .theme(theme)
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print();
    if printed.is_err() {
        print!("{}", content);
    }
}

impl Prompt for CliclackPrompt {
    fn render_event(&mut self, event: &StreamEvent, view: &ConversationView) {
        self.hide_busy();
        let theme = self.theme_name();

        match event {
            StreamEvent::TextMessageContent { delta, .. } => print(delta, theme),
            StreamEvent::ToolCallArgs {
                tool_call_id, args, ..
            } => {
                let name = view
                    .tool(tool_call_id)
                    .map(|t| t.name.as_str())
                    .unwrap_or(tool_call_id.as_str());
                let pretty =
                    serde_json::to_string_pretty(args).unwrap_or_else(|_| args.to_string());
                print_tool_request(&pretty, theme, name);
            }
            StreamEvent::ToolCallEnd { tool_call_id, .. } => {
                if let Some(entry) = view.tool(tool_call_id) {
                    println!("{}", render::tool_line(entry));
                }
            }
            _ => {}
        }
        let _ = io::stdout().flush();
    }

    fn render_surface(&mut self, view: &ConversationView) {
        println!();
        if let Some(surface) = render::surface(view) {
            println!();
            print!("{}", surface);
        }
        let _ = io::stdout().flush();
    }

    fn render_notice(&mut self, text: &str) {
        println!("{}", style(text).dim());
    }

    fn render_error(&mut self, text: &str) {
        eprintln!("{}", style(text).red());
    }

    fn show_busy(&mut self) {
        let busy = spinner();
        busy.start("awaiting reply");
        self.spinner = Some(busy);
    }

    fn hide_busy(&mut self) {
        if let Some(busy) = self.spinner.take() {
            busy.stop("");
        }
    }

    fn get_input(&mut self) -> Result<Input> {
        let mut input = input("SRE Copilot:         [Help: /?]").placeholder("");
        match self.input_mode {
            InputMode::Multiline => input = input.multiline(),
            InputMode::Singleline => (),
        }
        let message_text: String = input.interact()?;
        let message_text = message_text.trim();

        if message_text.is_empty() {
            Ok(Input {
                input_type: InputType::AskAgain,
                content: None,
            })
        } else if message_text.eq_ignore_ascii_case("/exit")
            || message_text.eq_ignore_ascii_case("/quit")
        {
            Ok(Input::exit())
        } else if message_text.eq_ignore_ascii_case("/m") {
            self.input_mode = InputMode::Multiline;
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/s") {
            self.input_mode = InputMode::Singleline;
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/t") {
            self.theme = match self.theme {
                Theme::Light => {
                    println!("Switching to Dark theme");
                    Theme::Dark
                }
                Theme::Dark => {
                    println!("Switching to Light theme");
                    Theme::Light
                }
            };
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/?") {
            println!("Commands:");
            println!("/exit - Exit the session");
            println!("/m - Switch to multiline input mode");
            println!("/s - Switch to singleline input mode");
            println!("/t - Toggle Light/Dark theme");
            println!("/? - Display this help message");
            println!("Ctrl+C - Interrupt the reply (drops the interrupted question from the conversation)");
            self.get_input()
        } else {
            Ok(Input::message(message_text))
        }
    }

    fn close(&self) {
        // No cleanup required
    }
}
