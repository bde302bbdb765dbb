use anyhow::Result;
use sre_copilot::client::StreamClient;
use sre_copilot::protocol::ChatMessage;

use crate::prompt::{InputType, Prompt};

pub struct Session<'a> {
    client: StreamClient,
    prompt: Box<dyn Prompt + 'a>,
    transcript: Vec<ChatMessage>,
    thread_id: Option<String>,
    a2ui: bool,
}

impl<'a> Session<'a> {
    pub fn new(
        client: StreamClient,
        prompt: Box<dyn Prompt + 'a>,
        thread_id: Option<String>,
        a2ui: bool,
    ) -> Self {
        Session {
            client,
            prompt,
            transcript: Vec::new(),
            thread_id,
            a2ui,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        self.prompt
            .render_notice(&format!("Connected to {}", self.client.base_url()));
        self.prompt.ready();

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = input.content {
                        self.transcript.push(ChatMessage::user(content));
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
            }

            self.process_turn().await;
        }

        self.prompt.close();
        Ok(())
    }

    pub async fn headless_start(&mut self, message: String) -> Result<()> {
        self.transcript.push(ChatMessage::user(message));
        self.process_turn().await;
        self.prompt.close();
        Ok(())
    }

    async fn process_turn(&mut self) {
        let request =
            StreamClient::request(&self.transcript, self.thread_id.as_deref(), self.a2ui);

        self.prompt.show_busy();
        let prompt = &mut self.prompt;
        let outcome = tokio::select! {
            result = self.client.stream(&request, |event, view| prompt.render_event(event, view)) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        self.prompt.hide_busy();

        match outcome {
            Some(Ok(view)) => {
                if self.thread_id.is_none() {
                    self.thread_id = view.thread_id.clone();
                }
                if !view.text.is_empty() {
                    self.transcript.push(ChatMessage::assistant(view.text.clone()));
                }
                if view.skipped > 0 {
                    tracing::warn!(skipped = view.skipped, "ignored malformed stream events");
                }
                self.prompt.render_surface(&view);
            }
            Some(Err(e)) => {
                self.drop_last_question();
                self.prompt.render_error(&e.to_string());
            }
            None => {
                self.drop_last_question();
                self.prompt.render_notice(
                    "Interrupt: Resetting conversation to before the last sent message...",
                );
            }
        }
    }

    /// Pop back to before the most recent user message
    fn drop_last_question(&mut self) {
        while let Some(message) = self.transcript.pop() {
            if message.role == "user" {
                break;
            }
        }
    }
}
