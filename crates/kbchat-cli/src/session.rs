use std::future::Future;

use anyhow::Result;
use kbchat::client::{run_turn_until, ChatSource, RedrawPolicy, TurnOutcome};
use kbchat::conversation::ConversationState;
use kbchat::render::{redraw, View};

use crate::prompt::{InputType, Prompt};

/// An interactive chat: reads input, runs one turn per message and keeps the
/// conversation on screen between turns
pub struct Session<'a> {
    source: Box<dyn ChatSource + 'a>,
    prompt: Box<dyn Prompt + 'a>,
    view: Box<dyn View + 'a>,
    state: ConversationState,
    policy: RedrawPolicy,
}

impl<'a> Session<'a> {
    pub fn new(
        source: Box<dyn ChatSource + 'a>,
        prompt: Box<dyn Prompt + 'a>,
        view: Box<dyn View + 'a>,
        policy: RedrawPolicy,
    ) -> Self {
        Session {
            source,
            prompt,
            view,
            state: ConversationState::new(),
            policy,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Run until the user exits; Ctrl+C interrupts the running turn
    pub async fn start(&mut self) -> Result<()> {
        self.start_with(interrupted).await
    }

    /// Run until the user exits, interrupting each turn when `interrupt`'s
    /// future resolves
    pub async fn start_with<F, Fut>(&mut self, interrupt: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Exit => break,
                InputType::AskAgain => continue,
                InputType::Help => {
                    self.prompt.help();
                    continue;
                }
                InputType::Reset => {
                    self.state.reset();
                    redraw(self.view.as_mut(), &self.state);
                    continue;
                }
                InputType::ClearError => {
                    self.state.clear_error();
                    redraw(self.view.as_mut(), &self.state);
                    continue;
                }
                InputType::Message => {}
            }

            let Some(query) = input.content else {
                continue;
            };

            let outcome = run_turn_until(
                self.source.as_ref(),
                &mut self.state,
                self.view.as_mut(),
                &query,
                self.policy,
                interrupt(),
            )
            .await;

            match outcome {
                TurnOutcome::Completed { frames } => tracing::debug!(frames, "Turn completed"),
                TurnOutcome::Failed { reason } => tracing::warn!("Turn failed: {}", reason),
                TurnOutcome::Cancelled => tracing::info!("Turn interrupted"),
            }
        }
        Ok(())
    }
}

/// Resolves on Ctrl+C. Never resolves if the signal cannot be watched.
pub async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        futures::future::pending::<()>().await;
    }
}
