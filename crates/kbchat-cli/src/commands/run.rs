use anyhow::Result;
use kbchat::client::{run_turn_until, ChatClient, RedrawPolicy, TurnOutcome};
use kbchat::conversation::ConversationState;
use kbchat::render::{RenderItem, View};

use crate::session::interrupted;
use crate::view::TerminalView;

/// Keeps only the most recent render list
#[derive(Debug, Default)]
struct LastDraw {
    items: Vec<RenderItem>,
}

impl View for LastDraw {
    fn draw(&mut self, items: &[RenderItem]) {
        self.items = items.to_vec();
    }
}

/// Ask one question and print the finished conversation.
/// Returns false when the turn failed.
pub async fn execute(client: ChatClient, policy: RedrawPolicy, query: Option<String>) -> Result<bool> {
    let query = match query {
        Some(query) => query,
        None => cliclack::input("Question:")
            .validate(|input: &String| {
                if input.trim().is_empty() {
                    Err("Please enter a question".to_string())
                } else {
                    Ok(())
                }
            })
            .interact()?,
    };

    let mut state = ConversationState::new();
    let mut last = LastDraw::default();

    let spin = cliclack::spinner();
    spin.start("Asking the agent...");
    let outcome = run_turn_until(&client, &mut state, &mut last, &query, policy, interrupted()).await;
    spin.stop("");

    TerminalView::new().print(&last.items)?;
    Ok(!matches!(outcome, TurnOutcome::Failed { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_draw_replaces_items() {
        let mut view = LastDraw::default();
        view.draw(&[RenderItem::User {
            content: "one".to_string(),
        }]);
        view.draw(&[RenderItem::Error {
            content: "two".to_string(),
        }]);
        assert_eq!(
            view.items,
            vec![RenderItem::Error {
                content: "two".to_string()
            }]
        );
    }
}
