use anyhow::Result;
use console::style;
use kbchat::client::{ChatClient, RedrawPolicy};

use crate::prompt::rustyline::RustylinePrompt;
use crate::session::Session;
use crate::view::TerminalView;

pub async fn execute(client: ChatClient, policy: RedrawPolicy) -> Result<()> {
    cliclack::intro(style(" kbchat ").on_cyan().black())?;
    cliclack::log::info(format!(
        "Session {} on {}\nAsk a question, or type /help for commands.",
        style(client.session_id()).bold(),
        style(client.endpoint()).dim()
    ))?;

    let prompt = RustylinePrompt::new()?;
    let mut session = Session::new(
        Box::new(client),
        Box::new(prompt),
        Box::new(TerminalView::new()),
        policy,
    );
    session.start().await?;

    cliclack::outro("Session closed")?;
    Ok(())
}
