mod configuration;
mod error;
mod routes;
mod state;

use configuration::Settings;
use kbchat::agent::Agent;
use kbchat::providers::openai::OpenAiProvider;
use kbchat::systems::{KnowledgeBaseSystem, WikiSystem};
use state::AppState;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Wire the provider and the tool systems into an agent
fn build_agent(settings: &Settings) -> anyhow::Result<Agent> {
    let provider = OpenAiProvider::new(settings.provider.clone().into_config())?;
    let mut agent = Agent::new(Box::new(provider)).with_max_cycles(settings.agent.max_cycles);

    let knowledge_base = KnowledgeBaseSystem::new(settings.knowledge_base.clone().into_config())?;
    agent.add_system(Box::new(knowledge_base));

    if let Some(wiki) = &settings.wiki {
        agent.add_system(Box::new(WikiSystem::new(wiki.clone())?));
    }

    if let Some(path) = &settings.agent.prompt_file {
        agent = agent.with_prompt_file(path);
    }

    // Render once so a broken template shows up at startup
    agent.get_system_prompt()?;

    Ok(agent)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::new()?;

    let agent = match build_agent(&settings) {
        Ok(agent) => {
            let tools: Vec<String> = agent.get_tools().into_iter().map(|t| t.name).collect();
            info!(model = %settings.provider.model, ?tools, "Agent initialized");
            Some(agent)
        }
        Err(e) => {
            error!("Failed to initialize agent: {}", e);
            None
        }
    };

    let state = AppState::new(agent, settings.agent.history_window);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
