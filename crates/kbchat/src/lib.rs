pub mod agent;
pub mod client;
pub mod conversation;
pub mod decoder;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod processor;
pub mod prompt_template;
pub mod providers;
pub mod render;
pub mod systems;
