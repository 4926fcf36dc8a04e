//! These models represent the objects passed around by the agent and the chat client
//!
//! There are several different related formats we need to interact with:
//! - the event stream, sent from the gateway to the chat client (`event`)
//! - openai messages/tools, sent from the agent to the LLM
//! - system requests, sent from the agent to the systems providing capabilities
//!
//! We always immediately convert those data models into the internal structs using
//! to/from helpers. Because of the need for compatibility, the internal models are not
//! an exact match to any of these formats.
pub mod content;
pub mod event;
pub mod message;
pub mod role;
pub mod tool;
