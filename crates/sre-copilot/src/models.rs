//! These models represent the objects passed around by the agent
//!
//! There are several different related formats we need to interact with:
//! - chat requests, sent from the client to the relay server
//! - stream protocol events, sent from the relay server to the client
//! - anthropic / openai messages and tools, sent from the agent to the LLM
//! - tool calls, sent from the agent to the systems wrapping monitoring APIs
//!
//! We always immediately convert those data models into the internal structs
//! using to/from helpers, so the internal models are not an exact match to any
//! of these formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
