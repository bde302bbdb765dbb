pub mod a2ui;
pub mod agent;
pub mod client;
pub mod errors;
pub mod memory;
pub mod models;
pub mod prompt_template;
pub mod protocol;
pub mod providers;
pub mod systems;
