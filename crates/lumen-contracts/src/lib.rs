//! Data model and pure logic shared by the lumen engine and shell.

pub mod chat;
pub mod conversation;
pub mod events;
pub mod messages;
pub mod models;
pub mod options;
pub mod roles;
pub mod tools;
pub mod transcript;
