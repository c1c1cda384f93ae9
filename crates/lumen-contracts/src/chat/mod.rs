mod command_registry;
mod image_intent;
mod intent_parser;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use image_intent::is_image_intent;
pub use intent_parser::{parse_intent, Intent};
