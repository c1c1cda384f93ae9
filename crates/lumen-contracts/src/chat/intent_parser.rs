use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, ROLE_COMMAND, SINGLE_PATH_COMMANDS, TOGGLE_COMMANDS,
    TOOL_COMMAND, USE_ROLE_COMMAND,
};

/// What a line typed into the chat shell asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub settings_update: BTreeMap<String, Value>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            settings_update: BTreeMap::new(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args.get(key).and_then(Value::as_str)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = split_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// `on`/`off` style argument; `Null` means flip the current value.
fn parse_toggle_arg(arg: &str) -> Value {
    match arg.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Value::Bool(true),
        "off" | "false" | "no" | "0" => Value::Bool(false),
        _ => Value::Null,
    }
}

/// Splits `NAME REST...` where NAME may be quoted and REST is kept verbatim.
fn split_head(arg: &str) -> (String, String) {
    let trimmed = arg.trim();
    if let Some(quote) = trimmed.chars().next().filter(|ch| *ch == '"' || *ch == '\'') {
        if let Some(close) = trimmed[1..].find(quote) {
            let head = trimmed[1..1 + close].to_string();
            let rest = trimmed[2 + close..].trim().to_string();
            return (head, rest);
        }
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = remainder.trim();

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if let Some(action) = find_action(&command, TOGGLE_COMMANDS) {
                let mut intent = Intent::new("set_toggle", text);
                intent
                    .settings_update
                    .insert(action.to_string(), parse_toggle_arg(arg));
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if command == TOOL_COMMAND.command {
                let (tool, request) = split_head(arg);
                let mut intent = Intent::new(TOOL_COMMAND.action, text);
                intent
                    .command_args
                    .insert("tool".to_string(), Value::String(tool));
                intent.prompt = Some(request.clone());
                intent
                    .command_args
                    .insert("request".to_string(), Value::String(request));
                return intent;
            }

            if command == ROLE_COMMAND.command {
                let (name, description) = split_head(arg);
                let mut intent = Intent::new(ROLE_COMMAND.action, text);
                intent
                    .command_args
                    .insert("name".to_string(), Value::String(name));
                intent.command_args.insert(
                    "description".to_string(),
                    Value::String(description.trim_matches(|ch| ch == '"' || ch == '\'').to_string()),
                );
                return intent;
            }

            if command == USE_ROLE_COMMAND.command {
                let mut intent = Intent::new(USE_ROLE_COMMAND.action, text);
                intent.command_args.insert(
                    "role".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("chat", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}
