#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "new",
        action: "new_conversation",
    },
    CommandSpec {
        command: "roles",
        action: "list_roles",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

/// `/search on`, `/reason off`, `/think` (flip).
pub(crate) const TOGGLE_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "search",
        action: "use_web_search",
    },
    CommandSpec {
        command: "reason",
        action: "use_reasoning",
    },
    CommandSpec {
        command: "think",
        action: "use_thinking",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "attach",
        action: "attach_image",
    },
    CommandSpec {
        command: "export",
        action: "export",
    },
];

pub(crate) const TOOL_COMMAND: CommandSpec = CommandSpec {
    command: "tool",
    action: "run_tool",
};

pub(crate) const ROLE_COMMAND: CommandSpec = CommandSpec {
    command: "role",
    action: "add_role",
};

pub(crate) const USE_ROLE_COMMAND: CommandSpec = CommandSpec {
    command: "use",
    action: "use_role",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/new",
    "/roles",
    "/use <role_id>",
    "/role <name> <description>",
    "/search [on|off]",
    "/reason [on|off]",
    "/think [on|off]",
    "/tool <name> <request>",
    "/attach <image_path>",
    "/export <path>",
    "/status",
    "/quit",
];
