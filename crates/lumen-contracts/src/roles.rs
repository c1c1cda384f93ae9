use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persona injected as a leading turn ahead of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaRole {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub is_custom: bool,
}

impl PersonaRole {
    pub fn preamble(&self) -> String {
        format!("You are acting as {}. {}\n\n", self.name, self.description)
    }
}

#[derive(Debug, Clone)]
pub struct RoleRegistry {
    roles: IndexMap<String, PersonaRole>,
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RoleRegistry {
    pub fn new(roles: Option<IndexMap<String, PersonaRole>>) -> Self {
        Self {
            roles: roles.unwrap_or_else(default_roles),
        }
    }

    pub fn get(&self, id: &str) -> Option<&PersonaRole> {
        self.roles.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &PersonaRole> {
        self.roles.values()
    }

    pub fn add_custom(&mut self, name: &str, description: &str) -> Result<PersonaRole, String> {
        let name = name.trim();
        let description = description.trim();
        if name.is_empty() || description.is_empty() {
            return Err("A custom role needs both a name and a description.".to_string());
        }
        let role = PersonaRole {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            is_custom: true,
        };
        self.roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }
}

fn default_roles() -> IndexMap<String, PersonaRole> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, name: &str, description: &str| {
        map.insert(
            id.to_string(),
            PersonaRole {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                is_custom: false,
            },
        );
    };

    insert(
        "default",
        "Assistant",
        "A helpful, harmless, and honest AI assistant that provides information and assistance.",
    );
    insert(
        "coder",
        "Code Assistant",
        "An AI specialized in helping with programming tasks, debugging, and software development.",
    );
    insert(
        "tutor",
        "Learning Tutor",
        "An AI focused on education, explaining concepts clearly and helping users learn new topics.",
    );
    insert(
        "creative",
        "Creative Writer",
        "An AI focused on creative writing, storytelling, and generating imaginative content.",
    );

    map
}
