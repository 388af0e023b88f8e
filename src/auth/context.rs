use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Alumno,
    Docente,
    Admin,
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Alumno => "alumno",
            Role::Docente => "docente",
            Role::Admin => "admin",
            Role::Other => "other",
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "alumno" | "student" => Role::Alumno,
            "docente" | "teacher" => Role::Docente,
            "admin" => Role::Admin,
            _ => Role::Other,
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAuthData {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub rol: Role,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Who is calling. Passed explicitly into the session controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthContext {
    user: Option<UserAuthData>,
    token: Option<String>,
}

impl AuthContext {
    pub fn new(user: UserAuthData, token: impl Into<String>) -> Self {
        Self {
            user: Some(user),
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn current_user(&self) -> Option<&UserAuthData> {
        self.user.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// True when the user holds `role`. Administrators pass every check.
    pub fn has_role(&self, role: Role) -> bool {
        self.has_any_role(&[role])
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        match &self.user {
            Some(user) => user.rol == Role::Admin || roles.contains(&user.rol),
            None => false,
        }
    }

    /// Exact role match without the administrator shortcut.
    pub fn holds_role(&self, role: Role) -> bool {
        self.user.as_ref().is_some_and(|user| user.rol == role)
    }
}
