use serde::{Deserialize, Serialize};

use crate::auth::{AuthContext, Role};

/// Who may perform an activity, and whether anyone else may still open the
/// camera preview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RolePolicy {
    pub eligible_roles: Vec<Role>,
    /// Administrators count as eligible.
    pub admin_override: bool,
    /// Ineligible users may hold the camera preview but never get a session.
    pub allow_preview: bool,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            eligible_roles: vec![Role::Alumno],
            admin_override: true,
            allow_preview: true,
        }
    }
}

impl RolePolicy {
    /// Strict variant: students only, no preview for anyone else.
    pub fn students_only() -> Self {
        Self {
            eligible_roles: vec![Role::Alumno],
            admin_override: false,
            allow_preview: false,
        }
    }

    pub fn permits(&self, auth: &AuthContext) -> bool {
        if !auth.is_authenticated() {
            return false;
        }
        if self.admin_override && auth.holds_role(Role::Admin) {
            return true;
        }
        self.eligible_roles.iter().any(|role| auth.holds_role(*role))
    }

    pub fn may_preview(&self, auth: &AuthContext) -> bool {
        auth.is_authenticated() && (self.allow_preview || self.permits(auth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserAuthData;

    fn auth(rol: Role) -> AuthContext {
        AuthContext::new(
            UserAuthData {
                id: 1,
                username: "u".into(),
                email: String::new(),
                rol,
                first_name: None,
                last_name: None,
            },
            "t",
        )
    }

    #[test]
    fn default_policy_mirrors_dashboard_role_checks() {
        let policy = RolePolicy::default();
        assert!(policy.permits(&auth(Role::Alumno)));
        assert!(policy.permits(&auth(Role::Admin)));
        assert!(!policy.permits(&auth(Role::Docente)));
        assert!(policy.may_preview(&auth(Role::Docente)));
    }

    #[test]
    fn strict_policy_blocks_admins_and_previews() {
        let policy = RolePolicy::students_only();
        assert!(policy.permits(&auth(Role::Alumno)));
        assert!(!policy.permits(&auth(Role::Admin)));
        assert!(!policy.may_preview(&auth(Role::Docente)));
    }

    #[test]
    fn anonymous_callers_are_never_permitted() {
        let policy = RolePolicy::default();
        assert!(!policy.permits(&AuthContext::anonymous()));
        assert!(!policy.may_preview(&AuthContext::anonymous()));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let policy: RolePolicy = serde_json::from_str(r#"{"allow_preview": false}"#).unwrap();
        assert_eq!(policy.eligible_roles, vec![Role::Alumno]);
        assert!(policy.admin_override);
        assert!(!policy.allow_preview);
    }
}
