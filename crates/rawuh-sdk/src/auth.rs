use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Lecturer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: u64,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// The signed-in operator.
///
/// Returned by [`GatewayClient::login`](crate::GatewayClient::login) and
/// handed to whatever needs to know who is acting. The session credentials
/// themselves stay in the client's cookie jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    user: AuthUser,
    permissions: Vec<String>,
}

impl AuthContext {
    pub fn new(user: AuthUser, permissions: Vec<String>) -> Self {
        Self { user, permissions }
    }

    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn is_lecturer(&self) -> bool {
        self.user.role == Role::Lecturer
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

impl From<LoginResponse> for AuthContext {
    fn from(response: LoginResponse) -> Self {
        Self::new(response.user, response.permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_builds_context() {
        let raw = r#"{
            "access_token": "a",
            "refresh_token": "r",
            "user": {"id": 5, "email": "dosen@kampus.ac.id", "role": "lecturer"},
            "permissions": ["session:write"]
        }"#;
        let response: LoginResponse = serde_json::from_str(raw).unwrap();
        let ctx = AuthContext::from(response);
        assert!(ctx.is_lecturer());
        assert!(ctx.has_permission("session:write"));
        assert!(!ctx.has_permission("admin"));
        assert_eq!(ctx.user().id, 5);
    }

    #[test]
    fn students_are_not_lecturers() {
        let ctx = AuthContext::new(
            AuthUser {
                id: 1,
                email: "mhs@kampus.ac.id".into(),
                role: Role::Student,
            },
            Vec::new(),
        );
        assert!(!ctx.is_lecturer());
        assert_eq!(ctx.role(), Role::Student);
    }
}
