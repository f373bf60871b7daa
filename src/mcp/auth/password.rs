//! Password-based SSH authentication.

use async_trait::async_trait;
use russh::client;

use crate::mcp::client::TunnelClientHandler;
use crate::mcp::error::TunnelError;

use super::traits::AuthStrategy;

/// Password authentication strategy.
pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TunnelClientHandler>,
        username: &str,
    ) -> Result<bool, TunnelError> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await
            .map_err(|e| TunnelError::Protocol(format!("password authentication error: {}", e)))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_auth_name() {
        assert_eq!(PasswordAuth::new("secret").name(), "password");
    }

    #[test]
    fn test_password_auth_keeps_password() {
        let auth = PasswordAuth::new(String::from("my-password"));
        assert_eq!(auth.password, "my-password");
    }
}
