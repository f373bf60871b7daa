//! Authentication strategies for the SSH tunnel.
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyAuth`]: Private key file authentication, optionally encrypted
//!
//! [`strategy_for`] maps the configured [`SshAuth`] onto a strategy.

mod key;
mod password;
mod traits;

pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;

use crate::mcp::config::SshAuth;

/// Build the strategy for the configured credential.
pub fn strategy_for(auth: &SshAuth) -> Box<dyn AuthStrategy> {
    match auth {
        SshAuth::Password(password) => Box::new(PasswordAuth::new(password.clone())),
        SshAuth::Key { path, passphrase } => {
            Box::new(KeyAuth::new(path.clone(), passphrase.clone()))
        }
    }
}
