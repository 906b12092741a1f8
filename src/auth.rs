use std::collections::HashMap;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::Guest;

/// Session metadata key holding the `SET display_name` value.
pub const DISPLAY_NAME_KEY: &str = "slotbook.display_name";

/// Shared service password. The login user name becomes the caller's user
/// id once the password checks out.
#[derive(Debug)]
pub struct SlotbookAuthSource {
    password: String,
}

impl SlotbookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SlotbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = login.user().unwrap_or_default(), "password login");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// The verified caller of a session. An empty user id means no login was
/// presented and every booking operation will refuse it.
pub fn session_guest(metadata: &HashMap<String, String>) -> Guest {
    let user_id = metadata.get("user").cloned().unwrap_or_default();
    let user_name = metadata
        .get(DISPLAY_NAME_KEY)
        .filter(|n| !n.is_empty())
        .cloned()
        .unwrap_or_else(|| user_id.clone());
    Guest { user_id, user_name }
}
