//! Permission checks shared by middlewares and commands

use crate::{config::Config, error::BotError};
use anyhow::Result;
use serenity::all::{Permissions, UserId};

/// Check that a member holds `required`.  Administrators hold everything; the configured
/// developer passes regardless.
pub fn require_member(
    cfg: &Config,
    user_id: UserId,
    held: Permissions,
    required: Permissions,
) -> Result<()> {
    if cfg.is_developer(user_id) || has(held, required) {
        return Ok(());
    }

    Err(BotError::PermissionDenied(format!(
        "You need the {} permission to do that.",
        describe(required)
    ))
    .into())
}

/// Check that the bot itself holds `required` in the channel.
pub fn require_bot(held: Permissions, required: Permissions) -> Result<()> {
    if has(held, required) {
        return Ok(());
    }

    Err(BotError::PermissionDenied(format!(
        "I need the {} permission in this channel.",
        describe(required)
    ))
    .into())
}

fn has(held: Permissions, required: Permissions) -> bool {
    held.contains(Permissions::ADMINISTRATOR) || held.contains(required)
}

fn describe(permissions: Permissions) -> String {
    let names = permissions.get_permission_names();
    if names.is_empty() {
        "required".to_owned()
    } else {
        names
            .iter()
            .map(|n| format!("`{}`", n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    #[test]
    fn administrators_pass_everything() {
        let cfg = test_config(std::path::Path::new("/tmp"));
        assert!(require_member(
            &cfg,
            UserId::new(1),
            Permissions::ADMINISTRATOR,
            Permissions::MANAGE_MESSAGES | Permissions::MANAGE_ROLES
        )
        .is_ok());
    }

    #[test]
    fn missing_permission_is_denied() {
        let cfg = test_config(std::path::Path::new("/tmp"));
        let err = require_member(
            &cfg,
            UserId::new(1),
            Permissions::SEND_MESSAGES,
            Permissions::ADMINISTRATOR,
        )
        .unwrap_err();
        assert!(BotError::user_message(&err)
            .unwrap()
            .contains("Administrator"));
    }

    #[test]
    fn developer_bypasses_member_checks() {
        let mut cfg = test_config(std::path::Path::new("/tmp"));
        cfg.developer_id = Some(UserId::new(9));
        assert!(require_member(
            &cfg,
            UserId::new(9),
            Permissions::empty(),
            Permissions::ADMINISTRATOR
        )
        .is_ok());
    }

    #[test]
    fn bot_needs_manage_messages() {
        assert!(require_bot(Permissions::MANAGE_MESSAGES, Permissions::MANAGE_MESSAGES).is_ok());
        assert!(require_bot(Permissions::SEND_MESSAGES, Permissions::MANAGE_MESSAGES).is_err());
    }
}
