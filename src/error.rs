//! User-facing error kinds
//!
//! Commands return `anyhow::Result`.  When the error (or anything in its chain) is a
//! `BotError`, the dispatcher shows its message to the invoking user; any other error is only
//! logged and the user sees a generic failure notice.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    /// Missing environment or an unusable setting.  Fatal at start.
    #[error("configuration error: {0}")]
    Config(String),

    /// A role or channel slot the operation needs has not been set for this server.
    #[error("{0} is not configured for this server. An administrator can set it with `/{1}`.")]
    NotConfigured(String, &'static str),

    #[error("{0}")]
    PermissionDenied(String),

    /// Malformed component ID or unknown subcommand
    #[error("Unknown action.")]
    Protocol(String),

    #[error("{0}")]
    InvalidInput(String),
}

impl BotError {
    /// Message to show the user, if the error is meant to be shown at all.
    pub fn user_message(err: &anyhow::Error) -> Option<String> {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<BotError>())
            .map(|bot_err| bot_err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn user_message_found_through_context() {
        let err: anyhow::Error = Err::<(), _>(BotError::PermissionDenied(
            "Administrator permission required.".to_owned(),
        ))
        .context("running del-now")
        .unwrap_err();

        assert_eq!(
            BotError::user_message(&err).as_deref(),
            Some("Administrator permission required.")
        );
    }

    #[test]
    fn plain_errors_are_not_shown() {
        let err = anyhow::anyhow!("socket closed");
        assert!(BotError::user_message(&err).is_none());
    }

    #[test]
    fn protocol_errors_hide_details() {
        let err: anyhow::Error = BotError::Protocol("ask:bad".to_owned()).into();
        assert_eq!(BotError::user_message(&err).as_deref(), Some("Unknown action."));
    }
}
