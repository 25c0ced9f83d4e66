//! Error reporting for the binary boundary
//!
//! Errors that a user can fix (bad configuration, unknown pipeline name) are
//! shown with their own message; system failures (store I/O, a lost worker)
//! are shown with the operation context and keep the detail at debug level.

/// Distinguishes user-actionable errors from system errors
///
/// When `is_user_actionable()` returns `true`, `user_message()` must return
/// `Some(message)`; otherwise it returns `None`.
pub trait ContextualError: std::error::Error {
    /// True if the message is specific enough to show to the user as-is
    fn is_user_actionable(&self) -> bool;

    /// The message to show when the error is user-actionable
    fn user_message(&self) -> Option<String>;
}

/// Log a fatal error with a level of detail matching its kind
///
/// ```rust,no_run
/// # use workline::core::error_handling::log_error_with_context;
/// # use workline::pipeline::RegistryError;
/// let err = RegistryError::NotFound { name: "nightly".to_string() };
/// log_error_with_context(&err, "Looking up pipeline");
/// // Logs: "FATAL: pipeline 'nightly' is not registered"
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Display + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => log::error!("FATAL: {}", user_msg),
        _ => log::error!("FATAL: {}", operation_context),
    }
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("{message}")]
        User { message: String },
        #[error("disk on fire")]
        System,
    }

    impl ContextualError for TestError {
        fn is_user_actionable(&self) -> bool {
            matches!(self, TestError::User { .. })
        }

        fn user_message(&self) -> Option<String> {
            match self {
                TestError::User { message } => Some(message.clone()),
                TestError::System => None,
            }
        }
    }

    #[test]
    fn test_user_actionable_error_exposes_message() {
        let error = TestError::User {
            message: "unknown backend 'redis'".to_string(),
        };
        assert!(error.is_user_actionable());
        assert_eq!(
            error.user_message().as_deref(),
            Some("unknown backend 'redis'")
        );
        log_error_with_context(&error, "Loading configuration");
    }

    #[test]
    fn test_system_error_hides_message() {
        let error = TestError::System;
        assert!(!error.is_user_actionable());
        assert_eq!(error.user_message(), None);
        log_error_with_context(&error, "Opening store");
    }
}
