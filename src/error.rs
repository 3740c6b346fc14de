//! Error types.
//!
//! Two kinds of failure are kept apart:
//!
//! - [`ValidationError`]: the caller handed the engine something it cannot
//!   work with (an untagged object as a child, an out-of-range frame rate, an
//!   update aimed at a fiber that no longer exists). These are returned as
//!   values and never retried.
//! - Internal invariant violations: the engine's own bookkeeping disagrees
//!   with itself. They are reported through [`invariant_violation!`], which
//!   logs, panics under `debug_assertions` and otherwise evaluates to a
//!   documented fallback so a live tree keeps working.

/// Errors caused by invalid input from the embedding application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A child was a plain record without an element, portal or lazy tag.
    #[error(
        "Objects are not valid as a child (found: {found}). \
         If you meant to render a collection of children, use a list instead."
    )]
    ObjectAsChild {
        /// Short description of the offending value.
        found: String,
    },

    /// `force_frame_rate` was called outside the supported range.
    #[error(
        "forceFrameRate takes a positive int between 0 and 125, forcing frame rates higher \
         than 125 fps is not supported (got {fps})"
    )]
    InvalidFrameRate {
        /// The rejected rate.
        fps: u32,
    },

    /// An update targeted a fiber that is not part of a mounted tree.
    #[error("cannot schedule an update on a fiber that is not mounted")]
    UnmountedFiber,
}

/// Crate level error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Invalid input, see [`ValidationError`].
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A component's render function panicked. The render was abandoned and
    /// its lanes dropped; the committed tree is unchanged.
    #[error("component `{component}` panicked while rendering: {message}")]
    ComponentPanicked {
        /// Display name of the component.
        component: String,
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Report a broken internal invariant.
///
/// Always emits a `tracing::error!`. With `debug_assertions` enabled the
/// macro panics; in release builds it evaluates to `$fallback`, the
/// degraded-mode value the call site documents.
macro_rules! invariant_violation {
    ($fallback:expr, $($arg:tt)+) => {{
        tracing::error!(target: "fibra::invariant", $($arg)+);
        if cfg!(debug_assertions) {
            panic!($($arg)+);
        }
        $fallback
    }};
}

pub(crate) use invariant_violation;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_child_message_names_the_value() {
        let err = ValidationError::ObjectAsChild {
            found: "object with keys {title, body}".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Objects are not valid as a child"));
        assert!(msg.contains("{title, body}"));
    }

    #[test]
    fn validation_converts_into_crate_error() {
        let err: Error = ValidationError::InvalidFrameRate { fps: 240 }.into();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidFrameRate { fps: 240 })
        ));
    }

    #[test]
    fn panic_payloads_become_text() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(3u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
