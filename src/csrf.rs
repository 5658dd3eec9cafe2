use rand::Rng;

use crate::error::Error;

/// Number of random bytes behind a CSRF state value.
const STATE_BYTES: usize = 32;

/// One in-flight OAuth redirect, bound to the browser that started it.
///
/// The value is only ever handed to that browser in an HTTP-only cookie, and
/// it is consumed by [`consume_and_validate`] on the provider callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    state: String,
}

impl PendingLogin {
    /// Generates a fresh state value (32 random bytes, hex-encoded).
    #[must_use]
    pub fn issue() -> Self {
        Self {
            state: generate_state(),
        }
    }

    /// Rebuilds a pending login from a stored cookie value.
    #[must_use]
    pub fn from_stored(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }
}

/// Generates a cryptographically random state parameter for `OAuth2`.
///
/// Returns a 64-character lowercase hex string.
#[must_use]
pub fn generate_state() -> String {
    let random_bytes: [u8; STATE_BYTES] = rand::rng().random();
    hex::encode(random_bytes)
}

/// Compares the state echoed by the provider against the stored one.
///
/// The stored value is removed whatever the outcome, so a state can never be
/// replayed: calling this twice with the same slot always fails the second time.
#[must_use]
pub fn consume_and_validate(supplied: Option<&str>, stored: &mut Option<PendingLogin>) -> bool {
    let stored = stored.take();
    match (supplied, stored) {
        (Some(supplied), Some(stored)) => !supplied.is_empty() && supplied == stored.state,
        _ => false,
    }
}

/// [`consume_and_validate`] as a `Result`, for use with `?`.
///
/// # Errors
///
/// Returns [`Error::CsrfMismatch`] when the states are missing or differ.
pub fn verify_state(supplied: Option<&str>, stored: &mut Option<PendingLogin>) -> Result<(), Error> {
    if consume_and_validate(supplied, stored) {
        Ok(())
    } else {
        Err(Error::CsrfMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_length() {
        let state = generate_state();
        assert_eq!(state.len(), STATE_BYTES * 2);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_state_uniqueness() {
        let s1 = PendingLogin::issue();
        let s2 = PendingLogin::issue();
        assert_ne!(s1, s2, "states should be unique");
    }

    #[test]
    fn test_matching_state_is_consumed_once() {
        let mut stored = Some(PendingLogin::from_stored("xyz"));
        assert!(consume_and_validate(Some("xyz"), &mut stored));
        assert!(stored.is_none());

        assert!(!consume_and_validate(Some("xyz"), &mut stored));
    }

    #[test]
    fn test_mismatch_still_deletes_stored_state() {
        let mut stored = Some(PendingLogin::from_stored("expected"));
        assert!(!consume_and_validate(Some("forged"), &mut stored));
        assert!(stored.is_none());
    }

    #[test]
    fn test_missing_values_fail() {
        let mut stored = None;
        assert!(!consume_and_validate(Some("xyz"), &mut stored));

        let mut stored = Some(PendingLogin::from_stored("xyz"));
        assert!(!consume_and_validate(None, &mut stored));
        assert!(stored.is_none());
    }

    #[test]
    fn test_empty_states_never_match() {
        let mut stored = Some(PendingLogin::from_stored(""));
        assert!(!consume_and_validate(Some(""), &mut stored));
    }

    #[test]
    fn test_verify_state_reports_mismatch() {
        let mut stored = Some(PendingLogin::from_stored("expected"));
        assert!(matches!(
            verify_state(Some("other"), &mut stored),
            Err(Error::CsrfMismatch)
        ));

        let mut stored = Some(PendingLogin::from_stored("expected"));
        assert!(verify_state(Some("expected"), &mut stored).is_ok());
    }
}
