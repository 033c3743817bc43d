//! Process-wide chain selection.
//!
//! The chain mode is a one-shot latch: it is initialised exactly once at
//! startup and read-only thereafter. Every account decode consults it to
//! validate the network flag carried in packed public keys, so records
//! packed on one chain fail to unpack on the other.

use std::sync::OnceLock;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("chain mode has already been initialised")]
    ModeAlreadyInitialised,
}

/// Which chain this process participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Live,
    Testing,
}

static MODE: OnceLock<Chain> = OnceLock::new();

/// Latch the process mode.
///
/// May be called at most once; a second call is a fatal configuration
/// error and is reported as [`ModeError::ModeAlreadyInitialised`].
pub fn initialise(chain: Chain) -> Result<(), ModeError> {
    MODE.set(chain)
        .map_err(|_| ModeError::ModeAlreadyInitialised)
}

pub fn is_initialised() -> bool {
    MODE.get().is_some()
}

/// True when the process is on the testing chain.
///
/// An uninitialised process reads as the live chain.
pub fn is_testing() -> bool {
    matches!(MODE.get(), Some(Chain::Testing))
}

/// Unit tests share one process, so they all latch the testing chain.
#[cfg(test)]
pub(crate) fn force_testing_for_unit_tests() {
    let _ = MODE.set(Chain::Testing);
    assert!(is_testing(), "unit tests require the testing chain");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_initialisation() {
        force_testing_for_unit_tests();
        assert!(is_initialised());
        assert!(is_testing());
        assert_eq!(
            initialise(Chain::Live),
            Err(ModeError::ModeAlreadyInitialised)
        );
        assert_eq!(
            initialise(Chain::Testing),
            Err(ModeError::ModeAlreadyInitialised)
        );
        // latch is unchanged by the failed attempts
        assert!(is_testing());
    }
}
