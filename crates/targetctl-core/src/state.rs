//! Target state model.
//!
//! Providers report target state as a native integer code. This module
//! defines the closed [`TargetState`] enum that the rest of the crate works
//! with, and the total mapping [`state_for_code`] from native codes into it.
//!
//! # Native codes
//!
//! | code | state                        |
//! |------|------------------------------|
//! | 0    | [`TargetState::Creating`]     |
//! | 1    | [`TargetState::Created`]      |
//! | 2    | [`TargetState::Shutdown`]     |
//! | 3    | [`TargetState::Booting`]      |
//! | 4    | [`TargetState::Booted`]       |
//! | 5    | [`TargetState::ShuttingDown`] |
//! | 6    | [`TargetState::Testing`]      |
//! | 7    | [`TargetState::Dfu`]          |
//! | 8    | [`TargetState::Recovery`]     |
//! | 9    | [`TargetState::RestoreOs`]    |
//!
//! Any other integer maps to [`TargetState::Unknown`].
//!
//! # Example
//!
//! ```
//! use targetctl_core::state::{state_for_code, TargetState};
//!
//! assert_eq!(state_for_code(4), TargetState::Booted);
//! assert_eq!(state_for_code(999), TargetState::Unknown);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle state of a simulator or device target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetState {
    /// The provider reported a code outside the known table.
    Unknown,
    Creating,
    Created,
    Booting,
    Booted,
    ShuttingDown,
    Shutdown,
    /// The target is running a test session.
    Testing,
    /// Physical device in DFU mode.
    Dfu,
    /// Physical device in recovery mode.
    Recovery,
    /// Physical device running the restore OS.
    RestoreOs,
}

/// Every state that has a native code, in code order.
const KNOWN_STATES: [TargetState; 10] = [
    TargetState::Creating,
    TargetState::Created,
    TargetState::Shutdown,
    TargetState::Booting,
    TargetState::Booted,
    TargetState::ShuttingDown,
    TargetState::Testing,
    TargetState::Dfu,
    TargetState::Recovery,
    TargetState::RestoreOs,
];

/// Converts a provider-native state code into a [`TargetState`].
///
/// Total over all integers: codes outside the table yield
/// [`TargetState::Unknown`] rather than an error.
pub fn state_for_code(code: i64) -> TargetState {
    match code {
        0 => TargetState::Creating,
        1 => TargetState::Created,
        2 => TargetState::Shutdown,
        3 => TargetState::Booting,
        4 => TargetState::Booted,
        5 => TargetState::ShuttingDown,
        6 => TargetState::Testing,
        7 => TargetState::Dfu,
        8 => TargetState::Recovery,
        9 => TargetState::RestoreOs,
        _ => TargetState::Unknown,
    }
}

impl TargetState {
    /// Returns the native code for this state, the inverse of [`state_for_code`].
    ///
    /// Providers use this to translate their own state representation into
    /// codes. [`TargetState::Unknown`] has no code.
    pub fn native_code(self) -> Option<i64> {
        KNOWN_STATES
            .iter()
            .position(|s| *s == self)
            .map(|idx| idx as i64)
    }

    /// Returns all states that have a native code.
    pub fn known() -> &'static [TargetState] {
        &KNOWN_STATES
    }

    /// Returns `true` if the target is up and able to run processes.
    pub fn is_running(self) -> bool {
        matches!(self, TargetState::Booted | TargetState::Testing)
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetState::Unknown => "Unknown",
            TargetState::Creating => "Creating",
            TargetState::Created => "Created",
            TargetState::Booting => "Booting",
            TargetState::Booted => "Booted",
            TargetState::ShuttingDown => "Shutting Down",
            TargetState::Shutdown => "Shutdown",
            TargetState::Testing => "Testing",
            TargetState::Dfu => "DFU",
            TargetState::Recovery => "Recovery",
            TargetState::RestoreOs => "RestoreOS",
        };
        f.write_str(s)
    }
}
