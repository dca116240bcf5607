use serde::{Deserialize, Serialize};

/// Access level stored on a group/resource association.
///
/// Levels are totally ordered; a stored level authorizes every required
/// level at or below it. The numeric codes are the persisted representation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Read = 4,
    ReadExecute = 5,
    ReadWriteExecute = 7,
}

impl PermissionLevel {
    pub const ALL: [PermissionLevel; 3] = [
        PermissionLevel::Read,
        PermissionLevel::ReadExecute,
        PermissionLevel::ReadWriteExecute,
    ];

    /// Whether this (stored) level satisfies `required`.
    pub fn allows(self, required: PermissionLevel) -> bool {
        self >= required
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            4 => Some(PermissionLevel::Read),
            5 => Some(PermissionLevel::ReadExecute),
            7 => Some(PermissionLevel::ReadWriteExecute),
            _ => None,
        }
    }
}

impl core::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PermissionLevel::Read => f.write_str("read"),
            PermissionLevel::ReadExecute => f.write_str("read_execute"),
            PermissionLevel::ReadWriteExecute => f.write_str("read_write_execute"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn level() -> impl Strategy<Value = PermissionLevel> {
        prop::sample::select(PermissionLevel::ALL.to_vec())
    }

    #[test]
    fn levels_are_ordered() {
        assert!(PermissionLevel::Read < PermissionLevel::ReadExecute);
        assert!(PermissionLevel::ReadExecute < PermissionLevel::ReadWriteExecute);
    }

    #[test]
    fn codes_round_trip() {
        for level in PermissionLevel::ALL {
            assert_eq!(PermissionLevel::from_code(level.code()), Some(level));
        }
        assert_eq!(PermissionLevel::from_code(6), None);
    }

    proptest! {
        #[test]
        fn stored_level_allows_exactly_the_levels_at_or_below(stored in level(), required in level()) {
            prop_assert_eq!(stored.allows(required), required <= stored);
        }
    }
}
