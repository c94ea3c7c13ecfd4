//! Core data types of the synthetic population model.
//!
//! Newtype ids, categorical attribute codes, the occupancy state domain,
//! and the demographic category enums used as fitting controls and as
//! clustering features.

use std::fmt;

use serde::{Serialize, Deserialize};

// =============================================================================
// ID TYPES
// =============================================================================

/// Macro to generate newtype ID wrappers with common derives and Display.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

// Synthetic output household (caller-supplied sequence).
define_id!(HouseholdId);
// Demographic cluster a person belongs to (shared Markov chain).
define_id!(ClusterId);

/// A geographic region code (census output area or similar).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region(pub String);

impl Region {
    pub fn new(code: impl Into<String>) -> Self {
        Region(code.into())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// CATEGORICAL ATTRIBUTES
// =============================================================================

/// Ordinal code of one categorical attribute value.
///
/// Reference sample columns and control totals share this code domain, so
/// a control category value can be matched against sample rows directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Category(pub u32);

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<bool> for Category {
    fn from(value: bool) -> Self {
        Category(value as u32)
    }
}

// =============================================================================
// OCCUPANCY STATES
// =============================================================================

/// The closed set of occupancy states driving the heating model downstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activity {
    Home,
    SleepAtHome,
    OtherHome,
    SleepAtOtherHome,
    NotAtHome,
}

/// Number of occupancy states.
pub const ACTIVITY_COUNT: usize = 5;

impl Activity {
    /// All states in a fixed order; transition matrices index by this order.
    pub const ALL: [Activity; ACTIVITY_COUNT] = [
        Activity::Home,
        Activity::SleepAtHome,
        Activity::OtherHome,
        Activity::SleepAtOtherHome,
        Activity::NotAtHome,
    ];

    pub fn index(self) -> usize {
        match self {
            Activity::Home => 0,
            Activity::SleepAtHome => 1,
            Activity::OtherHome => 2,
            Activity::SleepAtOtherHome => 3,
            Activity::NotAtHome => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Activity> {
        Activity::ALL.get(index).copied()
    }

    /// Whether the person is inside their own dwelling in this state.
    pub fn is_at_home(self) -> bool {
        matches!(self, Activity::Home | Activity::SleepAtHome)
    }

    /// Whether the person is asleep in this state.
    pub fn is_asleep(self) -> bool {
        matches!(self, Activity::SleepAtHome | Activity::SleepAtOtherHome)
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activity::Home => "HOME",
            Activity::SleepAtHome => "SLEEP_AT_HOME",
            Activity::OtherHome => "OTHER_HOME",
            Activity::SleepAtOtherHome => "SLEEP_AT_OTHER_HOME",
            Activity::NotAtHome => "NOT_AT_HOME",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// DEMOGRAPHIC FEATURES
// =============================================================================

/// Age bands of the census age structure. The declaration order is the
/// band order, so range checks like "younger than 16" are plain `<`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeGroup {
    Age0To4,
    Age5To7,
    Age8To9,
    Age10To14,
    Age15,
    Age16To17,
    Age18To19,
    Age20To24,
    Age25To29,
    Age30To44,
    Age45To59,
    Age60To64,
    Age65To74,
    Age75To84,
    Age85To89,
    Age90AndOver,
}

/// Simplified household type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HouseholdType {
    OnePersonHousehold,
    CoupleWithDependentChildren,
    CoupleWithoutDependentChildren,
    LoneParentWithDependentChildren,
    MultiPersonHousehold,
}

/// Economic activity of an individual.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EconomicActivity {
    EmployeePartTime,
    EmployeeFullTime,
    SelfEmployed,
    Unemployed,
    ActiveFullTimeStudent,
    Retired,
    InactiveFullTimeStudent,
    LookingAfterHome,
    LongTermSick,
    InactiveOther,
    Below16,
    Above74,
}

/// Highest qualification level of an individual.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Qualification {
    NoQualifications,
    Level1,
    Level2,
    Level3,
    Level45,
    Apprenticeship,
    OtherQualification,
    Below16,
}

macro_rules! impl_category_from {
    ($($ty:ident),*) => {
        $(
            impl From<$ty> for Category {
                fn from(value: $ty) -> Self {
                    Category(value as u32)
                }
            }
        )*
    };
}

impl_category_from!(AgeGroup, HouseholdType, EconomicActivity, Qualification);

// =============================================================================
// FEATURE COMBINATION
// =============================================================================

/// Cantor pairing of two non-negative integers.
pub fn pairing(a: u64, b: u64) -> u64 {
    (a + b) * (a + b + 1) / 2 + b
}

/// Flatten a combination of feature codes into a single cluster id.
///
/// A single feature maps to its own code; higher dimensions fold the
/// pairing function left to right. Injective over the finite feature
/// domain, which is all that is required of the key.
pub fn feature_id(codes: &[Category]) -> ClusterId {
    let mut iter = codes.iter().map(|c| c.0 as u64);
    let first = iter.next().unwrap_or(0);
    ClusterId(iter.fold(first, pairing))
}
