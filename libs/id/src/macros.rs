//! Macros for defining typed ID types.

/// Parses the decimal suffix of a prefixed ID.
///
/// Leading zeros are rejected so that every value has exactly one textual
/// form.
#[doc(hidden)]
pub fn parse_suffix(digits: &str) -> Result<u64, crate::IdError> {
    let canonical = !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'));
    if !canonical {
        return Err(crate::IdError::InvalidNumber(digits.to_string()));
    }
    digits
        .parse::<u64>()
        .map_err(|_| crate::IdError::InvalidNumber(digits.to_string()))
}

/// Macro to define a prefixed, numbered ID.
///
/// This generates a newtype wrapper around an unsigned integer with:
/// - `PREFIX` and `MIN` constants
/// - `new()` which rejects values below `MIN`
/// - `parse()` accepting the canonical prefix and any listed aliases
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations (as strings)
///
/// # Example
///
/// ```ignore
/// define_numbered_id!(JobName, u64, "job", min = 0);
/// define_numbered_id!(WorkerId, u32, "system-worker-", min = 1, aliases = ["worker-", ""]);
///
/// let parsed: WorkerId = "system-worker-2".parse()?;
/// ```
#[macro_export]
macro_rules! define_numbered_id {
    ($(#[$meta:meta])* $name:ident, $repr:ty, $prefix:literal, min = $min:literal $(, aliases = [$($alias:literal),* $(,)?])?) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($repr);

        impl $name {
            /// The canonical prefix for this ID type.
            pub const PREFIX: &'static str = $prefix;

            /// The smallest valid number.
            pub const MIN: $repr = $min;

            /// Creates an ID from its number.
            pub fn new(value: $repr) -> Result<Self, $crate::IdError> {
                if value < Self::MIN {
                    return Err($crate::IdError::OutOfRange {
                        value: value as u64,
                        min: Self::MIN as u64,
                    });
                }
                Ok(Self(value))
            }

            /// Returns the numeric portion.
            #[must_use]
            pub const fn value(&self) -> $repr {
                self.0
            }

            /// Parses an ID from a string.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                let accepted: &[&str] = &[$prefix $($(, $alias)*)?];
                let Some(digits) = accepted.iter().find_map(|p| {
                    s.strip_prefix(p)
                        .filter(|rest| rest.bytes().next().is_some_and(|b| b.is_ascii_digit()))
                }) else {
                    return Err($crate::IdError::InvalidPrefix {
                        expected: Self::PREFIX,
                        actual: s.to_string(),
                    });
                };

                let value = $crate::macros::parse_suffix(digits)?;
                let value = <$repr>::try_from(value)
                    .map_err(|_| $crate::IdError::InvalidNumber(digits.to_string()))?;
                Self::new(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", Self::PREFIX, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Macro to define an integer key owned by an external record store.
///
/// These serialize as JSON numbers and carry no prefix.
#[macro_export]
macro_rules! define_record_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(i64);

        impl $name {
            /// Creates a key from its raw value.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the underlying i64 value.
            #[must_use]
            pub const fn value(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }
                s.parse::<i64>()
                    .map(Self)
                    .map_err(|_| $crate::IdError::InvalidNumber(s.to_string()))
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_i64(self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let id = i64::deserialize(deserializer)?;
                Ok(Self(id))
            }
        }
    };
}
