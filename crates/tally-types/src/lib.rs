//! # tally-types
//!
//! Shared ledger record types used across the Tally workspace.
//!
//! Every status, step and type field is an integer-backed enum. The integer
//! is what the ledger persists, so variants keep their historical values and
//! decoding an unknown integer is an error rather than a silent default.
//!
//! All timestamps are Unix epoch seconds (`u64`).

/// Declare an `i32`-backed enum with a checked `TryFrom<i32>` conversion.
macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[repr(i32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl $name {
            /// Integer value persisted in the ledger.
            pub fn as_i32(self) -> i32 {
                self as i32
            }
        }

        impl TryFrom<i32> for $name {
            type Error = crate::UnknownVariant;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $value => Ok(Self::$variant),)+
                    other => Err(crate::UnknownVariant {
                        kind: stringify!($name),
                        value: other,
                    }),
                }
            }
        }
    };
}

pub mod contribution;
pub mod promotion;
pub mod publisher;
pub mod report;
pub mod sku;

/// An integer read from storage that maps to no enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: i32,
}

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

/// Value of a single anonymous confirmation token.
pub const CONFIRMATION_TOKEN_VALUE: f64 = 0.25;
