//! Macros for declaring engine states.

/// Declare a fieldless enum and implement [`State`](crate::core::State) for it.
///
/// The enum derives `Clone`, `PartialEq`, `Eq`, `Debug` and serde's
/// `Serialize`/`Deserialize` (the calling crate needs `serde` with the
/// `derive` feature). Variant names become state names, and `ALL` lists the
/// variants in declaration order.
///
/// # Example
///
/// ```
/// use convergent::core::{Condition, State};
/// use convergent::state_enum;
///
/// state_enum! {
///     pub enum Session {
///         Idle,
///         Handshake,
///         Established,
///         Rejected,
///     }
///     final: [Established, Rejected]
///     error: [Rejected]
/// }
///
/// assert_eq!(Session::Handshake.name(), "Handshake");
/// assert!(Session::Rejected.is_error());
/// assert_eq!(Session::ALL.len(), 4);
/// assert!(Condition::exact(Session::Idle).matches(&Session::Idle));
/// ```

#[macro_export]
macro_rules! state_enum {
    (@member $value:ident in) => {
        false
    };
    (@member $value:ident in $($variant:ident),+) => {
        matches!($value, $(Self::$variant)|+)
    };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident
            ),* $(,)?
        }

        $(final: [$($final:ident),* $(,)?])?
        $(error: [$($error:ident),* $(,)?])?
    ) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),*
        }

        impl $name {
            /// Every variant, in declaration order.
            #[allow(dead_code)]
            pub const ALL: &'static [$name] = &[$(Self::$variant),*];
        }

        impl $crate::core::State for $name {
            fn name(&self) -> &str {
                match self {
                    $(Self::$variant => stringify!($variant)),*
                }
            }

            fn is_final(&self) -> bool {
                $crate::state_enum!(@member self in $($($final),*)?)
            }

            fn is_error(&self) -> bool {
                $crate::state_enum!(@member self in $($($error),*)?)
            }
        }
    };
}
