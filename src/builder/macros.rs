//! Macros for declaring state and event tokens.

/// Declare a closed token enumeration and implement [`Token`](crate::core::Token) for it.
///
/// Each variant may carry an explicit wire name; otherwise the variant
/// identifier is used. The generated enum also gets an `ALL` constant listing
/// every variant in declaration order, which is what machines are usually
/// declared over.
///
/// # Example
///
/// ```
/// use instrument_driver::core::Token;
/// use instrument_driver::token_enum;
///
/// token_enum! {
///     pub enum PumpState {
///         Idle => "PUMP_STATE_IDLE",
///         Pumping => "PUMP_STATE_PUMPING",
///         Flushing,
///     }
/// }
///
/// assert_eq!(PumpState::Idle.name(), "PUMP_STATE_IDLE");
/// assert_eq!(PumpState::Flushing.name(), "Flushing");
/// assert_eq!(PumpState::ALL.len(), 3);
/// ```
#[macro_export]
macro_rules! token_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $(=> $wire:literal)?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize,
        )]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),*
        }

        impl $name {
            /// Every variant, in declaration order.
            #[allow(dead_code)]
            pub const ALL: &'static [$name] = &[$($name::$variant),*];
        }

        impl $crate::core::Token for $name {
            fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $crate::__token_wire_name!($variant $(, $wire)?)),*
                }
            }

            fn from_name(name: &str) -> Option<Self> {
                $(
                    if name == $crate::__token_wire_name!($variant $(, $wire)?) {
                        return Some(Self::$variant);
                    }
                )*
                None
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::core::Token::name(self))
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __token_wire_name {
    ($variant:ident) => {
        stringify!($variant)
    };
    ($variant:ident, $wire:literal) => {
        $wire
    };
}
