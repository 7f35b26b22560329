//! Dual-sink logging macros. Firmware builds (feature `defmt`) mirror every
//! message to the RTT console; host builds only feed the `log` facade.
//!
//! The `defmt` cfg is evaluated in the *calling* crate, so every crate that
//! invokes these macros declares its own `defmt` feature.

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        ::log::info!($($arg)*);
    }};
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        ::log::warn!($($arg)*);
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);
        ::log::error!($($arg)*);
    }};
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        ::log::debug!($($arg)*);
    }};
}

/// Assigns names to hardware resources and verifies at compile-time that no
/// resource is assigned twice.
#[macro_export]
macro_rules! assign_resources {
    ($( $group_name:ident { $($name:ident: $field:ident),* $(,)? } )*) => {
        $(
            pub struct $group_name {
                $( pub $name: embassy_rp::Peri<'static, embassy_rp::peripherals::$field>, )*
            }
        )*

        #[allow(non_snake_case)]
        pub struct AssignedResources {
            $( pub $group_name: $group_name, )*
        }

        impl AssignedResources {
            pub fn take(p: embassy_rp::Peripherals) -> Self {
                Self {
                    $(
                        $group_name: $group_name {
                            $( $name: p.$field.into(), )*
                        },
                    )*
                }
            }
        }
    };
}
