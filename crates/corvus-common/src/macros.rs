#[macro_export]
macro_rules! next_enum_of {
    ($vec: expr, $variant: pat => $map_fn: expr) => {
        $vec.iter()
            .filter_map(|x| if let $variant = x { Some($map_fn) } else { None })
            .next()
    };
}

/// Generates an enum backed by a raw wire value with a catch-all `Unknown`
/// variant, plus the `From` conversions in both directions and a `Display`
/// implementation. Protocol code matches on the variants while the codec
/// keeps round-tripping values it does not recognize.
#[macro_export]
macro_rules! value_enum {
    (
        $(#[$outer:meta])*
        $vis:vis enum $name:ident($T:ty) {
            $(
                $(#[$inner:ident $($args:tt)*])*
                $value_name:ident = $value:literal
            ),*
        }
    ) => {
        $(#[$outer])*
        $vis enum $name {
            $(
                $(#[$inner $($args)*])*
                $value_name,
            )*
            Unknown($T)
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, formatter: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    $(
                        Self::$value_name => write!(formatter, stringify!($value_name)),
                    )*
                    Self::Unknown(value) => write!(formatter, "Unknown ({})", value)
                }
            }
        }

        impl From<$T> for $name {
            fn from(value: $T) -> Self {
                match value {
                    $(
                        $value => Self::$value_name,
                    )*
                    _ => Self::Unknown(value)
                }
            }
        }

        impl From<$name> for $T {
            fn from(value: $name) -> Self {
                match value {
                    $(
                        $name::$value_name => $value,
                    )*
                    $name::Unknown(value) => value
                }
            }
        }
    };
}
