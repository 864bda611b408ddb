/// Declare strongly typed arena keys.
///
/// Each declared type wraps an `id_map::RawId` and is displayed as its prefix followed by its
/// index, so `pub struct InstId = "%";` prints as `%12`.
#[doc(hidden)]
#[macro_export]
macro_rules! __new_id_type {
    ( $(#[$outer:meta])* $vis:vis struct $name:ident = $prefix:literal; $($rest:tt)* ) => {
        $(#[$outer])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[repr(transparent)]
        $vis struct $name($crate::id_map::RawId);

        impl $name {
            #[inline]
            pub fn index(&self) -> $crate::id_map::Index {
                self.0.index()
            }
        }

        impl $crate::id_map::Key for $name {
            #[inline]
            fn from_raw(raw: $crate::id_map::RawId) -> Self {
                $name(raw)
            }

            #[inline]
            fn raw(self) -> $crate::id_map::RawId {
                self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0.index())
            }
        }

        $crate::__new_id_type!($($rest)*);
    };

    () => {}
}

#[doc(inline)]
pub use crate::__new_id_type as new_id_type;
