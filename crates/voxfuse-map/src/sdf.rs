use bytemuck::{Pod, Zeroable};

macro_rules! impl_fixed_precision {
    (name: $name:ident, doc: $docstr:expr, primitive: $primitive:ty, float: $float:ty, max: $max:literal) => {
        #[doc = $docstr]
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[repr(transparent)]
        pub struct $name(pub $primitive);

        impl $name {
            pub const RESOLUTION: $float = <$primitive>::MAX as $float;
            pub const PRECISION: $float = $max / Self::RESOLUTION;
            pub const MIN: Self = Self(-<$primitive>::MAX);
            pub const MAX: Self = Self(<$primitive>::MAX);
            pub const ZERO: Self = Self(0);
        }

        impl From<$name> for $float {
            #[inline]
            fn from(x: $name) -> Self {
                x.0 as $float * $name::PRECISION
            }
        }

        impl From<$float> for $name {
            /// Rounds to the nearest representable value, so decoding and re-encoding is lossless.
            #[inline]
            fn from(s: $float) -> Self {
                $name((s.min($max).max(-$max) / Self::PRECISION).round() as $primitive)
            }
        }
    };
}

impl_fixed_precision!(
    name: Sd16,
    doc: "A 16-bit truncated signed distance in `[-1.0, 1.0]`, in units of the truncation band. Positive is in front of the surface.",
    primitive: i16,
    float: f32,
    max: 1.0
);

unsafe impl Zeroable for Sd16 {}
unsafe impl Pod for Sd16 {}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
