#![allow(unused_macros)]

// Feature-gating helpers, in the style of mio's `macros/mod.rs`: instead of
// sprinkling `#[cfg(feature = "...")]` through every module we name the gate
// once and reuse it.

macro_rules! cfg_os_poll {
    ($($item:item)*) => {
        $(
            #[cfg(feature = "os-poll")]
            $item
        )*
    }
}

macro_rules! cfg_net {
    ($($item:item)*) => {
        $(
            #[cfg(feature = "net")]
            $item
        )*
    }
}

macro_rules! cfg_io_uring {
    ($($item:item)*) => {
        $(
            #[cfg(feature = "io-uring")]
            $item
        )*
    }
}

macro_rules! cfg_not_io_uring {
    ($($item:item)*) => {
        $(
            #[cfg(not(feature = "io-uring"))]
            $item
        )*
    }
}
