//! Core loader for oxidized-runahead
//!
//! Opens libretro cores from shared libraries.

pub mod libretro;

pub use libretro::{LibretroCore, LibretroLoader, SystemInfo, RETRO_API_VERSION};
