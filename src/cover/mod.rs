//! Cover art lookup for tracks without an embedded picture.
//!
//! Embedded pictures are read by the metadata module. When a file carries
//! none, an image next to it (cover.jpg, folder.png, ...) is referenced by
//! path instead of being copied into the catalog.

mod sidecar;

pub use sidecar::{COVER_FILENAMES, IMAGE_EXTENSIONS, find_sidecar_cover, is_cover_file};
