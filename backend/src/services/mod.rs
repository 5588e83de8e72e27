//! Module for core business logic services.
//!
//! Directory reads and the profile update engine. Both sit behind the access
//! guard and talk to the identity store.

pub mod directory;
pub mod profile;

pub use directory::{DirectoryService, IdentityView};
pub use profile::{ProfileUpdate, ProfileUpdateEngine};
