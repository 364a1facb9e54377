//! Domain model for connection profiles and stored records.
//!
//! # Responsibility
//! - Define connection profiles and the backend-kind enumeration.
//! - Define employee/work-record entities and the validation seam.
//!
//! # Invariants
//! - Profiles are identified by name; records by stable UUID strings.
//! - Secrets never appear in clear text outside `Secret::expose`.

pub mod profile;
pub mod record;
pub mod secret;
