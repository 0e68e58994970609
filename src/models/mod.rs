//! Request and response payloads for the bridge API.
//!
//! These are thin serde DTOs; object state itself lives entirely in the
//! backing store and never outlasts a single request.

pub mod object;
pub mod presign;
