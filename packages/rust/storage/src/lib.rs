//! Session state and session-scoped file storage.
//!
//! - [`SessionStore`]: keyed session records, with an in-memory implementation.
//! - [`UploadStore`]: uploaded sources and generated artifacts on disk, laid
//!   out as `<root>/<token>/<file>` so sessions never share files.

mod sessions;
mod uploads;

pub use sessions::{InMemorySessionStore, SessionStore, SessionUpdate};
pub use uploads::{UploadStore, sanitize_file_name};
