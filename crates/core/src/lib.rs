pub mod config;
pub mod domain;
pub mod identity;

pub use domain::connection::{Connection, TokenPair, User, UserId};
pub use domain::engagement::{
    ContactUpdate, NoteInput, NoteRecord, NoteUpdate, TaskInput, TaskRecord, TaskUpdate,
};
pub use domain::lead::{CompanyInput, ContactInput, ContactMatch, ExperienceEntry, SyncResult};
pub use identity::{extract_company_segment, extract_profile_handle, normalize_website};
