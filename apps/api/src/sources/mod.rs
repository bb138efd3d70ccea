//! Collaborators feeding the matcher: resume samples on disk, stored job
//! descriptions in Postgres, client sessions in Redis.

pub mod job_descriptions;
pub mod samples;
pub mod sessions;

pub use job_descriptions::{JobDescriptionRecord, JobDescriptionSource, PgJobDescriptionSource};
pub use samples::{CandidateSource, FileSampleSource};
pub use sessions::{RedisSessionStore, Session, SessionStore, SessionUpdate};
