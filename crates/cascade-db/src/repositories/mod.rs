//! Repository implementations for PostgreSQL.

mod job;

pub use job::PgJobRepository;
