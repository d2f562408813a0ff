//! SQLite schema for the normalized actor table.
//!
//! `actor_user` is NULL for anonymous (IP) actors. Both `actor_user` and
//! `actor_name` are unique so concurrent acquirers of the same user collide on
//! the constraint and converge on one row.

pub const ACTOR_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS actor (
        actor_id INTEGER PRIMARY KEY AUTOINCREMENT,
        actor_user INTEGER UNIQUE,
        actor_name TEXT NOT NULL UNIQUE
    )
";
