//! Embedded SQL migrations.
//!
//! Each migration runs once, inside its own transaction, and is recorded in
//! `_voxpoll_migrations` in the same transaction.

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Applied in order. Append only.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_survey_definitions",
        sql: include_str!("migrations/001_survey_definitions.sql"),
    },
    Migration {
        name: "002_survey_sessions",
        sql: include_str!("migrations/002_survey_sessions.sql"),
    },
    Migration {
        name: "003_survey_responses",
        sql: include_str!("migrations/003_survey_responses.sql"),
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Applies every pending migration and returns how many ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    // 000_init creates the same table; it has to exist before the first lookup.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _voxpoll_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|source| MigrationError::ExecutionFailed {
        name: "_voxpoll_migrations_bootstrap".to_string(),
        source,
    })?;

    let mut applied = 0;

    for migration in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _voxpoll_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(migration = migration.name, "already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");
        apply(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
        applied += 1;
    }

    Ok(applied)
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _voxpoll_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .expect("should query sqlite_master")
    }

    #[test]
    fn fresh_db_applies_everything() {
        let conn = Connection::open_in_memory().unwrap();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, MIGRATIONS.len());

        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM _voxpoll_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn second_run_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 4);
        assert_eq!(run_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn survey_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        for table in ["survey_definitions", "survey_sessions", "survey_responses"] {
            assert!(table_exists(&conn, table), "{table} should exist");
        }
    }

    #[test]
    fn side_effects_roll_back_when_tracking_insert_fails() {
        let conn = Connection::open_in_memory().unwrap();
        let migrations = [Migration {
            name: "001_conflict",
            sql: "
                CREATE TABLE rollback_probe (id INTEGER PRIMARY KEY);
                INSERT INTO _voxpoll_migrations (name) VALUES ('001_conflict');
            ",
        }];

        let err = run_migrations_from_list(&conn, &migrations).unwrap_err();
        match err {
            MigrationError::ExecutionFailed { name, .. } => assert_eq!(name, "001_conflict"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!table_exists(&conn, "rollback_probe"));
    }

    #[test]
    fn one_response_per_session() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO survey_definitions (definition_id, questions_json) VALUES ('d1', '[]');
             INSERT INTO survey_sessions (session_id, definition_id, transcript_json)
                 VALUES ('s1', 'd1', '[]');
             INSERT INTO survey_responses (response_id, session_id, answers_json)
                 VALUES ('r1', 's1', '{}');",
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO survey_responses (response_id, session_id, answers_json)
             VALUES ('r2', 's1', '{}')",
            [],
        );
        assert!(dup.is_err(), "second response for a session must be rejected");

        let orphan = conn.execute(
            "INSERT INTO survey_sessions (session_id, definition_id, transcript_json)
             VALUES ('s2', 'missing', '[]')",
            [],
        );
        assert!(orphan.is_err(), "session must reference an existing definition");
    }
}
