use voxpoll_db::{create_pool, run_migrations, DbRuntimeSettings};

#[test]
fn file_backed_database_initializes_and_persists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("survey.db");
    let path = path.to_str().expect("utf-8 path");

    {
        let pool = create_pool(path, DbRuntimeSettings::default()).expect("pool");
        let conn = pool.get().expect("connection");
        assert_eq!(run_migrations(&conn).expect("migrations"), 4);
        conn.execute(
            "INSERT INTO survey_definitions (definition_id, name, questions_json) VALUES (?1, ?2, ?3)",
            ["d1", "교통", "[]"],
        )
        .expect("insert definition");
    }

    let pool = create_pool(path, DbRuntimeSettings::default()).expect("reopen");
    let conn = pool.get().expect("connection");
    assert_eq!(run_migrations(&conn).expect("migrations"), 0);

    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
        .expect("prepare");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("query")
        .map(|r| r.expect("row"))
        .collect();
    assert_eq!(
        tables,
        vec![
            "_voxpoll_migrations",
            "survey_definitions",
            "survey_responses",
            "survey_sessions"
        ]
    );

    let name: String = conn
        .query_row(
            "SELECT name FROM survey_definitions WHERE definition_id = 'd1'",
            [],
            |row| row.get(0),
        )
        .expect("definition survives reopen");
    assert_eq!(name, "교통");

    let created_at: String = conn
        .query_row(
            "SELECT created_at FROM survey_definitions WHERE definition_id = 'd1'",
            [],
            |row| row.get(0),
        )
        .expect("created_at default");
    assert!(created_at.ends_with('Z'));
}
