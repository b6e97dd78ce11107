use rusqlite::Connection;

/// Entity kinds that carry a human-readable sequential code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Parent,
    Teacher,
    Student,
    Cat,
    Exam,
}

impl CodeKind {
    pub fn prefix(self) -> &'static str {
        match self {
            CodeKind::Parent => "P",
            CodeKind::Teacher => "T",
            CodeKind::Student => "S",
            CodeKind::Cat => "C",
            CodeKind::Exam => "E",
        }
    }

    fn sequence_key(self) -> &'static str {
        match self {
            CodeKind::Parent => "parent",
            CodeKind::Teacher => "teacher",
            CodeKind::Student => "student",
            CodeKind::Cat => "cat",
            CodeKind::Exam => "exam",
        }
    }
}

/// Issue the next code for a kind, e.g. `S-001`, `S-002`, ...
///
/// The counter lives in the `sequences` table and is bumped with a single
/// upsert-returning statement, so two concurrent writers cannot observe the
/// same value. Codes are never re-parsed from existing rows; the counter is
/// the source of truth.
pub fn next_code(conn: &Connection, kind: CodeKind) -> Result<String, rusqlite::Error> {
    let value: i64 = conn.query_row(
        "INSERT INTO sequences(kind, value) VALUES(?, 1)
         ON CONFLICT(kind) DO UPDATE SET value = value + 1
         RETURNING value",
        [kind.sequence_key()],
        |r| r.get(0),
    )?;
    Ok(format!("{}-{:03}", kind.prefix(), value))
}
