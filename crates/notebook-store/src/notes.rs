//! CRUD operations for [`Note`] records.
//!
//! Every mutating operation runs inside a single `IMMEDIATE` transaction, so
//! the existence check and the write it guards cannot interleave with
//! another writer, even one using a different connection to the same file.

use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Note, NotePatch, Page};

const SELECT_NOTE: &str = "SELECT id, name, company, phone, mail, birth_date, image_id FROM notes";

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Whether a note with this id exists.
    pub fn note_exists(&self, id: &str) -> Result<bool> {
        note_exists(self.conn(), id)
    }

    /// Fetch a single note by id.
    pub fn get_note(&self, id: &str) -> Result<Note> {
        get_note(self.conn(), id)
    }

    /// List notes ordered by id ascending, windowed by `page`.
    pub fn list_notes(&self, page: Page) -> Result<Vec<Note>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{SELECT_NOTE} ORDER BY id ASC LIMIT ?1 OFFSET ?2"))?;

        // SQLite treats a negative LIMIT as "no limit".
        let limit = page.limit.map(i64::from).unwrap_or(-1);
        let rows = stmt.query_map(params![limit, page.offset], row_to_note)?;

        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?);
        }
        Ok(notes)
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new note and return it as stored.
    ///
    /// An empty `id` is replaced by a fresh UUID v4.
    pub fn create_note(&mut self, note: &Note) -> Result<Note> {
        note.validate()?;

        let mut note = note.clone();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if note.id.is_empty() {
            note.id = Uuid::new_v4().to_string();
        } else if note_exists(&tx, &note.id)? {
            return Err(id_taken(&note.id));
        }

        tx.execute(
            "INSERT INTO notes (id, name, company, phone, mail, birth_date, image_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                note.id,
                note.name,
                note.company,
                note.phone,
                note.mail,
                note.birth_date,
                note.image_id,
            ],
        )
        .map_err(|e| write_error(e, &note.id))?;

        let stored = get_note(&tx, &note.id)?;
        tx.commit()?;

        tracing::debug!(id = %stored.id, "note created");
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply a partial update and return the resulting note.
    ///
    /// When the patch carries a new id the record is renamed in place and
    /// returned under that id.
    pub fn update_note(&mut self, id: &str, patch: &NotePatch) -> Result<Note> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !note_exists(&tx, id)? {
            return Err(StoreError::NotFound);
        }

        let assignments = patch.assignments();
        if assignments.is_empty() {
            return get_note(&tx, id);
        }

        let target = patch.new_id().unwrap_or(id);
        if target != id && note_exists(&tx, target)? {
            return Err(id_taken(target));
        }

        let set_clause = assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE notes SET {set_clause} WHERE id = ?{}",
            assignments.len() + 1
        );
        let values = assignments
            .iter()
            .map(|(_, value)| *value)
            .chain(std::iter::once(id));

        tx.execute(&sql, params_from_iter(values))
            .map_err(|e| write_error(e, target))?;

        let updated = get_note(&tx, target)?;
        tx.commit()?;

        tracing::debug!(
            id = %id,
            new_id = %updated.id,
            fields = assignments.len(),
            "note updated"
        );
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a note by id.
    pub fn delete_note(&self, id: &str) -> Result<()> {
        let affected = self
            .conn()
            .execute("DELETE FROM notes WHERE id = ?1", params![id])?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        tracing::debug!(id = %id, "note deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn note_exists(conn: &Connection, id: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM notes WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn get_note(conn: &Connection, id: &str) -> Result<Note> {
    conn.query_row(
        &format!("{SELECT_NOTE} WHERE id = ?1"),
        params![id],
        row_to_note,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

fn id_taken(id: &str) -> StoreError {
    StoreError::Conflict(format!("note with id '{id}' already exists"))
}

/// A constraint violation on write means a concurrent writer claimed the id
/// first.
fn write_error(err: rusqlite::Error, id: &str) -> StoreError {
    if StoreError::is_constraint_violation(&err) {
        id_taken(id)
    } else {
        StoreError::Sqlite(err)
    }
}

/// Map a `rusqlite::Row` to a [`Note`].
fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        name: row.get(1)?,
        company: row.get(2)?,
        phone: row.get(3)?,
        mail: row.get(4)?,
        birth_date: row.get(5)?,
        image_id: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    fn db() -> Database {
        Database::open_in_memory().expect("in-memory db")
    }

    fn note(id: &str, name: &str) -> Note {
        Note {
            id: id.into(),
            name: name.into(),
            phone: "555".into(),
            mail: "a@b.c".into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_generates_id_when_empty() {
        let mut db = db();

        let first = db.create_note(&note("", "Al")).unwrap();
        let second = db.create_note(&note("", "Al")).unwrap();

        assert!(!first.id.is_empty());
        assert!(!second.id.is_empty());
        assert_ne!(first.id, second.id);
        assert!(db.note_exists(&first.id).unwrap());
        assert!(db.note_exists(&second.id).unwrap());
    }

    #[test]
    fn create_keeps_client_id_and_optionals() {
        let mut db = db();
        let mut input = note("al", "Al");
        input.company = Some("Acme".into());
        input.birth_date = Some("1990-01-01".into());
        input.image_id = Some("d41d8cd98f00b204e9800998ecf8427e".into());

        let stored = db.create_note(&input).unwrap();
        assert_eq!(stored, input);
        assert_eq!(db.get_note("al").unwrap(), input);
    }

    #[test]
    fn create_rejects_missing_mandatory_fields() {
        let mut db = db();

        let mut no_name = note("a", "");
        no_name.company = Some("Acme".into());
        let mut no_phone = note("b", "Al");
        no_phone.phone.clear();
        let mut no_mail = note("c", "Al");
        no_mail.mail.clear();

        for input in [no_name, no_phone, no_mail] {
            assert!(matches!(
                db.create_note(&input),
                Err(StoreError::Validation(_))
            ));
            assert!(!db.note_exists(&input.id).unwrap());
        }
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let mut db = db();
        db.create_note(&note("dup", "First")).unwrap();

        let err = db.create_note(&note("dup", "Second")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(db.get_note("dup").unwrap().name, "First");
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = db();
        assert!(matches!(db.get_note("nope"), Err(StoreError::NotFound)));
        assert!(!db.note_exists("nope").unwrap());
    }

    #[test]
    fn list_is_sorted_and_windowed() {
        let mut db = db();
        for id in ["c", "a", "d", "b"] {
            db.create_note(&note(id, id)).unwrap();
        }

        let ids = |notes: Vec<Note>| notes.into_iter().map(|n| n.id).collect::<Vec<_>>();

        assert_eq!(ids(db.list_notes(Page::new(0, None)).unwrap()), ["a", "b", "c", "d"]);
        assert_eq!(ids(db.list_notes(Page::new(2, Some(1))).unwrap()), ["c"]);
        assert_eq!(ids(db.list_notes(Page::new(1, Some(2))).unwrap()), ["b", "c"]);
        assert_eq!(ids(db.list_notes(Page::new(3, None)).unwrap()), ["d"]);
        assert!(db.list_notes(Page::new(10, None)).unwrap().is_empty());
        assert!(db.list_notes(Page::new(0, Some(0))).unwrap().is_empty());
    }

    #[test]
    fn list_third_note_empty_when_fewer_than_three() {
        let mut db = db();
        db.create_note(&note("a", "a")).unwrap();
        db.create_note(&note("b", "b")).unwrap();

        assert!(db.list_notes(Page::parse(Some("2"), Some("1"))).unwrap().is_empty());
    }

    #[test]
    fn empty_patch_is_noop() {
        let mut db = db();
        let stored = db.create_note(&note("x", "Al")).unwrap();

        let updated = db.update_note("x", &NotePatch::default()).unwrap();
        assert_eq!(updated, stored);
    }

    #[test]
    fn empty_scalars_in_patch_keep_stored_values() {
        let mut db = db();
        let stored = db.create_note(&note("x", "Al")).unwrap();

        let patch = NotePatch {
            id: Some(String::new()),
            name: Some(String::new()),
            phone: Some(String::new()),
            mail: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(db.update_note("x", &patch).unwrap(), stored);
    }

    #[test]
    fn patch_replaces_only_provided_fields() {
        let mut db = db();
        let mut input = note("x", "Al");
        input.company = Some("Old".into());
        input.birth_date = Some("1990-01-01".into());
        db.create_note(&input).unwrap();

        let patch = NotePatch {
            phone: Some("777".into()),
            company: Some(String::new()),
            image_id: Some("abc".into()),
            ..Default::default()
        };
        let updated = db.update_note("x", &patch).unwrap();

        assert_eq!(updated.name, "Al");
        assert_eq!(updated.phone, "777");
        assert_eq!(updated.mail, "a@b.c");
        assert_eq!(updated.company.as_deref(), Some(""));
        assert_eq!(updated.birth_date.as_deref(), Some("1990-01-01"));
        assert_eq!(updated.image_id.as_deref(), Some("abc"));
        assert_eq!(db.get_note("x").unwrap(), updated);
    }

    #[test]
    fn update_missing_is_not_found() {
        let mut db = db();
        let patch = NotePatch {
            name: Some("Bob".into()),
            ..Default::default()
        };
        assert!(matches!(
            db.update_note("ghost", &patch),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn rename_moves_record_and_preserves_fields() {
        let mut db = db();
        let mut input = note("old", "Al");
        input.company = Some("Acme".into());
        db.create_note(&input).unwrap();

        let patch = NotePatch {
            id: Some("new".into()),
            ..Default::default()
        };
        let renamed = db.update_note("old", &patch).unwrap();

        assert_eq!(renamed.id, "new");
        assert_eq!(renamed.name, "Al");
        assert_eq!(renamed.company.as_deref(), Some("Acme"));
        assert!(!db.note_exists("old").unwrap());
        assert!(db.note_exists("new").unwrap());
    }

    #[test]
    fn rename_with_other_fields_applies_both() {
        let mut db = db();
        db.create_note(&note("old", "Al")).unwrap();

        let patch = NotePatch {
            id: Some("new".into()),
            mail: Some("al@example.org".into()),
            ..Default::default()
        };
        let renamed = db.update_note("old", &patch).unwrap();

        assert_eq!(renamed.id, "new");
        assert_eq!(renamed.mail, "al@example.org");
    }

    #[test]
    fn rename_to_same_id_is_allowed() {
        let mut db = db();
        db.create_note(&note("same", "Al")).unwrap();

        let patch = NotePatch {
            id: Some("same".into()),
            name: Some("Bob".into()),
            ..Default::default()
        };
        assert_eq!(db.update_note("same", &patch).unwrap().name, "Bob");
    }

    #[test]
    fn rename_onto_existing_id_conflicts_and_changes_nothing() {
        let mut db = db();
        db.create_note(&note("a", "Al")).unwrap();
        db.create_note(&note("b", "Bo")).unwrap();

        let patch = NotePatch {
            id: Some("b".into()),
            name: Some("Changed".into()),
            ..Default::default()
        };
        assert!(matches!(
            db.update_note("a", &patch),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(db.get_note("a").unwrap().name, "Al");
        assert_eq!(db.get_note("b").unwrap().name, "Bo");
    }

    #[test]
    fn delete_removes_and_then_reports_not_found() {
        let mut db = db();
        db.create_note(&note("x", "Al")).unwrap();

        db.delete_note("x").unwrap();
        assert!(!db.note_exists("x").unwrap());
        assert!(matches!(db.delete_note("x"), Err(StoreError::NotFound)));
    }

    #[test]
    fn create_update_rename_scenario() {
        let mut db = db();

        let created = db.create_note(&note("", "Al")).unwrap();
        let x = created.id.clone();

        let updated = db
            .update_note(
                &x,
                &NotePatch {
                    company: Some("Acme".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.company.as_deref(), Some("Acme"));
        assert_eq!(updated.name, "Al");

        db.update_note(
            &x,
            &NotePatch {
                id: Some("Y".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!db.note_exists(&x).unwrap());
        assert_eq!(db.get_note("Y").unwrap().company.as_deref(), Some("Acme"));
    }

    #[test]
    fn concurrent_creates_with_same_id_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");
        drop(Database::open_at(&path).unwrap());

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut db = Database::open_at(&path).unwrap();
                    let mut input = note("same", "Racer");
                    input.phone = format!("{i}");
                    barrier.wait();
                    db.create_note(&input)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(StoreError::Conflict(_))))
                .count(),
            1
        );
    }

    #[test]
    fn concurrent_rename_and_create_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");
        Database::open_at(&path)
            .unwrap()
            .create_note(&note("src", "Src"))
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));

        let rename = {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut db = Database::open_at(&path).unwrap();
                barrier.wait();
                db.update_note(
                    "src",
                    &NotePatch {
                        id: Some("target".into()),
                        ..Default::default()
                    },
                )
                .map(|_| ())
            })
        };
        let create = {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut db = Database::open_at(&path).unwrap();
                barrier.wait();
                db.create_note(&note("target", "Fresh")).map(|_| ())
            })
        };

        let outcomes = [rename.join().unwrap(), create.join().unwrap()];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(StoreError::Conflict(_)))));

        let db = Database::open_at(&path).unwrap();
        assert!(db.note_exists("target").unwrap());
    }
}
