//! Document and folder CRUD operations.

use rusqlite::{Connection, OptionalExtension, params};

use super::Database;
use super::models::{Document, Folder};
use crate::error::{DatabaseError, ServiceResult};

pub(super) fn load_tags(conn: &Connection, document_id: &str) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn
        .prepare("SELECT tag FROM document_tags WHERE document_id = ?1 ORDER BY tag")
        .map_err(DatabaseError::Query)?;
    let tags: Vec<String> = stmt
        .query_map(params![document_id], |row| row.get(0))
        .map_err(DatabaseError::Query)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(tags)
}

impl Database {
    /// Insert a new document
    pub fn insert_document(&self, doc: &Document) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        let artifacts_json = doc
            .artifacts
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(DatabaseError::Serialization)?;

        conn.execute(
            r#"
            INSERT INTO documents (id, org_id, folder_id, name, mime_type, size_bytes, status, extracted_text, page_count, category, category_confidence, thumbnail_key, artifacts, search_version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                doc.id,
                doc.org_id,
                doc.folder_id,
                doc.name,
                doc.mime_type,
                doc.size_bytes,
                doc.status.as_str(),
                doc.extracted_text,
                doc.page_count,
                doc.category,
                doc.category_confidence,
                doc.thumbnail_key,
                artifacts_json,
                doc.search_version,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        // Insert tags
        for tag in &doc.tags {
            conn.execute(
                "INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?1, ?2)",
                params![doc.id, tag],
            )
            .map_err(DatabaseError::Query)?;
        }

        Ok(())
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        let doc = conn
            .query_row(
                "SELECT d.id, d.org_id, d.folder_id, d.name, d.mime_type, d.size_bytes, d.status, \
                 d.extracted_text, d.page_count, d.category, d.category_confidence, d.thumbnail_key, \
                 d.artifacts, d.search_version, d.created_at, d.updated_at \
                 FROM documents d WHERE d.id = ?1",
                params![id],
                |row| Document::from_row(row, vec![]),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        if let Some(mut doc) = doc {
            doc.tags = load_tags(&conn, id)?;
            Ok(Some(doc))
        } else {
            Ok(None)
        }
    }

    /// Replace a document's tag set
    pub fn set_document_tags(&self, document_id: &str, tags: &[String]) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "DELETE FROM document_tags WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(DatabaseError::Query)?;

        for tag in tags {
            conn.execute(
                "INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?1, ?2)",
                params![document_id, tag],
            )
            .map_err(DatabaseError::Query)?;
        }

        Ok(())
    }

    /// Insert a new folder
    pub fn insert_folder(&self, folder: &Folder) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO folders (id, org_id, parent_id, name, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                folder.id,
                folder.org_id,
                folder.parent_id,
                folder.name,
                folder.created_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a folder by ID
    pub fn get_folder(&self, id: &str) -> ServiceResult<Option<Folder>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT id, org_id, parent_id, name, created_at FROM folders WHERE id = ?1",
            params![id],
            |row| Folder::from_row(row),
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// All folder IDs in the subtree rooted at the given folder, root included.
    /// Returns an empty list when the folder does not exist in the org.
    pub fn folder_subtree_ids(&self, org_id: &str, folder_id: &str) -> ServiceResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                r#"
                WITH RECURSIVE subtree(id) AS (
                    SELECT id FROM folders WHERE id = ?1 AND org_id = ?2
                    UNION ALL
                    SELECT f.id FROM folders f JOIN subtree s ON f.parent_id = s.id
                )
                SELECT id FROM subtree
                "#,
            )
            .map_err(DatabaseError::Query)?;

        let ids: Vec<String> = stmt
            .query_map(params![folder_id, org_id], |row| row.get(0))
            .map_err(DatabaseError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::super::test_support::sample_document;
    use super::*;

    #[test]
    fn test_insert_and_get_document() {
        let db = Database::open_in_memory().unwrap();
        let mut doc = sample_document("doc-1", "org-1");
        doc.tags = vec!["invoice".to_string(), "2024".to_string()];
        db.insert_document(&doc).unwrap();

        let loaded = db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(loaded.name, "doc-1.pdf");
        assert_eq!(loaded.org_id, "org-1");
        assert_eq!(loaded.search_version, 0);
        assert_eq!(loaded.tags, vec!["2024".to_string(), "invoice".to_string()]);

        assert!(db.get_document("missing").unwrap().is_none());
    }

    #[test]
    fn test_folder_subtree_ids() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for (id, parent) in [
            ("root", None),
            ("child-a", Some("root")),
            ("child-b", Some("root")),
            ("grandchild", Some("child-a")),
            ("other", None),
        ] {
            db.insert_folder(&Folder {
                id: id.to_string(),
                org_id: "org-1".to_string(),
                parent_id: parent.map(|p| p.to_string()),
                name: id.to_string(),
                created_at: now,
            })
            .unwrap();
        }

        let mut ids = db.folder_subtree_ids("org-1", "root").unwrap();
        ids.sort();
        assert_eq!(ids, vec!["child-a", "child-b", "grandchild", "root"]);

        let leaf = db.folder_subtree_ids("org-1", "grandchild").unwrap();
        assert_eq!(leaf, vec!["grandchild"]);

        assert!(db.folder_subtree_ids("org-2", "root").unwrap().is_empty());
        assert!(db.folder_subtree_ids("org-1", "missing").unwrap().is_empty());
    }
}
