//! Category snapshots, the frozen external→internal map, and the
//! questionnaire alias vocabulary.

use rusqlite::{params, OptionalExtension};

use super::{BudgetDb, DbCategory};
use crate::error::AppResult;

/// Name of the internal fallback category unmapped externals route to.
pub const HOLDING_CATEGORY: &str = "Holding";

impl BudgetDb {
    /// Find or create the singleton internal "Holding" category.
    pub fn ensure_holding_category(&self) -> AppResult<i64> {
        let existing: Option<i64> = self
            .conn_ref()
            .query_row(
                "SELECT id FROM categories
                 WHERE (source IS NULL OR source = 'internal') AND name = ?1",
                params![HOLDING_CATEGORY],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn_ref().execute(
            "INSERT INTO categories (name, parent_id, is_archived, source, external_id)
             VALUES (?1, NULL, 0, 'internal', NULL)",
            params![HOLDING_CATEGORY],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    /// Upsert an external category snapshot row keyed by (source, external_id).
    /// Returns the local row id.
    pub fn upsert_external_category(
        &self,
        source: &str,
        external_id: &str,
        name: &str,
        parent_id: Option<i64>,
        is_archived: bool,
    ) -> AppResult<i64> {
        let existing: Option<i64> = self
            .conn_ref()
            .query_row(
                "SELECT id FROM categories WHERE source = ?1 AND external_id = ?2",
                params![source, external_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            self.conn_ref().execute(
                "UPDATE categories SET name = ?1, parent_id = ?2, is_archived = ?3 WHERE id = ?4",
                params![name, parent_id, is_archived as i64, id],
            )?;
            return Ok(id);
        }
        self.conn_ref().execute(
            "INSERT INTO categories (name, parent_id, is_archived, source, external_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, parent_id, is_archived as i64, source, external_id],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    /// Internal category with a matching name, case-insensitive.
    pub fn find_internal_category_by_name(&self, name: &str) -> AppResult<Option<i64>> {
        let id = self
            .conn_ref()
            .query_row(
                "SELECT id FROM categories
                 WHERE (source IS NULL OR source = 'internal') AND LOWER(name) = LOWER(?1)",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Look up the frozen mapping for (source, external_id).
    pub fn lookup_category_map(&self, source: &str, external_id: &str) -> AppResult<Option<i64>> {
        let id = self
            .conn_ref()
            .query_row(
                "SELECT internal_category_id FROM category_map
                 WHERE source = ?1 AND external_id = ?2",
                params![source, external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Record a mapping if none exists. Existing mappings are never
    /// rewritten; the map is monotonic across syncs. Returns true when a
    /// new row was created.
    pub fn insert_category_map_if_absent(
        &self,
        source: &str,
        external_id: &str,
        internal_category_id: i64,
    ) -> AppResult<bool> {
        if self.lookup_category_map(source, external_id)?.is_some() {
            return Ok(false);
        }
        self.conn_ref().execute(
            "INSERT INTO category_map (source, external_id, internal_category_id)
             VALUES (?1, ?2, ?3)",
            params![source, external_id, internal_category_id],
        )?;
        Ok(true)
    }

    pub fn get_category(&self, id: i64) -> AppResult<Option<DbCategory>> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT id, name, parent_id, is_archived, source, external_id
                 FROM categories WHERE id = ?1",
                params![id],
                |row| {
                    Ok(DbCategory {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        parent_id: row.get(2)?,
                        is_archived: row.get::<_, i64>(3)? == 1,
                        source: row.get(4)?,
                        external_id: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Resolve a plain-language category term: alias table first, then an
    /// exact case-insensitive category name.
    pub fn resolve_category_term(&self, term: &str) -> AppResult<Option<i64>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(None);
        }
        let via_alias: Option<i64> = self
            .conn_ref()
            .query_row(
                "SELECT category_id FROM question_category_alias WHERE LOWER(alias) = LOWER(?1)",
                params![term],
                |row| row.get(0),
            )
            .optional()?;
        if via_alias.is_some() {
            return Ok(via_alias);
        }
        let by_name: Option<i64> = self
            .conn_ref()
            .query_row(
                "SELECT id FROM categories WHERE LOWER(name) = LOWER(?1)",
                params![term],
                |row| row.get(0),
            )
            .optional()?;
        Ok(by_name)
    }

    pub fn upsert_category_alias(&self, alias: &str, category_id: i64) -> AppResult<()> {
        self.conn_ref().execute(
            "INSERT INTO question_category_alias (alias, category_id) VALUES (?1, ?2)
             ON CONFLICT(alias) DO UPDATE SET category_id = excluded.category_id",
            params![alias, category_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_holding_category_is_singleton() {
        let db = test_db();
        let a = db.ensure_holding_category().expect("first");
        let b = db.ensure_holding_category().expect("second");
        assert_eq!(a, b);
    }

    #[test]
    fn test_category_map_is_monotonic() {
        let db = test_db();
        let holding = db.ensure_holding_category().expect("holding");
        let other = db
            .upsert_external_category("upstream", "grp-1", "Groceries", None, false)
            .expect("external");

        assert!(db
            .insert_category_map_if_absent("upstream", "cat-1", holding)
            .expect("create"));
        // Second insert with a different target must not rewrite
        assert!(!db
            .insert_category_map_if_absent("upstream", "cat-1", other)
            .expect("keep"));
        assert_eq!(
            db.lookup_category_map("upstream", "cat-1").expect("lookup"),
            Some(holding)
        );
    }

    #[test]
    fn test_upsert_external_category_refreshes_fields() {
        let db = test_db();
        let id = db
            .upsert_external_category("upstream", "c9", "Dining", None, false)
            .expect("insert");
        let same = db
            .upsert_external_category("upstream", "c9", "Dining Out", None, true)
            .expect("update");
        assert_eq!(id, same);
        let cat = db.get_category(id).expect("get").expect("present");
        assert_eq!(cat.name, "Dining Out");
        assert!(cat.is_archived);
    }

    #[test]
    fn test_resolve_category_term() {
        let db = test_db();
        let holding = db.ensure_holding_category().expect("holding");
        db.upsert_category_alias("housing", holding).expect("alias");

        assert_eq!(db.resolve_category_term("Housing").expect("alias hit"), Some(holding));
        assert_eq!(db.resolve_category_term("holding").expect("name hit"), Some(holding));
        assert_eq!(db.resolve_category_term("unknown").expect("miss"), None);
        assert_eq!(db.resolve_category_term("  ").expect("blank"), None);
    }

    #[test]
    fn test_find_internal_by_name_ignores_external() {
        let db = test_db();
        db.upsert_external_category("upstream", "x", "Transport", None, false)
            .expect("external");
        assert_eq!(
            db.find_internal_category_by_name("Transport").expect("query"),
            None,
            "external snapshot rows must not match internal lookup"
        );
    }
}
