//! Category mapper: snapshot upstream categories and maintain the frozen
//! `(source, external_id) → internal_category_id` map.
//!
//! The map is monotonic. Once an internal id is assigned it survives every
//! later sync, so evidence and history keep pointing at stable categories.

use crate::db::BudgetDb;
use crate::error::AppResult;
use crate::ingest::client::{UpstreamCategory, UpstreamClient};

#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncReport {
    pub categories_seen: usize,
    pub categories_upserted: usize,
    pub maps_created: usize,
}

/// Apply one category snapshot: upsert external rows, then fill map gaps.
///
/// Mapping preference per external category:
/// 1. an existing map row (kept untouched),
/// 2. an internal category with the same name (case-insensitive),
/// 3. the singleton internal Holding category.
pub fn apply_category_snapshot(
    db: &BudgetDb,
    source: &str,
    categories: &[UpstreamCategory],
) -> AppResult<SyncReport> {
    db.with_transaction(|db| {
        let holding_id = db.ensure_holding_category()?;
        let mut upserted = 0usize;
        let mut maps_created = 0usize;

        for category in categories {
            db.upsert_external_category(
                source,
                &category.id,
                &category.name,
                None,
                category.hidden,
            )?;
            upserted += 1;

            if db.lookup_category_map(source, &category.id)?.is_some() {
                continue;
            }
            let target = db
                .find_internal_category_by_name(&category.name)?
                .unwrap_or(holding_id);
            if db.insert_category_map_if_absent(source, &category.id, target)? {
                maps_created += 1;
            }
        }

        Ok(SyncReport {
            categories_seen: categories.len(),
            categories_upserted: upserted,
            maps_created,
        })
    })
}

/// Fetch the upstream category list and apply it.
pub async fn sync_categories(
    db: &BudgetDb,
    client: &UpstreamClient,
    source: &str,
) -> AppResult<SyncReport> {
    let categories = client.fetch_categories().await?;
    let report = apply_category_snapshot(db, source, &categories)?;
    log::info!(
        "Category sync ({source}): {} seen, {} mapped",
        report.categories_seen,
        report.maps_created
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    fn cat(id: &str, name: &str) -> UpstreamCategory {
        UpstreamCategory {
            id: id.to_string(),
            name: name.to_string(),
            group_name: None,
            hidden: false,
        }
    }

    #[test]
    fn test_unknowns_route_to_holding() {
        let db = test_db();
        let report =
            apply_category_snapshot(&db, "upstream", &[cat("c1", "Obscure")]).expect("sync");
        assert_eq!(report.maps_created, 1);

        let holding = db.ensure_holding_category().expect("holding");
        assert_eq!(
            db.lookup_category_map("upstream", "c1").expect("map"),
            Some(holding)
        );
    }

    #[test]
    fn test_name_match_wins_over_holding() {
        let db = test_db();
        db.conn_ref()
            .execute(
                "INSERT INTO categories (name, source) VALUES ('Groceries', 'internal')",
                [],
            )
            .expect("internal category");
        let groceries: i64 = db
            .conn_ref()
            .query_row("SELECT id FROM categories WHERE name = 'Groceries'", [], |r| r.get(0))
            .expect("id");

        apply_category_snapshot(&db, "upstream", &[cat("c2", "groceries")]).expect("sync");
        assert_eq!(
            db.lookup_category_map("upstream", "c2").expect("map"),
            Some(groceries)
        );
    }

    #[test]
    fn test_sync_is_monotonic() {
        let db = test_db();
        apply_category_snapshot(&db, "upstream", &[cat("c3", "Dining")]).expect("first");
        let assigned = db.lookup_category_map("upstream", "c3").expect("map").expect("mapped");

        // An internal category matching the name appears later; the
        // existing assignment must not move.
        db.conn_ref()
            .execute(
                "INSERT INTO categories (name, source) VALUES ('Dining', 'internal')",
                [],
            )
            .expect("late internal");
        let report = apply_category_snapshot(&db, "upstream", &[cat("c3", "Dining")]).expect("second");
        assert_eq!(report.maps_created, 0);
        assert_eq!(
            db.lookup_category_map("upstream", "c3").expect("map"),
            Some(assigned)
        );
    }

    #[test]
    fn test_snapshot_refreshes_external_rows() {
        let db = test_db();
        apply_category_snapshot(&db, "upstream", &[cat("c4", "Old Name")]).expect("first");
        apply_category_snapshot(
            &db,
            "upstream",
            &[UpstreamCategory {
                id: "c4".into(),
                name: "New Name".into(),
                group_name: None,
                hidden: true,
            }],
        )
        .expect("second");

        let (name, archived): (String, i64) = db
            .conn_ref()
            .query_row(
                "SELECT name, is_archived FROM categories WHERE source = 'upstream' AND external_id = 'c4'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("row");
        assert_eq!(name, "New Name");
        assert_eq!(archived, 1);
    }
}
