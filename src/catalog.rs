//! Keeps stored definitions in step with a JSON catalog of named searches
//! (`SEARCHES_FILE`). Names are the join key; unnamed definitions are never
//! touched.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use sqlx::SqlitePool;
use tracing::info;

use crate::db::repo;
use crate::error::{AppError, Result};
use crate::search::{SearchDefinition, SearchSpec};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub revised: usize,
    pub unchanged: usize,
    pub deactivated: usize,
}

pub async fn load_catalog(path: &Path) -> Result<Vec<SearchSpec>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Creates missing searches, revises changed ones and deactivates named
/// searches that left the catalog. The whole catalog is validated before
/// anything is written.
pub async fn sync_catalog(pool: &SqlitePool, specs: Vec<SearchSpec>) -> Result<SyncReport> {
    let mut names = HashSet::new();
    for spec in &specs {
        let name = catalog_name(spec)?;
        if !names.insert(name.to_string()) {
            return Err(AppError::InvalidDefinition(format!("duplicate catalog name {name:?}")));
        }
        spec.validate()?;
    }

    let active: HashMap<String, SearchDefinition> = repo::list_definitions(pool, true)
        .await?
        .into_iter()
        .filter_map(|d| Some((d.spec.name.as_deref()?.trim().to_string(), d)))
        .collect();

    let mut report = SyncReport::default();
    for spec in specs {
        let name = catalog_name(&spec)?.to_string();
        match active.get(&name) {
            Some(current) if current.spec == spec => report.unchanged += 1,
            Some(current) => {
                repo::revise_definition(pool, current.id, spec).await?;
                report.revised += 1;
            }
            None => {
                repo::create_definition(pool, &spec).await?;
                report.created += 1;
            }
        }
    }

    for (name, def) in &active {
        if !names.contains(name) {
            repo::deactivate_definition(pool, def.id).await?;
            report.deactivated += 1;
        }
    }

    info!(
        created = report.created,
        revised = report.revised,
        unchanged = report.unchanged,
        deactivated = report.deactivated,
        "[CATALOG] sync complete: +{} created, ~{} revised, -{} deactivated, {} unchanged",
        report.created,
        report.revised,
        report.deactivated,
        report.unchanged,
    );
    Ok(report)
}

fn catalog_name(spec: &SearchSpec) -> Result<&str> {
    match spec.name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => Ok(n),
        _ => Err(AppError::InvalidDefinition(format!(
            "catalog entry {}-{} needs a name",
            spec.origin, spec.destination
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::tests::memory_pool;
    use crate::search::definition::tests::sample_spec;

    fn named(name: &str, destination: &str) -> SearchSpec {
        let mut spec = sample_spec();
        spec.name = Some(name.to_string());
        spec.destination = destination.to_string();
        spec
    }

    #[tokio::test]
    async fn first_sync_creates_everything_and_second_is_a_no_op() {
        let pool = memory_pool().await;
        let catalog = vec![named("london", "LHR"), named("paris", "CDG")];

        let first = sync_catalog(&pool, catalog.clone()).await.unwrap();
        assert_eq!(first.created, 2);

        let second = sync_catalog(&pool, catalog).await.unwrap();
        assert_eq!(second, SyncReport { unchanged: 2, ..Default::default() });
        assert_eq!(repo::list_definitions(&pool, true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn changed_and_removed_entries_are_revised_and_deactivated() {
        let pool = memory_pool().await;
        sync_catalog(&pool, vec![named("london", "LHR"), named("paris", "CDG")]).await.unwrap();

        let report = sync_catalog(&pool, vec![named("london", "LGW")]).await.unwrap();
        assert_eq!(report.revised, 1);
        assert_eq!(report.deactivated, 1);

        let active = repo::list_definitions(&pool, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].spec.destination, "LGW");
        assert_eq!(active[0].version, 2);
        assert_eq!(repo::list_definitions(&pool, false).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn bad_catalog_writes_nothing() {
        let pool = memory_pool().await;
        let dupes = vec![named("london", "LHR"), named("london", "LGW")];
        assert!(matches!(sync_catalog(&pool, dupes).await, Err(AppError::InvalidDefinition(_))));

        let mut unnamed = sample_spec();
        unnamed.name = None;
        let catalog = vec![named("paris", "CDG"), unnamed];
        assert!(sync_catalog(&pool, catalog).await.is_err());
        assert!(repo::list_definitions(&pool, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn catalog_file_parses() {
        let path = std::env::temp_dir().join(format!("sentinel-catalog-{}.json", std::process::id()));
        let json = serde_json::to_string(&vec![named("london", "LHR")]).unwrap();
        tokio::fs::write(&path, json).await.unwrap();
        let specs = load_catalog(&path).await.unwrap();
        assert_eq!(specs, vec![named("london", "LHR")]);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
