//! Component repository
//!
//! Components are consumed by analytics rather than managed by it; the only
//! writes are the lifetime usage counter and an insert used for seeding.

use crate::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use stackpulse_analytics_core::Component;

const COMPONENT_COLUMNS: &str = "c.id, c.name, c.author_id, c.category, c.framework, \
     c.is_public, c.is_featured, c.usage_count, c.rating, c.performance_score, \
     c.accessibility_score, c.created_at, c.updated_at";

/// Filter applied to component listings and cross-component stat fetches
#[derive(Debug, Clone, Default)]
pub struct ComponentFilter {
    /// Match any of these categories (empty = all)
    pub categories: Vec<String>,
    /// Match any of these frameworks (empty = all)
    pub frameworks: Vec<String>,
    /// Restrict to these component ids
    pub component_ids: Option<Vec<String>>,
    /// Only components visible to this caller (public, or authored by them).
    /// `None` means public components only.
    pub viewer: Option<String>,
    /// Skip the visibility check entirely
    pub include_private: bool,
}

impl ComponentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_frameworks(mut self, frameworks: Vec<String>) -> Self {
        self.frameworks = frameworks;
        self
    }

    pub fn with_component_ids(mut self, ids: Vec<String>) -> Self {
        self.component_ids = Some(ids);
        self
    }

    pub fn with_viewer(mut self, viewer: Option<String>) -> Self {
        self.viewer = viewer;
        self
    }

    pub fn including_private(mut self) -> Self {
        self.include_private = true;
        self
    }

    /// Render as SQL conditions over the `c` alias, with positional params
    pub(crate) fn to_sql(&self) -> (Vec<String>, Vec<String>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        let mut any_of = |column: &str, items: &[String], clauses: &mut Vec<String>| {
            let placeholders = vec!["?"; items.len()].join(", ");
            clauses.push(format!("c.{} IN ({})", column, placeholders));
            values.extend(items.iter().cloned());
        };

        if !self.categories.is_empty() {
            any_of("category", &self.categories, &mut clauses);
        }
        if !self.frameworks.is_empty() {
            any_of("framework", &self.frameworks, &mut clauses);
        }
        if let Some(ids) = &self.component_ids {
            if ids.is_empty() {
                clauses.push("0".to_string());
            } else {
                any_of("id", ids, &mut clauses);
            }
        }

        if !self.include_private {
            match &self.viewer {
                Some(viewer) => {
                    clauses.push("(c.is_public = 1 OR c.author_id = ?)".to_string());
                    values.push(viewer.clone());
                }
                None => clauses.push("c.is_public = 1".to_string()),
            }
        }

        (clauses, values)
    }
}

fn row_to_component(row: &Row<'_>) -> rusqlite::Result<Component> {
    Ok(Component {
        id: row.get(0)?,
        name: row.get(1)?,
        author_id: row.get(2)?,
        category: row.get(3)?,
        framework: row.get(4)?,
        is_public: row.get(5)?,
        is_featured: row.get(6)?,
        usage_count: row.get(7)?,
        rating: row.get(8)?,
        performance_score: row.get(9)?,
        accessibility_score: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Load a component by id
pub fn get_component(conn: &Connection, id: &str) -> Result<Option<Component>> {
    let component = conn
        .query_row(
            &format!("SELECT {} FROM components c WHERE c.id = ?1", COMPONENT_COLUMNS),
            params![id],
            row_to_component,
        )
        .optional()?;
    Ok(component)
}

/// List components matching a filter, ordered by id
pub fn list_components(conn: &Connection, filter: &ComponentFilter) -> Result<Vec<Component>> {
    let (clauses, values) = filter.to_sql();
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM components c {} ORDER BY c.id",
        COMPONENT_COLUMNS, where_sql
    ))?;
    let components = stmt
        .query_map(params_from_iter(values.iter()), row_to_component)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    tracing::debug!(count = components.len(), "Listed components");
    Ok(components)
}

/// Insert (or replace) a component row
pub fn insert_component(conn: &Connection, component: &Component) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO components (
            id, name, author_id, category, framework, is_public, is_featured,
            usage_count, rating, performance_score, accessibility_score, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            component.id,
            component.name,
            component.author_id,
            component.category,
            component.framework,
            component.is_public,
            component.is_featured,
            component.usage_count,
            component.rating,
            component.performance_score,
            component.accessibility_score,
            component.created_at,
            component.updated_at,
        ],
    )?;
    Ok(())
}

/// Increment the lifetime usage counter, returning the new value
pub fn increment_usage_count(conn: &Connection, id: &str) -> Result<i64> {
    let count = conn
        .query_row(
            "UPDATE components SET usage_count = usage_count + 1 WHERE id = ?1 RETURNING usage_count",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    count.ok_or_else(|| stackpulse_analytics_core::AnalyticsError::ComponentNotFound(id.to_string()))
}
