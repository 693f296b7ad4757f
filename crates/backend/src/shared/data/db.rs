use once_cell::sync::OnceCell;
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement};

static DB_CONN: OnceCell<DatabaseConnection> = OnceCell::new();

/// Таблицы конфигурации KPI: (имя, DDL)
const KPI_TABLES: &[(&str, &str)] = &[
    (
        "a025_kpi_source",
        r#"
        CREATE TABLE a025_kpi_source (
            id TEXT PRIMARY KEY NOT NULL,
            owner_id TEXT,
            code TEXT NOT NULL,
            description TEXT NOT NULL,
            comment TEXT,
            is_template INTEGER NOT NULL DEFAULT 0,
            entity TEXT NOT NULL,
            default_date_field TEXT,
            base_filters_json TEXT NOT NULL DEFAULT '{}',
            extra_config_json TEXT NOT NULL DEFAULT '{}',
            fields_json TEXT NOT NULL DEFAULT '[]',
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            version INTEGER NOT NULL DEFAULT 0
        );
        "#,
    ),
    (
        "a026_kpi_metric",
        r#"
        CREATE TABLE a026_kpi_metric (
            id TEXT PRIMARY KEY NOT NULL,
            owner_id TEXT,
            code TEXT NOT NULL,
            description TEXT NOT NULL,
            comment TEXT,
            is_template INTEGER NOT NULL DEFAULT 0,
            source_id TEXT NOT NULL,
            aggregation TEXT NOT NULL,
            value_field_id TEXT,
            date_field_id TEXT,
            time_window TEXT NOT NULL DEFAULT 'this_month',
            custom_start TEXT,
            custom_end TEXT,
            compare_against_previous INTEGER NOT NULL DEFAULT 0,
            extra_config_json TEXT NOT NULL DEFAULT '{}',
            sort_order INTEGER NOT NULL DEFAULT 0,
            filters_json TEXT NOT NULL DEFAULT '[]',
            dimensions_json TEXT NOT NULL DEFAULT '[]',
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            version INTEGER NOT NULL DEFAULT 0
        );
        "#,
    ),
    (
        "a027_kpi_definition",
        r#"
        CREATE TABLE a027_kpi_definition (
            id TEXT PRIMARY KEY NOT NULL,
            owner_id TEXT,
            code TEXT NOT NULL,
            description TEXT NOT NULL,
            comment TEXT,
            is_template INTEGER NOT NULL DEFAULT 0,
            calculation_type TEXT NOT NULL DEFAULT 'metric',
            metric_id TEXT,
            expression TEXT,
            format_type TEXT NOT NULL DEFAULT 'value',
            baseline_metric_id TEXT,
            extra_config_json TEXT NOT NULL DEFAULT '{}',
            components_json TEXT NOT NULL DEFAULT '[]',
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            version INTEGER NOT NULL DEFAULT 0
        );
        "#,
    ),
    (
        "a028_kpi_dashboard",
        r#"
        CREATE TABLE a028_kpi_dashboard (
            id TEXT PRIMARY KEY NOT NULL,
            owner_id TEXT,
            code TEXT NOT NULL,
            description TEXT NOT NULL,
            comment TEXT,
            is_template INTEGER NOT NULL DEFAULT 0,
            is_default INTEGER NOT NULL DEFAULT 0,
            layout_json TEXT NOT NULL DEFAULT '{}',
            widgets_json TEXT NOT NULL DEFAULT '[]',
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            version INTEGER NOT NULL DEFAULT 0
        );
        "#,
    ),
];

pub async fn initialize_database(db_path: Option<&str>) -> anyhow::Result<()> {
    let db_file = db_path.unwrap_or("target/db/app.db");
    if let Some(parent) = std::path::Path::new(db_file).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let absolute_path = if std::path::Path::new(db_file).is_absolute() {
        std::path::PathBuf::from(db_file)
    } else {
        std::env::current_dir()?.join(db_file)
    };
    // Normalize path separators and ensure proper URL form on Windows
    let normalized = absolute_path.to_string_lossy().replace('\\', "/");
    let needs_leading_slash = !normalized.starts_with('/') && normalized.contains(':');
    let prefix = if needs_leading_slash { "/" } else { "" };
    let db_url = format!("sqlite://{}{}?mode=rwc", prefix, normalized);
    let conn = Database::connect(&db_url).await?;

    bootstrap_schema(&conn).await?;

    DB_CONN
        .set(conn)
        .map_err(|_| anyhow::anyhow!("Failed to set DB_CONN"))?;
    Ok(())
}

/// Создать отсутствующие таблицы KPI (минимальный bootstrap схемы)
pub async fn bootstrap_schema(conn: &DatabaseConnection) -> anyhow::Result<()> {
    for (table, ddl) in KPI_TABLES {
        let check = format!(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='{}';",
            table
        );
        let existing = conn
            .query_all(Statement::from_string(DatabaseBackend::Sqlite, check))
            .await?;

        if existing.is_empty() {
            tracing::info!("Creating {} table", table);
            conn.execute(Statement::from_string(
                DatabaseBackend::Sqlite,
                ddl.to_string(),
            ))
            .await?;
        }
    }
    Ok(())
}

pub fn get_connection() -> anyhow::Result<&'static DatabaseConnection> {
    DB_CONN
        .get()
        .ok_or_else(|| anyhow::anyhow!("Database connection has not been initialized"))
}

/// Отдельное in-memory подключение со схемой KPI для тестов
#[cfg(test)]
pub async fn memory_connection() -> DatabaseConnection {
    let mut options = sea_orm::ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1);
    let conn = Database::connect(options).await.unwrap();
    bootstrap_schema(&conn).await.unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let conn = memory_connection().await;
        bootstrap_schema(&conn).await.unwrap();

        let rows = conn
            .query_all(Statement::from_string(
                DatabaseBackend::Sqlite,
                "SELECT name FROM sqlite_master WHERE type='table' AND name LIKE 'a02%_kpi_%' ORDER BY name;"
                    .to_string(),
            ))
            .await
            .unwrap();
        let names: Vec<String> = rows
            .iter()
            .map(|r| r.try_get::<String>("", "name").unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["a025_kpi_source", "a026_kpi_metric", "a027_kpi_definition", "a028_kpi_dashboard"]
        );
    }
}
