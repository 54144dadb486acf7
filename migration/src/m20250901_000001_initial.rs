use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

const POSTGRES_SQL: &str = include_str!("../../migrations/postgres/20250901000001_initial.sql");
const SQLITE_SQL: &str = include_str!("../../migrations/sqlite/20250901000001_initial.sql");

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Column types differ enough between the two backends (BIGSERIAL vs
        // INTEGER PRIMARY KEY AUTOINCREMENT) that each gets its own DDL file.
        let sql = match manager.get_database_backend() {
            DatabaseBackend::Postgres => POSTGRES_SQL,
            DatabaseBackend::Sqlite => SQLITE_SQL,
            DatabaseBackend::MySql => {
                return Err(DbErr::Migration("MySQL is not supported".to_string()));
            }
        };

        let conn = manager.get_connection();
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            conn.execute_unprepared(statement).await?;
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let conn = manager.get_connection();
        for table in ["balance_transactions", "codes", "orders", "users", "products"] {
            conn.execute_unprepared(&format!("DROP TABLE IF EXISTS {table}"))
                .await?;
        }
        Ok(())
    }
}
