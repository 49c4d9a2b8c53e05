// ==========================================
// 线索派单引擎 - 服务目录仓储
// ==========================================
// 用途: specialty_match_mode = category 时，服务名 → 类目映射
// 存储: 服务名统一小写去空白后作为主键
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct ServiceCatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ServiceCatalogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 登记服务名所属类目（已存在则覆盖）
    pub fn upsert(&self, service_name: &str, category: &str) -> RepositoryResult<()> {
        let key = normalize_key(service_name);
        if key.is_empty() {
            return Err(RepositoryError::FieldValueError {
                field: "service_name".to_string(),
                message: "服务名不能为空".to_string(),
            });
        }

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO service_catalog (service_name, category) VALUES (?1, ?2)
            ON CONFLICT(service_name) DO UPDATE SET category = excluded.category
            "#,
            params![key, normalize_key(category)],
        )?;
        Ok(())
    }

    pub fn category_of(&self, service_name: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let category = conn
            .query_row(
                "SELECT category FROM service_catalog WHERE service_name = ?1",
                params![normalize_key(service_name)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(category)
    }

    /// 读取完整目录（单次派单内只读一次）
    pub fn load_all(&self) -> RepositoryResult<HashMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT service_name, category FROM service_catalog")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut catalog = HashMap::new();
        for row in rows {
            let (name, category) = row?;
            catalog.insert(name, category);
        }
        Ok(catalog)
    }
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> ServiceCatalogRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ServiceCatalogRepository::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_upsert_and_lookup_is_case_insensitive() {
        let repo = setup();
        repo.upsert(" Plombier ", "Plomberie").unwrap();
        repo.upsert("chauffagiste", "plomberie").unwrap();
        repo.upsert("chauffagiste", "chauffage").unwrap();

        assert_eq!(repo.category_of("PLOMBIER").unwrap().as_deref(), Some("plomberie"));
        assert_eq!(repo.category_of("chauffagiste").unwrap().as_deref(), Some("chauffage"));
        assert_eq!(repo.category_of("couvreur").unwrap(), None);
        assert_eq!(repo.load_all().unwrap().len(), 2);
        assert!(repo.upsert("  ", "x").is_err());
    }
}
