use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::config::EngineSettings;
use crate::engine::Engine;
use crate::limits::*;

/// Per-property engines. Each property gets its own Engine, WAL and compactor.
/// Property = database name from the pgwire connection.
pub struct PropertyManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    settings: EngineSettings,
}

impl PropertyManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, settings: EngineSettings) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            settings,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Get or lazily open the engine for `property`.
    pub fn get_or_create(&self, property: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(property) {
            return Ok(engine.value().clone());
        }
        if property.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "property name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many properties"));
        }

        // Keep the name usable as a file name inside data_dir
        let safe_name: String = property
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty property name",
            ));
        }

        // Two connections may race to open the same property; only one engine may own its WAL.
        let entry = self.engines.entry(property.to_string());
        let engine = match entry {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(wal_path, self.settings)?);
                v.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        tracing::info!("opened property {property}");
        metrics::gauge!(crate::observability::PROPERTIES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hotelier_test_property").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> PropertyManager {
        PropertyManager::new(dir, 1000, EngineSettings::default())
    }

    #[tokio::test]
    async fn properties_are_isolated() {
        let pm = manager(test_data_dir("isolation"));
        let seaside = pm.get_or_create("seaside").unwrap();
        let alpine = pm.get_or_create("alpine").unwrap();

        let rt = RoomType {
            id: Ulid::new(),
            name: "Double".into(),
            price: 90,
            max_adults: 2,
            max_children: 0,
            quantity: 1,
        };
        seaside.create_room_type(rt.clone()).await.unwrap();
        alpine.create_room_type(rt.clone()).await.unwrap();
        seaside
            .create_room(Ulid::new(), rt.id, "101".into(), true)
            .await
            .unwrap();
        // Same number in another property is fine.
        alpine
            .create_room(Ulid::new(), rt.id, "101".into(), true)
            .await
            .unwrap();

        assert_eq!(seaside.list_rooms(None).await.unwrap().len(), 1);
        assert_eq!(alpine.list_rooms(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lazy_creation_and_reuse() {
        let dir = test_data_dir("lazy");
        let pm = manager(dir.clone());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        let a = pm.get_or_create("my_hotel").unwrap();
        assert!(dir.join("my_hotel.wal").exists());
        let b = pm.get_or_create("my_hotel").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn names_are_sanitized_and_bounded() {
        let dir = test_data_dir("sanitize");
        let pm = manager(dir.clone());

        pm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        assert!(pm.get_or_create("../..").is_err());

        let err = pm
            .get_or_create(&"x".repeat(MAX_TENANT_NAME_LEN + 1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("property name too long"));
    }
}
