// Versioned weight-profile registry persisted in LMDB
use anyhow::Context;
use dealsim_core::{Error, Result};
use dealsim_similarity::{
    ProfileKey, ProfileSource, ResolvedProfile, SimilarityContext, WeightProfile, WeightResolver,
};
use heed::{Database, Env, EnvOpenOptions};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const DB_PROFILES: &str = "weight_profiles";
const DB_ACTIVE: &str = "active_profiles";
const MAP_SIZE: usize = 1024 * 1024 * 1024;

type Snapshot = HashMap<ProfileKey, Arc<WeightProfile>>;

fn version_key(key: &ProfileKey, version: u64) -> String {
    // zero padded so versions of one key sort numerically
    format!("{}#{:010}", key.storage_key(), version)
}

fn storage_err(e: anyhow::Error) -> Error {
    Error::Storage(format!("{e:#}"))
}

/// Every published profile version is kept; the active set is an immutable
/// snapshot swapped as a whole on publish or rollback.
pub struct WeightRegistry {
    env: Arc<Env>,
    profiles_db: Database<heed::types::Str, heed::types::Bytes>,
    active_db: Database<heed::types::Str, heed::types::Bytes>,
    active: RwLock<Arc<Snapshot>>,
    publish_lock: Mutex<()>,
}

impl WeightRegistry {
    /// Open (or create) the registry, seeding the context presets as
    /// version 1 on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path.as_ref()).map_err(storage_err)
    }

    fn open_inner(path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path)?;

        let env = Arc::new(unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(4)
                .open(path)
                .with_context(|| format!("opening LMDB environment at {}", path.display()))?
        });

        let mut wtxn = env.write_txn()?;
        let profiles_db = env.create_database(&mut wtxn, Some(DB_PROFILES))?;
        let active_db = env.create_database(&mut wtxn, Some(DB_ACTIVE))?;
        wtxn.commit()?;

        let registry = Self {
            env,
            profiles_db,
            active_db,
            active: RwLock::new(Arc::new(HashMap::new())),
            publish_lock: Mutex::new(()),
        };
        registry.seed_presets()?;
        let snapshot = registry.load_active()?;
        info!("Weight registry opened with {} active profiles", snapshot.len());
        *registry.active.write() = Arc::new(snapshot);
        Ok(registry)
    }

    fn seed_presets(&self) -> anyhow::Result<()> {
        let mut wtxn = self.env.write_txn()?;
        for preset in WeightProfile::presets() {
            let pointer = preset.key.storage_key();
            if self.active_db.get(&wtxn, &pointer)?.is_none() {
                let data = bincode::serialize(&preset)?;
                self.profiles_db.put(&mut wtxn, &version_key(&preset.key, preset.version), &data)?;
                self.active_db.put(&mut wtxn, &pointer, &bincode::serialize(&preset.version)?)?;
            }
        }
        wtxn.commit()?;
        Ok(())
    }

    fn load_active(&self) -> anyhow::Result<Snapshot> {
        let rtxn = self.env.read_txn()?;
        let mut snapshot = HashMap::new();
        for entry in self.active_db.iter(&rtxn)? {
            let (pointer, data) = entry?;
            let key: ProfileKey = match pointer.parse() {
                Ok(key) => key,
                Err(e) => {
                    warn!("Ignoring active profile pointer '{}': {}", pointer, e);
                    continue;
                }
            };
            let version: u64 = bincode::deserialize(data)?;
            let bytes = self
                .profiles_db
                .get(&rtxn, &version_key(&key, version))?
                .with_context(|| format!("active profile {key} v{version} is missing"))?;
            let profile: WeightProfile = bincode::deserialize(bytes)?;
            snapshot.insert(key, Arc::new(profile));
        }
        Ok(snapshot)
    }

    /// The active snapshot; callers hold it for a whole request.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.active.read())
    }

    pub fn current(&self, key: &ProfileKey) -> Option<Arc<WeightProfile>> {
        self.active.read().get(key).cloned()
    }

    /// Personalized profile, then context preset, then `default`.
    pub fn resolve(self: &Arc<Self>, context: SimilarityContext, caller: Option<&str>) -> ResolvedProfile {
        WeightResolver::new(Arc::clone(self) as Arc<dyn ProfileSource>).resolve(context, caller)
    }

    /// Publish new weights for `key` as the next version and make it active.
    pub fn publish(&self, key: &ProfileKey, w_struct: f32, w_text: f32) -> Result<Arc<WeightProfile>> {
        let _guard = self.publish_lock.lock();
        let next = self.latest_version(key).map_err(storage_err)? + 1;
        let profile = WeightProfile::new(key.clone(), w_struct, w_text, next)?;

        self.write_active(&profile, true).map_err(storage_err)?;
        let profile = Arc::new(profile);
        self.swap(key, Arc::clone(&profile));
        info!(
            "Published weight profile {} (w_struct={:.3}, w_text={:.3})",
            profile.version_id(),
            w_struct,
            w_text
        );
        Ok(profile)
    }

    /// Every stored version of `key`, oldest first.
    pub fn list_versions(&self, key: &ProfileKey) -> Result<Vec<WeightProfile>> {
        self.list_inner(key).map_err(storage_err)
    }

    fn list_inner(&self, key: &ProfileKey) -> anyhow::Result<Vec<WeightProfile>> {
        let storage_key = key.storage_key();
        let prefix = format!("{storage_key}#");
        let rtxn = self.env.read_txn()?;
        let mut versions = Vec::new();
        for entry in self.profiles_db.prefix_iter(&rtxn, &prefix)? {
            let (k, data) = entry?;
            // the prefix alone also matches callers whose id extends this one
            if k.rsplit_once('#').map(|(owner, _)| owner) != Some(storage_key.as_str()) {
                continue;
            }
            versions.push(bincode::deserialize::<WeightProfile>(data)?);
        }
        versions.sort_by_key(|p| p.version);
        Ok(versions)
    }

    fn latest_version(&self, key: &ProfileKey) -> anyhow::Result<u64> {
        Ok(self.list_inner(key)?.last().map(|p| p.version).unwrap_or(0))
    }

    /// Point `key` back at an existing version. Nothing is deleted.
    pub fn rollback(&self, key: &ProfileKey, version: u64) -> Result<Arc<WeightProfile>> {
        let _guard = self.publish_lock.lock();
        let stored = {
            let rtxn = self.env.read_txn().map_err(|e| Error::Storage(e.to_string()))?;
            let bytes = self
                .profiles_db
                .get(&rtxn, &version_key(key, version))
                .map_err(|e| Error::Storage(e.to_string()))?;
            match bytes {
                Some(bytes) => bincode::deserialize::<WeightProfile>(bytes)
                    .map_err(|e| Error::Serialization(e.to_string()))?,
                None => return Err(Error::ProfileNotFound(format!("{key} v{version}"))),
            }
        };

        self.write_active(&stored, false).map_err(storage_err)?;
        let profile = Arc::new(stored);
        self.swap(key, Arc::clone(&profile));
        info!("Rolled back weight profile {} to v{}", key, version);
        Ok(profile)
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    fn write_active(&self, profile: &WeightProfile, store_profile: bool) -> anyhow::Result<()> {
        let mut wtxn = self.env.write_txn()?;
        if store_profile {
            let data = bincode::serialize(profile)?;
            self.profiles_db
                .put(&mut wtxn, &version_key(&profile.key, profile.version), &data)?;
        }
        self.active_db
            .put(&mut wtxn, &profile.key.storage_key(), &bincode::serialize(&profile.version)?)?;
        wtxn.commit()?;
        Ok(())
    }

    fn swap(&self, key: &ProfileKey, profile: Arc<WeightProfile>) {
        let mut active = self.active.write();
        let mut next: Snapshot = (**active).clone();
        next.insert(key.clone(), profile);
        *active = Arc::new(next);
    }
}

impl ProfileSource for WeightRegistry {
    fn active(&self, key: &ProfileKey) -> Result<Option<Arc<WeightProfile>>> {
        Ok(self.current(key))
    }
}
