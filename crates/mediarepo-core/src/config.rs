//! Configuration module
//!
//! Configuration is read once from the process environment (a `.env` file is
//! honoured through dotenvy) and is immutable afterwards. Datastores are declared
//! by id in `DATASTORES`, each with a `DATASTORE_<ID>_TYPE` and any number of
//! `DATASTORE_<ID>_<OPTION>` variables; option names are lowercased.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::models::DatastoreConfig;
use crate::storage_types::DatastoreKind;

const ASYNC_UPLOAD_EXPIRY_SECS: u64 = 86_400;
const ASYNC_MAX_STALL_MS: u64 = 20_000;
const MAX_UPLOAD_SIZE_MB: u64 = 100;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: Option<String>,
    pub datastores: Vec<DatastoreConfig>,
    /// Datastore id new uploads land in
    pub upload_datastore: String,
    pub async_uploads_enabled: bool,
    /// How long a reservation may stay unused
    pub async_upload_expiry: Duration,
    /// Upper bound for how long a download may wait on a pending upload
    pub async_max_stall: Duration,
    /// 0 disables the check
    pub max_upload_size_bytes: u64,
    pub min_upload_size_bytes: u64,
    pub quota_enabled: bool,
    pub quota_max_bytes_per_user: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(env::vars())
    }

    /// Build a configuration from explicit variables instead of the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, anyhow::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let var = |key: &str| vars.get(key).cloned();

        let datastore_ids: Vec<String> = var("DATASTORES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut datastores = Vec::with_capacity(datastore_ids.len());
        for id in datastore_ids {
            let prefix = format!("DATASTORE_{}_", env_key(&id));
            let type_key = format!("{}TYPE", prefix);
            let kind: DatastoreKind = var(&type_key)
                .ok_or_else(|| anyhow::anyhow!("{} must be set for datastore {}", type_key, id))?
                .parse()?;

            let mut config = DatastoreConfig::new(id, kind);
            for (key, value) in &vars {
                if key == &type_key {
                    continue;
                }
                if let Some(option) = key.strip_prefix(&prefix) {
                    config.options.insert(option.to_lowercase(), value.clone());
                }
            }
            datastores.push(config);
        }

        let upload_datastore = var("UPLOAD_DATASTORE")
            .or_else(|| datastores.first().map(|d| d.id.clone()))
            .unwrap_or_default();

        let max_upload_size_mb = var("MAX_UPLOAD_SIZE_MB")
            .unwrap_or_else(|| MAX_UPLOAD_SIZE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_UPLOAD_SIZE_MB);

        let config = Config {
            database_url: var("DATABASE_URL").filter(|v| !v.is_empty()),
            datastores,
            upload_datastore,
            async_uploads_enabled: var("ASYNC_UPLOADS_ENABLED")
                .unwrap_or_else(|| "true".to_string())
                .parse()
                .unwrap_or(true),
            async_upload_expiry: Duration::from_secs(
                var("ASYNC_UPLOAD_EXPIRY_SECS")
                    .unwrap_or_else(|| ASYNC_UPLOAD_EXPIRY_SECS.to_string())
                    .parse()
                    .unwrap_or(ASYNC_UPLOAD_EXPIRY_SECS),
            ),
            async_max_stall: Duration::from_millis(
                var("ASYNC_MAX_STALL_MS")
                    .unwrap_or_else(|| ASYNC_MAX_STALL_MS.to_string())
                    .parse()
                    .unwrap_or(ASYNC_MAX_STALL_MS),
            ),
            max_upload_size_bytes: max_upload_size_mb.saturating_mul(1024 * 1024),
            min_upload_size_bytes: var("MIN_UPLOAD_SIZE_BYTES")
                .unwrap_or_else(|| "0".to_string())
                .parse()
                .unwrap_or(0),
            quota_enabled: var("QUOTA_ENABLED")
                .unwrap_or_else(|| "false".to_string())
                .parse()
                .unwrap_or(false),
            quota_max_bytes_per_user: var("QUOTA_MAX_BYTES_PER_USER")
                .unwrap_or_else(|| "0".to_string())
                .parse()
                .unwrap_or(0),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.datastores.is_empty() {
            anyhow::bail!("DATASTORES must name at least one datastore");
        }

        let mut seen = std::collections::HashSet::new();
        for ds in &self.datastores {
            if !seen.insert(ds.id.as_str()) {
                anyhow::bail!("Datastore id {} is declared twice", ds.id);
            }
        }

        if self.datastore(&self.upload_datastore).is_none() {
            anyhow::bail!(
                "UPLOAD_DATASTORE {} does not name a configured datastore",
                self.upload_datastore
            );
        }

        if self.max_upload_size_bytes > 0 && self.min_upload_size_bytes > self.max_upload_size_bytes {
            anyhow::bail!("MIN_UPLOAD_SIZE_BYTES is larger than the maximum upload size");
        }

        if self.quota_enabled && self.quota_max_bytes_per_user == 0 {
            anyhow::bail!("QUOTA_MAX_BYTES_PER_USER must be set when QUOTA_ENABLED=true");
        }

        Ok(())
    }

    pub fn datastore(&self, id: &str) -> Option<&DatastoreConfig> {
        self.datastores.iter().find(|d| d.id == id)
    }
}

fn env_key(id: &str) -> String {
    id.to_uppercase().replace(['-', '.'], "_")
}
