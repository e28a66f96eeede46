use anyhow::{anyhow, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::category::{Category, CategoryPolicy, ClassMap, ANNOTATION_EXCLUDED_CLASS_IDS};
use crate::detect::{JsonLinesConfig, JsonLinesInput};
use crate::error::ConfigurationError;
use crate::pipeline::DEFAULT_MAX_SOURCE_ERRORS;
use crate::report::{RetryPolicy, DEFAULT_ATTEMPTS, DEFAULT_INITIAL_BACKOFF};
use crate::storage::DEFAULT_SNAPSHOT_DIR;

const DEFAULT_PROGRAM: &str = "python";
const DEFAULT_SCRIPT: &str = "detect.py";
const DEFAULT_WEIGHTS: &str = "best.pt";
const DEFAULT_DETECTOR_CONF: f32 = 0.5;
const DEFAULT_IMG_SIZE: u32 = 416;
const DEFAULT_STREAM_URL: &str = "http://127.0.0.1:8090/?action=stream";
const DEFAULT_STORAGE_ENDPOINT: &str = "https://firebasestorage.googleapis.com";
const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com";
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;
const MAX_UTC_OFFSET_SECS: i32 = 24 * 60 * 60;

#[derive(Debug, Deserialize, Default)]
struct CrimefinderConfigFile {
    snapshot_dir: Option<PathBuf>,
    utc_offset_secs: Option<i32>,
    detector: Option<DetectorConfigFile>,
    firebase: Option<FirebaseConfigFile>,
    notify: Option<NotifyConfigFile>,
    categories: Option<BTreeMap<String, CategoryConfigFile>>,
    annotation_excluded_class_ids: Option<Vec<u32>>,
    retry: Option<RetryConfigFile>,
    max_consecutive_source_errors: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    program: Option<String>,
    script: Option<String>,
    weights: Option<String>,
    conf: Option<f32>,
    img_size: Option<u32>,
    source: Option<String>,
    extra_args: Option<Vec<String>>,
    replay_path: Option<PathBuf>,
    frame_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct FirebaseConfigFile {
    database_url: Option<String>,
    storage_bucket: Option<String>,
    storage_endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    project_id: Option<String>,
    device_token: Option<String>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CategoryConfigFile {
    cooldown_secs: Option<f64>,
    min_confidence: Option<f32>,
    class_ids: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CrimefinderConfig {
    pub snapshot_dir: PathBuf,
    /// Offset used for the timestamp in snapshot file names.
    pub name_offset: FixedOffset,
    pub detector: DetectorSettings,
    pub firebase: Option<FirebaseTarget>,
    pub notify: Option<NotifyTarget>,
    pub policies: BTreeMap<Category, CategoryPolicy>,
    pub class_map: ClassMap,
    pub excluded_class_ids: Vec<u32>,
    pub retry: RetryPolicy,
    pub max_source_errors: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub program: String,
    pub script: String,
    pub weights: String,
    pub conf: f32,
    pub img_size: u32,
    /// Camera stream handed to the detector.
    pub source: String,
    pub extra_args: Vec<String>,
    /// Replay a recorded output file instead of spawning the detector.
    pub replay_path: Option<PathBuf>,
    pub frame_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FirebaseTarget {
    pub database_url: String,
    pub storage_bucket: String,
    pub storage_endpoint: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyTarget {
    pub project_id: String,
    pub device_token: String,
    pub endpoint: String,
    pub access_token: Option<String>,
    pub timeout: Duration,
}

impl DetectorSettings {
    /// Arguments for the detector process, program excluded.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            self.script.clone(),
            "--weights".to_string(),
            self.weights.clone(),
            "--conf".to_string(),
            self.conf.to_string(),
            "--img".to_string(),
            self.img_size.to_string(),
            "--source".to_string(),
            self.source.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn source_config(&self) -> JsonLinesConfig {
        let input = match &self.replay_path {
            Some(path) => JsonLinesInput::File(path.clone()),
            None => JsonLinesInput::Process {
                program: self.program.clone(),
                args: self.command_args(),
            },
        };
        JsonLinesConfig {
            input,
            frame_root: self.frame_root.clone(),
        }
    }
}

#[cfg(feature = "firebase")]
impl FirebaseTarget {
    pub fn settings(&self) -> crate::remote::FirebaseSettings {
        crate::remote::FirebaseSettings {
            database_url: self.database_url.clone(),
            storage_bucket: self.storage_bucket.clone(),
            storage_endpoint: self.storage_endpoint.clone(),
            auth_token: self.auth_token.clone(),
            timeout: self.timeout,
        }
    }
}

#[cfg(feature = "firebase")]
impl NotifyTarget {
    pub fn settings(&self) -> Result<crate::notify::FcmSettings> {
        let access_token = self
            .access_token
            .clone()
            .ok_or_else(|| anyhow!("notify requires CRIMEFINDER_FCM_ACCESS_TOKEN"))?;
        Ok(crate::notify::FcmSettings {
            endpoint: self.endpoint.clone(),
            project_id: self.project_id.clone(),
            device_token: self.device_token.clone(),
            access_token,
            timeout: self.timeout,
        })
    }
}

impl CrimefinderConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CRIMEFINDER_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, but with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn policy_for(&self, category: Category) -> CategoryPolicy {
        self.policies
            .get(&category)
            .copied()
            .unwrap_or_else(|| CategoryPolicy::default_for(category))
    }

    fn from_file(file: CrimefinderConfigFile) -> Result<Self> {
        let snapshot_dir = file
            .snapshot_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR));
        let name_offset = utc_offset(file.utc_offset_secs.unwrap_or(0))?;

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            program: detector_file
                .program
                .unwrap_or_else(|| DEFAULT_PROGRAM.to_string()),
            script: detector_file
                .script
                .unwrap_or_else(|| DEFAULT_SCRIPT.to_string()),
            weights: detector_file
                .weights
                .unwrap_or_else(|| DEFAULT_WEIGHTS.to_string()),
            conf: detector_file.conf.unwrap_or(DEFAULT_DETECTOR_CONF),
            img_size: detector_file.img_size.unwrap_or(DEFAULT_IMG_SIZE),
            source: detector_file
                .source
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            extra_args: detector_file.extra_args.unwrap_or_default(),
            replay_path: detector_file.replay_path,
            frame_root: detector_file.frame_root,
        };

        let firebase = file.firebase.map(|fb| FirebaseTarget {
            database_url: fb.database_url.unwrap_or_default(),
            storage_bucket: fb.storage_bucket.unwrap_or_default(),
            storage_endpoint: fb
                .storage_endpoint
                .unwrap_or_else(|| DEFAULT_STORAGE_ENDPOINT.to_string()),
            auth_token: None,
            timeout: Duration::from_secs(fb.timeout_secs.unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS)),
        });

        let notify = file.notify.map(|n| NotifyTarget {
            project_id: n.project_id.unwrap_or_default(),
            device_token: n.device_token.unwrap_or_default(),
            endpoint: n
                .endpoint
                .unwrap_or_else(|| DEFAULT_FCM_ENDPOINT.to_string()),
            access_token: None,
            timeout: Duration::from_secs(n.timeout_secs.unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS)),
        });

        let mut categories = BTreeMap::new();
        for (name, entry) in file.categories.unwrap_or_default() {
            let category: Category = name.parse()?;
            categories.insert(category, entry);
        }
        let mut policies = BTreeMap::new();
        let mut table = Vec::new();
        let defaults = ClassMap::default();
        for category in Category::ALL {
            let entry = categories.remove(&category).unwrap_or_default();
            let mut policy = CategoryPolicy::default_for(category);
            if let Some(secs) = entry.cooldown_secs {
                policy.cooldown = cooldown_from_secs(category, secs)?;
            }
            if let Some(min) = entry.min_confidence {
                policy.min_confidence = min;
            }
            policies.insert(category, policy);
            table.push((
                category,
                entry
                    .class_ids
                    .unwrap_or_else(|| defaults.class_ids(category)),
            ));
        }
        let class_map =
            ClassMap::from_table(table.iter().map(|(category, ids)| (*category, ids.as_slice())))?;

        let retry_file = file.retry.unwrap_or_default();
        let retry = RetryPolicy::new(
            retry_file.attempts.unwrap_or(DEFAULT_ATTEMPTS),
            retry_file
                .initial_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_INITIAL_BACKOFF),
        );

        Ok(Self {
            snapshot_dir,
            name_offset,
            detector,
            firebase,
            notify,
            policies,
            class_map,
            excluded_class_ids: file
                .annotation_excluded_class_ids
                .unwrap_or_else(|| ANNOTATION_EXCLUDED_CLASS_IDS.to_vec()),
            retry,
            max_source_errors: file
                .max_consecutive_source_errors
                .unwrap_or(DEFAULT_MAX_SOURCE_ERRORS),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("CRIMEFINDER_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.snapshot_dir = PathBuf::from(dir);
            }
        }
        if let Ok(source) = std::env::var("CRIMEFINDER_SOURCE") {
            if !source.trim().is_empty() {
                self.detector.source = source;
            }
        }
        if let Ok(path) = std::env::var("CRIMEFINDER_REPLAY") {
            if !path.trim().is_empty() {
                self.detector.replay_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(url) = std::env::var("CRIMEFINDER_DATABASE_URL") {
            if !url.trim().is_empty() {
                self.firebase_mut().database_url = url;
            }
        }
        if let Ok(bucket) = std::env::var("CRIMEFINDER_STORAGE_BUCKET") {
            if !bucket.trim().is_empty() {
                self.firebase_mut().storage_bucket = bucket;
            }
        }
        if let Ok(token) = std::env::var("CRIMEFINDER_FIREBASE_TOKEN") {
            if !token.trim().is_empty() {
                if let Some(firebase) = self.firebase.as_mut() {
                    firebase.auth_token = Some(token);
                }
            }
        }
        if let Ok(token) = std::env::var("CRIMEFINDER_FCM_ACCESS_TOKEN") {
            if !token.trim().is_empty() {
                if let Some(notify) = self.notify.as_mut() {
                    notify.access_token = Some(token);
                }
            }
        }
        if let Ok(cooldown) = std::env::var("CRIMEFINDER_COOLDOWN_SECS") {
            let secs: f64 = cooldown
                .trim()
                .parse()
                .map_err(|_| anyhow!("CRIMEFINDER_COOLDOWN_SECS must be a number of seconds"))?;
            for (category, policy) in self.policies.iter_mut() {
                policy.cooldown = cooldown_from_secs(*category, secs)?;
            }
        }
        if let Ok(offset) = std::env::var("CRIMEFINDER_UTC_OFFSET_SECS") {
            let secs: i32 = offset.trim().parse().map_err(|_| {
                anyhow!("CRIMEFINDER_UTC_OFFSET_SECS must be an integer number of seconds")
            })?;
            self.name_offset = utc_offset(secs)?;
        }
        if let Ok(ids) = std::env::var("CRIMEFINDER_EXCLUDED_CLASS_IDS") {
            self.excluded_class_ids = split_csv(&ids)
                .iter()
                .map(|id| {
                    id.parse::<u32>().map_err(|_| {
                        anyhow!("CRIMEFINDER_EXCLUDED_CLASS_IDS entry '{}' is not a class id", id)
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(())
    }

    fn firebase_mut(&mut self) -> &mut FirebaseTarget {
        self.firebase.get_or_insert_with(|| FirebaseTarget {
            database_url: String::new(),
            storage_bucket: String::new(),
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            auth_token: None,
            timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
        })
    }

    /// Check cross-field constraints. Run again after changing fields.
    pub fn validate(&mut self) -> Result<()> {
        for (category, policy) in &self.policies {
            policy.validate(*category)?;
        }
        for id in &self.excluded_class_ids {
            if let Some(category) = self.class_map.category_for(*id) {
                return Err(ConfigurationError::new(format!(
                    "class id {} is both excluded and mapped to {}",
                    id, category
                ))
                .into());
            }
        }
        if self.detector.replay_path.is_none() {
            if self.detector.program.trim().is_empty() {
                return Err(ConfigurationError::new("detector program must not be empty").into());
            }
            if self.detector.source.trim().is_empty() {
                return Err(ConfigurationError::new("detector source must not be empty").into());
            }
        }
        if let Some(firebase) = &self.firebase {
            if firebase.database_url.trim().is_empty() {
                return Err(ConfigurationError::new("firebase database_url is required").into());
            }
            if firebase.storage_bucket.trim().is_empty() {
                return Err(ConfigurationError::new("firebase storage_bucket is required").into());
            }
        }
        if let Some(notify) = &self.notify {
            if notify.project_id.trim().is_empty() || notify.device_token.trim().is_empty() {
                return Err(ConfigurationError::new(
                    "notify needs both project_id and device_token",
                )
                .into());
            }
        }
        if self.max_source_errors == 0 {
            return Err(anyhow!("max_consecutive_source_errors must be greater than zero"));
        }
        Ok(())
    }
}

fn cooldown_from_secs(category: Category, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        ConfigurationError::new(format!(
            "{} cooldown_secs must be a non-negative number (got {})",
            category, secs
        ))
        .into()
    })
}

fn utc_offset(secs: i32) -> Result<FixedOffset> {
    if secs.unsigned_abs() >= MAX_UTC_OFFSET_SECS.unsigned_abs() {
        return Err(anyhow!("utc offset {}s is out of range", secs));
    }
    FixedOffset::east_opt(secs).ok_or_else(|| anyhow!("utc offset {}s is out of range", secs))
}

fn read_config_file(path: &Path) -> Result<CrimefinderConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
