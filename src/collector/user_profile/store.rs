//! Загрузка профилей и выбор профиля для устройства.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::error;

use super::{UNKNOWN, UserProfileDefinition, format_oid, kind_to_string, packet_value};
use crate::config::settings::UserProfileConfig;
use crate::snmp::Session;
use crate::snmp::session::SYS_OBJECT_ID_OID;

/// Меньше совпавших дуг не хватает, чтобы различить производителя.
pub const MIN_SAME_PREFIX_ARCS: usize = 7;

/// Загруженный профиль и адреса, к которым он привязан.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    pub file_name: String,
    pub ip_list: Vec<String>,
    pub definition: UserProfileDefinition,
}

/// Источник пользовательских профилей.
pub trait ProfileProvider: Send + Sync {
    fn read_profile(&self, config: &UserProfileConfig) -> Result<ProfileStore>;
}

/// Читает профили Zabbix из YAML файлов.
#[derive(Debug, Clone, Default)]
pub struct YamlProfileProvider {
    base_dir: Option<PathBuf>,
}

impl YamlProfileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Относительные пути профилей разрешаются от `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, profile_name: &str) -> PathBuf {
        let path = Path::new(profile_name);
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn parse(content: &str) -> Result<UserProfileDefinition> {
        let definition: UserProfileDefinition =
            serde_yml::from_str(content).context("Ошибка разбора YAML профиля")?;
        Ok(definition)
    }
}

impl ProfileProvider for YamlProfileProvider {
    fn read_profile(&self, config: &UserProfileConfig) -> Result<ProfileStore> {
        let path = self.resolve(&config.profile_name);
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => {}
            _ => bail!("wrong file suffix: `{}`", path.display()),
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read file `{}`", path.display()))?;
        let mut definition = Self::parse(&content)
            .with_context(|| format!("failed to unmarshal `{}`", path.display()))?;

        definition.zabbix_export.format_oids();
        definition.profile_name = config.profile_name.clone();
        definition.class = config.class.clone();
        if definition.device_type.is_empty() {
            definition.device_type = UNKNOWN.to_string();
        }

        Ok(ProfileStore {
            file_name: path.display().to_string(),
            ip_list: config.ip_list.clone(),
            definition,
        })
    }
}

/// Читает все профили; ошибочные пропускаются с записью в лог.
pub fn load_user_profiles(
    provider: &dyn ProfileProvider,
    configs: &[UserProfileConfig],
) -> Vec<ProfileStore> {
    configs
        .iter()
        .filter_map(|config| match provider.read_profile(config) {
            Ok(store) => Some(store),
            Err(e) => {
                error!(profile = %config.profile_name, error = %format!("{:#}", e), "Не удалось прочитать профиль");
                None
            }
        })
        .collect()
}

/// Число шагов дуг, совпадающих с начала у двух OID.
pub fn same_prefix_long(x: &str, y: &str) -> usize {
    x.split('.')
        .zip(y.split('.'))
        .take_while(|(a, b)| a == b)
        .count()
}

fn prefix_long(compare_oid: &str, store: &ProfileStore) -> usize {
    store
        .definition
        .zabbix_export
        .all_oids()
        .map(|oid| same_prefix_long(compare_oid, oid))
        .max()
        .unwrap_or(0)
}

/// Индекс профиля, OID которого дольше всего совпадают с `compare_oid`.
pub fn compare_stores(stores: &[ProfileStore], compare_oid: &str) -> Result<usize> {
    let compare_oid = format_oid(compare_oid);

    let mut best = 0;
    let mut found = None;
    for (i, store) in stores.iter().enumerate() {
        let long = prefix_long(compare_oid, store);
        if best < long && long >= MIN_SAME_PREFIX_ARCS {
            best = long;
            found = Some(i);
        }
    }

    found.ok_or_else(|| anyhow!("stores can not compared oid : {}", compare_oid))
}

/// Подбирает профиль для неизвестного устройства по GetNext от его sysObjectID.
pub async fn try_device(
    session: &mut dyn Session,
    ip: &str,
    stores: &[ProfileStore],
) -> Result<usize> {
    let packet = session
        .get(&[SYS_OBJECT_ID_OID.to_string()])
        .await
        .with_context(|| format!("SNMP get to {} error", ip))?;
    let next_oid = packet_value(&packet)
        .map(kind_to_string)
        .ok_or_else(|| anyhow!("SNMP get to {}: sysObjectID is empty", ip))?;

    let packet = session
        .get_next(&[next_oid])
        .await
        .with_context(|| format!("SNMP get to {} error", ip))?;
    let compare_oid = packet
        .variables
        .last()
        .map(|v| v.oid.clone())
        .unwrap_or_default();

    compare_stores(stores, &compare_oid)
}
