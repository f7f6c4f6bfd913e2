use crate::cache::DEFAULT_CAPACITY;
use crate::offer::MapperOptions;
use crate::router::DEFAULT_ROUTE_PATTERN;
use crate::xml::ShopInfo;
use anyhow::{anyhow, Context};
use envmnt::errors::EnvmntError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "yml-export.yml";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ShopSettings {
    pub name: String,
    pub company: String,
}

impl Default for ShopSettings {
    fn default() -> Self {
        Self {
            name: "Shop".to_string(),
            company: "Company".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub database: PathBuf,
    pub output_dir: PathBuf,
    /// Public site URL, including the path the site is installed under.
    pub site_url: String,
    pub shop: ShopSettings,
    pub currency: String,
    pub exportable_category_ids: Vec<i64>,
    pub vendor_field: String,
    pub description_field: String,
    pub root_category_id: i64,
    pub route_pattern: String,
    pub cache_capacity: usize,
    /// Offers per file, `0` for a single file.
    pub products_limit: usize,
    pub fetch_retries: usize,
    pub retry_delay: String,
}

impl Default for Settings {
    fn default() -> Self {
        let mapper = MapperOptions::default();
        Self {
            database: PathBuf::from("storage/catalog.db"),
            output_dir: PathBuf::from("yml"),
            site_url: "http://localhost/".to_string(),
            shop: ShopSettings::default(),
            currency: mapper.currency,
            exportable_category_ids: vec![],
            vendor_field: mapper.vendor_field,
            description_field: mapper.description_field,
            root_category_id: 1,
            route_pattern: DEFAULT_ROUTE_PATTERN.to_string(),
            cache_capacity: DEFAULT_CAPACITY,
            products_limit: 0,
            fetch_retries: 3,
            retry_delay: "1s".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then the YAML file, then environment variables.
    ///
    /// An explicitly given file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read config {}", path.display()))?;
        Self::from_yaml(&input).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(input: &str) -> Result<Self, anyhow::Error> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn apply_env(&mut self) -> Result<(), anyhow::Error> {
        env_override("YML_DATABASE", &mut self.database)?;
        env_override("YML_OUTPUT_DIR", &mut self.output_dir)?;
        env_override("YML_SITE_URL", &mut self.site_url)?;
        env_override("YML_SHOP_NAME", &mut self.shop.name)?;
        env_override("YML_SHOP_COMPANY", &mut self.shop.company)?;
        env_override("YML_CURRENCY", &mut self.currency)?;
        env_override("YML_PRODUCTS_LIMIT", &mut self.products_limit)?;
        if let Some(ids) = env_string("YML_EXPORTABLE_CATEGORY_IDS")? {
            self.exportable_category_ids = parse_id_list(&ids)?;
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Result<Duration, anyhow::Error> {
        duration_str::parse(&self.retry_delay)
            .map_err(|err| anyhow!("Unable to parse retry delay {:?}: {err}", self.retry_delay))
    }

    pub fn mapper_options(&self) -> MapperOptions {
        MapperOptions {
            currency: self.currency.clone(),
            exportable_category_ids: self.exportable_category_ids.iter().copied().collect(),
            vendor_field: self.vendor_field.clone(),
            description_field: self.description_field.clone(),
        }
    }

    pub fn shop_info(&self, url: String) -> ShopInfo {
        ShopInfo {
            name: self.shop.name.clone(),
            company: self.shop.company.clone(),
            url,
        }
    }
}

fn env_string(key: &str) -> Result<Option<String>, anyhow::Error> {
    let raw: Result<String, EnvmntError> = envmnt::get_parse(key);
    match raw {
        Ok(raw) => Ok(Some(raw)),
        Err(EnvmntError::Missing(_)) => Ok(None),
        Err(err) => Err(anyhow!("Unable to read {key}: {err}")),
    }
}

fn env_override<T>(key: &str, target: &mut T) -> Result<(), anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = env_string(key)? {
        *target = raw
            .parse()
            .map_err(|err| anyhow!("Invalid value of {key}: {err}"))?;
    }
    Ok(())
}

fn parse_id_list(s: &str) -> Result<Vec<i64>, anyhow::Error> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().with_context(|| format!("Invalid category id {s:?}")))
        .collect()
}
