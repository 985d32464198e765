//! Upload options and connection settings.
//!
//! Both are plain values passed explicitly into [`crate::upload::upload`];
//! nothing is read from process-wide state.

use std::{fmt, fs::File, io::BufReader, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{UploadError, UploadResult};

pub const DEFAULT_VIEW_STORE: &str = "temp_view_folder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DistStyle {
    #[default]
    Even,
    Key,
    All,
    Auto,
}

impl fmt::Display for DistStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DistStyle::Even => "even",
            DistStyle::Key => "key",
            DistStyle::All => "all",
            DistStyle::Auto => "auto",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadOptions {
    pub truncate_table: bool,
    pub drop_table: bool,
    pub cleanup_blob_store: bool,
    /// Users or groups granted SELECT on the table after every load.
    pub grant_access: Vec<String>,
    pub diststyle: DistStyle,
    pub distkey: Option<String>,
    pub sortkey: Option<String>,
    /// Number of staged chunks, and so of parallel slices for the COPY.
    pub load_in_parallel: usize,
    pub skip_checks: bool,
    pub skip_views: bool,
    pub load_as_delimited_text: bool,
    pub no_header: bool,
    /// Audit table receiving one row per upload.
    pub records_table: Option<String>,
    /// Root directory for captured view definitions.
    pub view_store: PathBuf,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            truncate_table: false,
            drop_table: false,
            cleanup_blob_store: false,
            grant_access: Vec::new(),
            diststyle: DistStyle::Even,
            distkey: None,
            sortkey: None,
            load_in_parallel: 1,
            skip_checks: false,
            skip_views: false,
            load_as_delimited_text: false,
            no_header: false,
            records_table: None,
            view_store: PathBuf::from(DEFAULT_VIEW_STORE),
        }
    }
}

impl UploadOptions {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening options file {path:?}"))?;
        serde_yaml::from_reader(BufReader::new(file)).context("Parsing upload options YAML")
    }

    /// Validates option combinations and returns the normalized options.
    pub fn resolve(mut self) -> UploadResult<Self> {
        if self.load_as_delimited_text && !self.skip_checks {
            debug!("Loading as delimited text implies skipping checks");
            self.skip_checks = true;
        }
        if self.no_header && !self.load_as_delimited_text {
            return Err(config_error(
                "no_header is only supported together with load_as_delimited_text",
            ));
        }
        if self.truncate_table && self.drop_table {
            return Err(config_error(
                "truncate_table and drop_table are mutually exclusive",
            ));
        }
        if self.skip_checks && self.drop_table {
            return Err(config_error(
                "drop_table needs column checks to know what to create; it cannot be combined with skip_checks",
            ));
        }
        if self.load_in_parallel == 0 {
            return Err(config_error("load_in_parallel must be at least 1"));
        }
        if (self.distkey.is_some() || self.sortkey.is_some()) && self.diststyle != DistStyle::Key
        {
            debug!("distkey/sortkey given, switching diststyle to key");
            self.diststyle = DistStyle::Key;
        }
        self.grant_access.retain(|grantee| !grantee.trim().is_empty());
        Ok(self)
    }
}

fn config_error(message: &str) -> UploadError {
    UploadError::Configuration(message.to_string())
}

/// Warehouse and blob store coordinates for one upload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

fn default_port() -> u16 {
    5439
}

impl ConnectionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening connection profile {path:?}"))?;
        serde_yaml::from_reader(BufReader::new(file)).context("Parsing connection profile YAML")
    }

    pub fn validate(&self) -> UploadResult<()> {
        let fields = [
            ("host", &self.host),
            ("dbname", &self.dbname),
            ("user", &self.user),
            ("password", &self.password),
            ("bucket", &self.bucket),
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(UploadError::Configuration(format!(
                "connection setting '{name}' is missing"
            )));
        }
        if self.port == 0 {
            return Err(config_error("connection port must be non-zero"));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
