#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redshift_upload::config::{ConnectionConfig, UploadOptions};
use redshift_upload::memory::{MemoryBlobStore, MemoryWarehouse, Row};
use redshift_upload::source::Source;
use redshift_upload::sql::TableName;
use redshift_upload::upload::{UploadReport, UploadRequest, upload};
use redshift_upload::UploadResult;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

pub fn connection() -> ConnectionConfig {
    ConnectionConfig {
        host: "warehouse.test".to_string(),
        port: 5439,
        dbname: "analytics".to_string(),
        user: "loader".to_string(),
        password: "password".to_string(),
        bucket: "staging".to_string(),
        access_key: "AKIATEST".to_string(),
        secret_key: "test-secret".to_string(),
    }
}

pub fn orders() -> TableName {
    TableName::new("public", "orders")
}

/// In-memory warehouse and store plus a scratch view store.
pub struct Harness {
    pub store: Arc<MemoryBlobStore>,
    pub warehouse: MemoryWarehouse,
    pub workspace: TestWorkspace,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryBlobStore::new("staging"));
        let warehouse = MemoryWarehouse::new(Arc::clone(&store));
        Self {
            store,
            warehouse,
            workspace: TestWorkspace::new(),
        }
    }

    pub fn options(&self) -> UploadOptions {
        UploadOptions {
            view_store: self.workspace.path().join("views"),
            ..UploadOptions::default()
        }
    }

    pub fn upload(
        &self,
        source: Source,
        table: &TableName,
        options: UploadOptions,
    ) -> UploadResult<UploadReport> {
        let mut request = UploadRequest::new(source, table.clone(), connection());
        request.options = options;
        upload(request, &self.warehouse, self.store.as_ref())
    }
}

pub fn csv(text: &str) -> Source {
    Source::DelimitedText(text.to_string())
}

pub fn cells(values: &[&str]) -> Row {
    values
        .iter()
        .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
        .collect()
}
