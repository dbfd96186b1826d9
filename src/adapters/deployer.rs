use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use crate::{
    core::{Position, artifacts::ApiParser},
    ports::api_registry::ApiRegistry,
};

/// One-shot deployment of API artifacts from a directory.
pub struct ArtifactDeployer<'a> {
    parser: &'a ApiParser,
    registry: &'a dyn ApiRegistry,
}

impl<'a> ArtifactDeployer<'a> {
    pub fn new(parser: &'a ApiParser, registry: &'a dyn ApiRegistry) -> Self {
        Self { parser, registry }
    }

    /// Deploy every `*.xml` file in `dir`, in file name order.
    ///
    /// A file that fails to parse or register is logged and skipped; the
    /// other artifacts still deploy. Returns the number of APIs registered.
    pub async fn deploy_directory(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let files = artifact_files(dir).await?;
        tracing::info!(dir = %dir.display(), count = files.len(), "deploying API artifacts");

        let mut deployed = 0;
        for file in files {
            match self.deploy_file(&file).await {
                Ok(()) => deployed += 1,
                Err(e) => tracing::error!(file = %file.display(), error = %e, "artifact rejected"),
            }
        }
        Ok(deployed)
    }

    pub async fn deploy_file(&self, file: &Path) -> Result<()> {
        let xml = tokio::fs::read_to_string(file)
            .await
            .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let api = self.parser.unmarshal(&xml, &Position::new(file_name, 1))?;
        let name = api.name.clone();
        self.registry
            .register_api(api)
            .await
            .wrap_err_with(|| format!("Failed to register API '{name}'"))?;
        Ok(())
    }
}

async fn artifact_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .wrap_err_with(|| format!("Failed to read artifacts directory {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_xml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        if is_xml && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
