use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "databricks-exporter";
const APPLICATION: &str = env!("CARGO_PKG_NAME");

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Directory searched for `config.yaml` when no `--config-file` is given.
///
/// `DATABRICKS_EXPORTER_CONFIG_DIR` takes precedence over the platform default.
pub fn get_config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("DATABRICKS_EXPORTER_CONFIG_DIR") {
        PathBuf::from(dir)
    } else if let Some(dirs) = project_directory() {
        dirs.config_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".config")
    }
}
