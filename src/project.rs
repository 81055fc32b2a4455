//! Project scaffolding and directory preparation.
//!
//! `rproj new` lays out a project:
//!
//! ```text
//! <project>/
//!   config.yml          sync configuration with placeholder hosts
//!   src/
//!   reports/README.rmd  report template
//! ```
//!
//! When the current directory already carries the project's name, the
//! project is scaffolded in place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::sources::config::{DEFAULT_CONFIG_FILE, HostConfig, RefreshMode, SyncConfiguration};
use crate::sources::sync::SyncError;

const REPORT_TEMPLATE: &str = include_str!("../templates/report.Rmd");

/// Refresh interval written into new configs.
pub const DEFAULT_REFRESH_DAYS: u32 = 30;

/// Report output formats accepted by `rproj new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[value(name = "pdf_output")]
    Pdf,
    #[value(name = "word_output")]
    Word,
    #[value(name = "html_output")]
    Html,
}

impl OutputFormat {
    /// R Markdown output name used in the report header.
    pub fn rmarkdown_output(self) -> &'static str {
        match self {
            Self::Pdf => "pdf_document",
            Self::Word => "word_document",
            Self::Html => "html_document",
        }
    }
}

/// Options for [`create_project`].
#[derive(Debug, Clone)]
pub struct ProjectOptions {
    pub project_name: String,
    pub output_format: OutputFormat,
    pub work_dir: String,
    pub output_dir: String,
    pub input_dir: String,
    /// Overwrite an existing config and report.
    pub force: bool,
}

#[derive(Serialize)]
struct ScaffoldDirs<'a> {
    work_dir: &'a str,
    input_dir: &'a str,
    output_dir: &'a str,
}

#[derive(Serialize)]
struct ScaffoldConfig<'a> {
    project_name: &'a str,
    dir: ScaffoldDirs<'a>,
    data_refresh_mode: RefreshMode,
    data_refresh_days: u32,
    hosts: BTreeMap<&'static str, HostConfig>,
}

fn placeholder_host(use_gateway: Option<&str>) -> HostConfig {
    HostConfig {
        location: Some(String::new()),
        username: Some(String::new()),
        password: Some(String::new()),
        use_gateway: use_gateway.map(str::to_string),
        port: None,
    }
}

/// Render the default `config.yml` for a new project.
pub fn default_config_yaml(options: &ProjectOptions) -> Result<String> {
    let config = ScaffoldConfig {
        project_name: &options.project_name,
        dir: ScaffoldDirs {
            work_dir: &options.work_dir,
            input_dir: &options.input_dir,
            output_dir: &options.output_dir,
        },
        data_refresh_mode: RefreshMode::Auto,
        data_refresh_days: DEFAULT_REFRESH_DAYS,
        hosts: BTreeMap::from([
            ("gateway", placeholder_host(None)),
            ("host1", placeholder_host(Some("gateway"))),
        ]),
    };
    serde_yaml::to_string(&config).context("failed to render default config")
}

/// Render the report template.
pub fn render_report(title: &str, author: &str, date: &str, format: OutputFormat) -> String {
    REPORT_TEMPLATE
        .replace("{title}", title)
        .replace("{author}", author)
        .replace("{date}", date)
        .replace("{output}", format.rmarkdown_output())
}

fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Directory the project is created in, relative to `cwd`.
pub fn project_root(cwd: &Path, project_name: &str) -> PathBuf {
    if cwd.file_name().is_some_and(|n| n == project_name) {
        cwd.to_path_buf()
    } else {
        cwd.join(project_name)
    }
}

fn write_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        tracing::warn!(path = %path.display(), "already exists, keeping it (use --force to overwrite)");
        return Ok(false);
    }
    tracing::info!(path = %path.display(), "creating");
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

/// Scaffold a project under `cwd`. Returns the project root.
pub fn create_project(options: &ProjectOptions, cwd: &Path) -> Result<PathBuf> {
    let name = options.project_name.trim();
    if name.is_empty() || name.contains(['/', '\\']) {
        bail!("invalid project name '{}'", options.project_name);
    }

    let root = project_root(cwd, name);
    for dir in ["src", "reports"] {
        let path = root.join(dir);
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
    }

    write_file(
        &root.join(DEFAULT_CONFIG_FILE),
        &default_config_yaml(options)?,
        options.force,
    )?;

    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    let report = render_report(name, &current_username(), &date, options.output_format);
    write_file(&root.join("reports").join("README.rmd"), &report, options.force)?;

    tracing::info!(root = %root.display(), "created project");
    Ok(root)
}

fn create_dir(path: &Path) -> Result<(), SyncError> {
    fs::create_dir_all(path).map_err(|source| SyncError::Prepare {
        path: path.to_path_buf(),
        source,
    })
}

/// Create `work_dir`, missing local input directories and `output_dir`.
///
/// Runs after validation and host resolution, so a bad config never creates
/// anything.
pub fn prepare_directories(config: &SyncConfiguration) -> Result<(), SyncError> {
    tracing::info!("creating directories");
    create_dir(&config.work_dir)?;
    for path in config.input_locations.iter().filter_map(|l| l.local_path()) {
        if !path.exists() {
            create_dir(path)?;
        }
    }
    create_dir(&config.output_dir)
}
