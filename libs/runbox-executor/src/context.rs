//! Tar build contexts for image builds.
use crate::error::ExecutorError;
use std::path::{Path, PathBuf};

/// Crates a worker image needs to compile the worker binary
const WORKER_SOURCES: &[&str] = &["libs/runbox-common", "bins/runbox-worker"];

/// Where image sources live on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    /// Workspace root (holds the top-level Cargo.toml)
    pub workspace_root: PathBuf,
    /// Directory with the per-language Dockerfiles
    pub docker_dir: PathBuf,
}

impl BuildPaths {
    pub fn new(workspace_root: impl Into<PathBuf>, docker_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            docker_dir: docker_dir.into(),
        }
    }
}

/// Context for a worker image: the named Dockerfile (as `Dockerfile`) plus
/// the workspace manifest and the worker's crates.
pub async fn worker_context(paths: &BuildPaths, dockerfile: &str) -> Result<Vec<u8>, ExecutorError> {
    let root = paths.workspace_root.clone();
    let dockerfile_path = paths.docker_dir.join(dockerfile);
    if !dockerfile_path.is_file() {
        return Err(ExecutorError::Config(format!(
            "Dockerfile not found: {}",
            dockerfile_path.display()
        )));
    }

    tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_path_with_name(&dockerfile_path, "Dockerfile")?;
        builder.append_path_with_name(root.join("Cargo.toml"), "Cargo.toml")?;
        let lock = root.join("Cargo.lock");
        if lock.is_file() {
            builder.append_path_with_name(&lock, "Cargo.lock")?;
        }
        for dir in WORKER_SOURCES {
            append_sources(&mut builder, &root.join(dir), Path::new(dir))?;
        }
        builder.into_inner()
    })
    .await
    .map_err(|e| ExecutorError::Config(format!("Build context task failed: {}", e)))?
    .map_err(ExecutorError::from)
}

/// Context made of one directory's contents, paths relative to it
pub async fn directory_context(dir: &Path) -> Result<Vec<u8>, ExecutorError> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        append_sources(&mut builder, &dir, Path::new(""))?;
        builder.into_inner()
    })
    .await
    .map_err(|e| ExecutorError::Config(format!("Build context task failed: {}", e)))?
    .map_err(ExecutorError::from)
}

/// Recursively add `src` under `name`, skipping build output
fn append_sources(builder: &mut tar::Builder<Vec<u8>>, src: &Path, name: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name == "target" {
            continue;
        }
        let path = entry.path();
        let archived = name.join(&file_name);
        if entry.file_type()?.is_dir() {
            append_sources(builder, &path, &archived)?;
        } else {
            builder.append_path_with_name(&path, &archived)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(archive);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_directory_context_contains_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('hi')").unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();

        let tarball = directory_context(dir.path()).await.unwrap();
        let mut names = entry_names(&tarball);
        names.sort();
        assert_eq!(names, vec!["Dockerfile".to_string(), "main.py".to_string()]);
    }

    #[tokio::test]
    async fn test_worker_context_layout() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        std::fs::create_dir_all(r.join("docker")).unwrap();
        std::fs::create_dir_all(r.join("libs/runbox-common/src")).unwrap();
        std::fs::create_dir_all(r.join("bins/runbox-worker/src")).unwrap();
        std::fs::create_dir_all(r.join("bins/runbox-worker/target/debug")).unwrap();
        std::fs::write(r.join("Cargo.toml"), "[workspace]").unwrap();
        std::fs::write(r.join("docker/Dockerfile.python.worker"), "FROM python:3.11-slim").unwrap();
        std::fs::write(r.join("libs/runbox-common/src/lib.rs"), "").unwrap();
        std::fs::write(r.join("bins/runbox-worker/src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(r.join("bins/runbox-worker/target/debug/junk"), "x").unwrap();

        let paths = BuildPaths::new(r, r.join("docker"));
        let tarball = worker_context(&paths, "Dockerfile.python.worker").await.unwrap();
        let names = entry_names(&tarball);

        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.contains(&"Cargo.toml".to_string()));
        assert!(names.contains(&"bins/runbox-worker/src/main.rs".to_string()));
        assert!(names.contains(&"libs/runbox-common/src/lib.rs".to_string()));
        assert!(!names.iter().any(|n| n.contains("target")));

        let mut archive = tar::Archive::new(tarball.as_slice());
        let mut dockerfile = String::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().to_string_lossy() == "Dockerfile" {
                entry.read_to_string(&mut dockerfile).unwrap();
            }
        }
        assert_eq!(dockerfile, "FROM python:3.11-slim");
    }

    #[tokio::test]
    async fn test_missing_dockerfile_is_config_error() {
        let root = tempfile::tempdir().unwrap();
        let paths = BuildPaths::new(root.path(), root.path().join("docker"));
        let err = worker_context(&paths, "Dockerfile.cpp.worker").await.unwrap_err();
        assert!(err.is_infrastructure());
    }
}
