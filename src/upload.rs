//! `crag upload`: ingest files and directories from disk.
//!
//! Explicit file arguments are always submitted, so an unsupported file is
//! reported as failed. Directories are walked recursively and only files
//! with a supported extension are picked up.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use compliance_rag_core::cancel::CancellationToken;
use compliance_rag_core::ingest::derive_document_id;
use compliance_rag_core::models::{DocumentFormat, DocumentStatus, UploadedFile};

use crate::app::App;
use crate::config::Config;

pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
                if entry.file_type().is_file()
                    && DocumentFormat::from_filename(&entry.file_name().to_string_lossy()).is_ok()
                {
                    files.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

fn read_upload(path: &Path) -> Result<UploadedFile> {
    let content = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    Ok(UploadedFile::new(filename, content)
        .with_id(derive_document_id(&canonical.display().to_string())))
}

pub async fn run_upload(config: Config, paths: &[PathBuf]) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        bail!("No supported documents found (pdf, docx, png, jpg, jpeg)");
    }
    let uploads = files
        .iter()
        .map(|p| read_upload(p))
        .collect::<Result<Vec<_>>>()?;

    let app = App::open(config).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    println!("Uploading {} file(s)...", uploads.len());
    let report = app.ingest(uploads, &cancel).await;

    for o in &report.outcomes {
        match o.status {
            DocumentStatus::Ready => println!(
                "  ready   {:<40} {} ({} chunks)",
                o.filename, o.document_id, o.chunks
            ),
            _ => println!(
                "  failed  {:<40} {}",
                o.filename,
                o.reason.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!(
        "Ingested {} / {} documents ({} chunks)",
        report.documents_processed,
        report.outcomes.len(),
        report.chunks_processed
    );

    app.store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_walk_keeps_supported_formats() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("policy.pdf"), b"%PDF").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"skip").unwrap();
        std::fs::write(tmp.path().join("nested").join("scan.JPG"), b"jpg").unwrap();

        let files = collect_files(&[tmp.path().to_path_buf()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["scan.JPG".to_string(), "policy.pdf".to_string()]);
    }

    #[test]
    fn test_explicit_files_pass_through_and_missing_fail() {
        let tmp = TempDir::new().unwrap();
        let notes = tmp.path().join("notes.txt");
        std::fs::write(&notes, b"x").unwrap();
        assert_eq!(collect_files(&[notes.clone()]).unwrap(), vec![notes]);
        assert!(collect_files(&[tmp.path().join("missing.pdf")]).is_err());
    }

    #[test]
    fn test_same_path_gets_same_id() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let a = read_upload(&path).unwrap();
        let b = read_upload(&path).unwrap();
        assert_eq!(a.document_id, b.document_id);
        assert_eq!(a.filename, "policy.pdf");
    }
}
