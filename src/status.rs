//! `crag status` and `crag stats`.

use anyhow::{bail, Result};

use compliance_rag_core::store::DocumentStore;

use crate::app::App;
use crate::config::Config;

pub async fn run_status(config: Config, id: &str) -> Result<()> {
    let app = App::open(config).await?;
    let Some(doc) = app.store.get(id).await? else {
        app.store.close().await;
        bail!("Document not found: {}", id);
    };

    println!("id:          {}", doc.id);
    println!("filename:    {}", doc.filename);
    println!("format:      {}", doc.format.as_str());
    println!("status:      {}", doc.status.as_str());
    if let Some(reason) = &doc.failure_reason {
        println!("reason:      {}", reason);
    }
    println!("pages:       {}", doc.page_count);
    println!("chunks:      {}", doc.chunk_ids.len());
    if let Some(confidence) = doc.ocr_confidence {
        println!("ocr:         {:.2}", confidence);
    }
    println!("updated_at:  {}", doc.updated_at.to_rfc3339());

    app.store.close().await;
    Ok(())
}

pub async fn run_stats(config: Config) -> Result<()> {
    let db_path = config.db.path.clone();
    let app = App::open(config).await?;
    let stats = app.engine.statistics().await?;

    println!("Compliance RAG — Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Documents:   {}", stats.documents);
    for (status, n) in &stats.documents_by_status {
        println!("    {:<12} {}", status, n);
    }
    println!("  Chunks:      {}", stats.chunks.total);
    for (kind, n) in &stats.chunks.by_kind {
        println!("    {:<12} {}", kind, n);
    }

    app.store.close().await;
    Ok(())
}
