//! One function per subcommand. Each opens the store, does its work and
//! closes it so the last change is on disk before the process exits.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use knowbase_rag::{RagError, RetrievalEngine, SearchResult};
use tracing::{error, info};

use crate::settings::Settings;

async fn open(settings: &Settings) -> Result<RetrievalEngine> {
    let provider = settings.embedding_provider()?;
    RetrievalEngine::open(settings.rag.clone(), provider)
        .await
        .with_context(|| format!("failed to open store at {}", settings.rag.store_path.display()))
}

pub async fn ingest(settings: &Settings, files: &[PathBuf], extra: BTreeMap<String, String>) -> Result<()> {
    let engine = open(settings).await?;

    let mut failed = 0;
    for path in files {
        match engine.ingest_file(path, extra.clone()).await {
            Ok(report) => {
                println!("{}\t{}\t{} chunks", report.document_id, path.display(), report.chunk_ids.len());
            }
            Err(e) => {
                failed += 1;
                error!(path = %path.display(), error = %e, "ingestion failed");
                // A store that cannot be written is not worth continuing with.
                if matches!(e.root_cause(), RagError::Io(_) | RagError::CorruptStore(_)) {
                    break;
                }
            }
        }
    }

    engine.close().await?;
    if failed > 0 {
        bail!("{failed} of {} files failed to ingest", files.len());
    }
    Ok(())
}

pub async fn delete(settings: &Settings, document_id: &str) -> Result<()> {
    let engine = open(settings).await?;
    let removed = engine.delete_document(document_id).await;
    engine.close().await?;

    let removed = removed?;
    println!("deleted {document_id} ({} chunks)", removed.len());
    Ok(())
}

pub async fn list(settings: &Settings, json: bool) -> Result<()> {
    let engine = open(settings).await?;
    let documents = engine.list_documents().await;
    engine.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
        return Ok(());
    }
    if documents.is_empty() {
        println!("no documents");
        return Ok(());
    }
    for doc in documents {
        println!(
            "{}\t{}\t{}\t{}\t{} chunks",
            doc.id,
            doc.filename,
            doc.file_type,
            doc.uploaded_at.format("%Y-%m-%d %H:%M:%S"),
            doc.chunk_count
        );
    }
    Ok(())
}

pub async fn query(
    settings: &Settings,
    text: &str,
    top_k: Option<usize>,
    min_score: Option<f32>,
    json: bool,
) -> Result<()> {
    let engine = open(settings).await?;
    let k = top_k.unwrap_or(settings.rag.top_k);
    let min_score = min_score.unwrap_or(settings.rag.similarity_threshold);
    let results = engine.query(text, k, min_score).await;
    engine.close().await?;
    let results = results?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("no relevant context found");
    } else {
        print!("{}", render_results(&results));
    }
    Ok(())
}

fn render_results(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for (rank, hit) in results.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{:.3}] {} [{}] (passage {}, chunk {})\n{}\n\n",
            rank + 1,
            hit.score,
            hit.filename,
            hit.document_id,
            hit.ordinal,
            hit.chunk_id,
            hit.text.trim()
        ));
    }
    out
}

pub async fn stats(settings: &Settings) -> Result<()> {
    let engine = open(settings).await?;
    let documents = engine.list_documents().await.len();
    let chunks = engine.chunk_count().await;
    let status = engine.status().await;
    let config = engine.config();

    println!("store:      {}", config.store_path.display());
    println!("dimension:  {}", config.dimension);
    println!("metric:     {:?}", config.metric);
    println!("provider:   {}", engine.embedding_provider().name());
    println!("documents:  {documents}");
    println!("chunks:     {chunks}");
    println!("status:     {status:?}");
    info!(documents, chunks, "store statistics");

    engine.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowbase_rag::ChunkId;

    #[test]
    fn results_render_with_rank_and_score() {
        let results = vec![SearchResult {
            chunk_id: ChunkId(4),
            score: 0.8123,
            text: "Vacation requests go through HR.  ".to_string(),
            document_id: "0b7c".to_string(),
            filename: "handbook.pdf".to_string(),
            ordinal: 2,
        }];
        assert_eq!(
            render_results(&results),
            "1. [0.812] handbook.pdf [0b7c] (passage 2, chunk #4)\nVacation requests go through HR.\n\n"
        );
    }
}
