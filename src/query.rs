//! `crag query`: answer one question from the CLI.

use anyhow::Result;

use compliance_rag_core::cancel::CancellationToken;
use compliance_rag_core::models::{QueryAnalysis, QueryResponse};

use crate::app::App;
use crate::config::Config;

pub async fn run_query(
    config: Config,
    question: &str,
    top_k: Option<usize>,
    show_analysis: bool,
    json: bool,
) -> Result<()> {
    let app = App::open(config).await?;
    let response = app
        .engine
        .query(question, top_k, &CancellationToken::new())
        .await?;

    if json {
        let mut value = serde_json::to_value(&response)?;
        if !show_analysis {
            if let Some(obj) = value.as_object_mut() {
                obj.remove("query_analysis");
            }
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_response(&response);
        if show_analysis {
            print_analysis(&response.query_analysis);
        }
    }

    app.store.close().await;
    Ok(())
}

fn print_response(r: &QueryResponse) {
    println!("{}", r.answer);
    println!();
    println!(
        "status: {}  confidence: {:.2}",
        r.status.as_str(),
        r.confidence
    );

    if r.sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for s in &r.sources {
        println!(
            "  [{}] {} (page {})  {}  confidence: {:.2}",
            s.citation,
            s.document,
            s.page,
            s.relevance_type.as_str(),
            s.confidence
        );
        println!("      {}", s.excerpt.replace('\n', " "));
    }
}

fn print_analysis(a: &QueryAnalysis) {
    println!();
    println!("Analysis:");
    println!("  type:        {}", a.query_type.as_str());
    println!("  complexity:  {}", a.complexity.as_str());
    println!("  confidence:  {:.2}", a.confidence_score);
    if !a.entities.is_empty() {
        let entities: Vec<String> = a
            .entities
            .iter()
            .map(|e| format!("{} ({})", e.text, e.entity_type.as_str()))
            .collect();
        println!("  entities:    {}", entities.join(", "));
    }
    for t in &a.temporal_context.temporal_references {
        match &t.resolved_range {
            Some(range) => println!(
                "  temporal:    \"{}\" -> {} ({} to {})",
                t.text, range.label, range.start, range.end
            ),
            None => println!("  temporal:    \"{}\" (unresolved)", t.text),
        }
    }
    for s in &a.augmentation_suggestions {
        println!("  suggestion:  {}", s);
    }
}
