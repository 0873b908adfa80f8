use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::env;
use std::fs;
use std::path::Path;

use talent_scout::{
    MatchingConfig, RawRecord, Requirement, RequirementFilters, ScoutService,
};

fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() >= 4 && args[1] == "match" {
        let top_k = args
            .get(4)
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        run_match(Path::new(&args[2]), &args[3], top_k)
    } else {
        eprintln!("Usage: talent-scout match <batch.json|batch.csv> \"<requirement>\" [top_k]");
        eprintln!();
        eprintln!("  Loads a batch of raw source records, resolves identities,");
        eprintln!("  and ranks the merged profiles against the requirement text.");
        std::process::exit(1);
    }
}

fn run_match(batch_path: &Path, requirement_text: &str, top_k: usize) -> Result<()> {
    println!("🔎 Talent Scout v{}", talent_scout::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load raw records
    println!("\n📂 Loading records from {}...", batch_path.display());
    let batch = load_batch(batch_path)?;
    println!("✓ Loaded {} raw records", batch.len());

    // 2. Ingest with per-record isolation
    let service = ScoutService::new(MatchingConfig::default());
    let ingest = service.ingest_batch(&batch);
    println!(
        "✓ Accepted {} records ({} dropped)",
        ingest.accepted,
        ingest.dropped.len()
    );
    for diagnostic in &ingest.dropped {
        println!("  ⚠ {}: {}", diagnostic.subject, diagnostic.message);
    }

    // 3. Resolve + merge + publish
    println!("\n🔧 Resolving identities...");
    let pass = service.rebuild();
    println!(
        "✓ Snapshot {}: {} records → {} candidate identities",
        pass.snapshot_id, pass.record_count, pass.cluster_count
    );
    for split in &pass.splits {
        println!(
            "  ⚠ previously merged, now split: {} → {} clusters",
            split.previous_cluster,
            split.new_clusters.len()
        );
    }

    // 4. Match and rank
    println!("\n🎯 Matching requirement: \"{}\"", requirement_text);
    let requirement = Requirement {
        text: requirement_text.to_string(),
        filters: RequirementFilters::default(),
    };
    let page = service.query_page(&requirement, None, top_k);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if page.entries.is_empty() {
        println!("No matching profiles.");
        return Ok(());
    }
    for (rank, result) in page.entries.iter().enumerate() {
        let review = if result.needs_review { "  [needs review]" } else { "" };
        println!(
            "{:>2}. {:<24} score {:.3}{}",
            rank + 1,
            result.display_name,
            result.score,
            review
        );
        if !result.matched_terms.is_empty() {
            println!("     matched: {}", result.matched_terms.join(", "));
        }
        for contact in &result.contacts {
            println!("     {}: {} (from {})", contact.label, contact.value, contact.provenance);
        }
    }
    println!("\n✅ Done");

    Ok(())
}

// ============================================================================
// BATCH LOADING
// ============================================================================

fn load_batch(path: &Path) -> Result<Vec<RawRecord>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => load_json(path),
        Some("csv") => load_csv(path),
        _ => anyhow::bail!("unsupported batch format (expected .json or .csv)"),
    }
}

fn load_json(path: &Path) -> Result<Vec<RawRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// CSV row shape: list-valued fields are ';'-separated, fetched_at is RFC 3339
#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    source: Option<String>,
    external_id: Option<String>,
    display_name: Option<String>,
    handle: Option<String>,
    email: Option<String>,
    affiliation: Option<String>,
    urls: Option<String>,
    topics: Option<String>,
    summary: Option<String>,
    fetched_at: Option<String>,
}

fn load_csv(path: &Path) -> Result<Vec<RawRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut batch = Vec::new();
    for row in reader.deserialize() {
        let row: CsvRow = row.with_context(|| format!("parsing {}", path.display()))?;
        batch.push(RawRecord {
            source: row.source,
            external_id: row.external_id,
            display_name: row.display_name,
            handle: row.handle,
            email: row.email,
            affiliation: row.affiliation,
            urls: split_list(row.urls),
            topics: split_list(row.topics),
            summary: row.summary,
            fetched_at: row.fetched_at.as_deref().and_then(parse_timestamp),
        });
    }
    Ok(batch)
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
