//! Runs one matching job end to end against in-memory doubles.
//!
//! Useful for manually inspecting the event stream and persisted
//! matches without standing up the server crate's database/provider
//! stack.

use std::sync::Arc;

use match_engine::domain::JobStatus;
use match_engine::evaluation::LanguageModel;
use match_engine::memory::{
    fixtures, InMemoryAuditRecorder, InMemoryContextLoader, InMemoryJobStore, InMemoryLanguageModel,
    InMemoryMatchWriter, InMemoryProviderFactory, InMemoryPublisher, InMemoryVectorSearcher,
};
use match_engine::runner::JobRunner;
use match_engine::search::VectorSearcher;
use serde_json::json;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let demo_vector_store_id = "demo-hit";
    let mut acme_chunk = fixtures::chunk("chunk-acme-1", "doc-acme", 0, "Acme builds industrial robotics arms.");
    acme_chunk.vector_store_id = Some(demo_vector_store_id.to_string());
    let mut northwind_chunk =
        fixtures::chunk("chunk-nw-1", "doc-nw", 0, "Northwind manufactures robotic arms for factories.");
    northwind_chunk.vector_store_id = Some(demo_vector_store_id.to_string());
    let mut contoso_chunk = fixtures::chunk("chunk-co-1", "doc-co", 0, "Contoso sells artisanal bread.");
    contoso_chunk.vector_store_id = Some(demo_vector_store_id.to_string());

    let source = fixtures::bundle_with_chunks("entity-acme", "workspace-demo", "company", "Acme Robotics", &[acme_chunk]);
    let target_strong = fixtures::bundle_with_chunks(
        "entity-northwind",
        "workspace-demo",
        "company",
        "Northwind Automation",
        &[northwind_chunk],
    );
    let target_weak =
        fixtures::bundle_with_chunks("entity-contoso", "workspace-demo", "company", "Contoso Bakery", &[contoso_chunk]);

    let template = fixtures::template(
        "template-demo",
        "workspace-demo",
        "company-to-company",
        "company",
        "company",
        json!({
            "scoring_strategy": "average",
            "search_criteria": [
                {"label": "Product overlap", "prompt": "does the target build similar products?"},
            ],
        }),
    );
    let job = fixtures::job("job-demo", "workspace-demo", "template-demo", "entity-acme", json!({}));
    let job_id = job.id;

    let context = match_engine::context::MatchingJobContext {
        job,
        template,
        source,
        targets: vec![target_strong, target_weak],
    };

    let searcher = Arc::new(InMemoryVectorSearcher::new(vec![(
        "does the target build similar products?".to_string(),
        vec![match_engine::search::RawHit {
            provider_ref: Some(demo_vector_store_id.to_string()),
            document_id: None,
            chunk_index: None,
            text: "robotic arms for factories".to_string(),
            score: 0.87,
        }],
    )]));
    let llm: Arc<dyn LanguageModel> = Arc::new(InMemoryLanguageModel::scripted(vec![
        "GOOD".to_string(),
        "Both companies build robotic arms for industrial use.".to_string(),
        "BAD".to_string(),
        "No overlap between bakery goods and robotics.".to_string(),
    ]));
    let searcher: Arc<dyn VectorSearcher> = searcher;

    let jobs = InMemoryJobStore::new(job_id, JobStatus::Queued);
    let context_loader = InMemoryContextLoader::new(context);
    let providers = InMemoryProviderFactory::new(searcher, llm);
    let audit = InMemoryAuditRecorder::default();
    let publisher = InMemoryPublisher::default();
    let matches = InMemoryMatchWriter::default();

    let runner = JobRunner {
        jobs: &jobs,
        context: &context_loader,
        providers: &providers,
        audit: &audit,
        publisher: &publisher,
        matches: &matches,
        retry_policy: match_engine::retry::RetryPolicy::default(),
    };

    runner.run_with_retry(job_id).await.expect("demo job should succeed");

    println!("--- events ---");
    for event in publisher.events.lock().unwrap().iter() {
        println!("{}", serde_json::to_string(event).unwrap());
    }

    println!("--- matches ---");
    for (row, features) in matches.stored.lock().unwrap().get(&job_id).unwrap() {
        println!("rank={} target={} score={:.2}", row.rank, row.target_entity_id, row.score);
        for feature in features {
            println!("  {} = {:?} {}", feature.label, feature.value_numeric, feature.value_text);
        }
    }
}
