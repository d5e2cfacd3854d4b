use assignment_batcher::events::ChannelSink;
use assignment_batcher::intake::{parse_batch, validate_settings};
use assignment_batcher::memory::MemoryPage;
use assignment_batcher::*;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let categories = CategoryMap::new().with_rule(
        CategoryRule::new("Science", &["discipline", "board"])
            .with_category(&["bio", "ks3"], "KS3 Biology")
            .with_category(&["phy", "aqa"], "AQA Physics"),
    );

    let config = RunnerConfig::builder()
        .with_db_path(PathBuf::from("/tmp/assignment-batcher-example.db"))
        .with_subjects(SubjectMap::new().with_alias("Biology", "Science"))
        .with_categories(categories)
        .build();

    // What the operator typed into the control surface
    let raw = "Ada Lovelace, Cells, bio, ks3; Alan Turing, Forces, phy, aqa";
    let items = parse_batch(raw, "Science", &config.categories).unwrap();
    println!("Parsed {} items:", items.len());
    for item in &items {
        println!("  {} -> {:?}", item.identifier, item.parameters);
    }

    let settings = RunSettings {
        day: "Monday".into(),
        subject: "Science".into(),
        start_date: "2030-01-07".into(),
        start_time: "09:00".into(),
        due_date: "2030-01-14".into(),
        due_time: "17:00".into(),
        nugget_automation: true,
    };
    let now = chrono::Local::now().naive_local();
    validate_settings(&settings, now, config.min_start_lead).unwrap();

    // The page here is not the assignments listing, so the runner only
    // persists the batch and waits for the next page load.
    let page = Arc::new(MemoryPage::new("https://app.century.tech/teach/classes"));
    let (sink, mut notifications) = ChannelSink::new();
    let runner = BatchRunner::open(page, config)
        .unwrap()
        .with_notifier(Arc::new(sink));

    runner
        .store()
        .save_preference("subject", &json!(settings.subject))
        .unwrap();

    let status = runner.submit(items, settings).await.unwrap();
    println!("First pass: {:?}", status);

    let state = runner.store().load().unwrap();
    println!(
        "{} of {} items waiting (paused: {})",
        state.queue.len(),
        state.total_count,
        state.paused
    );
    println!("Saved preferences: {:?}", runner.store().load_preferences().unwrap());

    runner.stop().unwrap();
    while let Ok(notification) = notifications.try_recv() {
        println!("[{:?}] {}", notification.severity(), notification.text());
    }
}
