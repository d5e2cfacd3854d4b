
use assignment_batcher::channel::Envelope;
use assignment_batcher::memory::MemoryPage;
use assignment_batcher::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use test_helpers::*;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn status_texts(sink: &RecordingSink) -> Vec<String> {
    sink.all()
        .into_iter()
        .filter_map(|n| match n {
            Notification::StatusUpdate { text } => Some(text),
            _ => None,
        })
        .collect()
}

/// A listing page with no controls: the first stage waits until cancelled.
fn stalled_runner() -> (Arc<BatchRunner<MemoryPage>>, Arc<RecordingSink>) {
    let config = RunnerConfig {
        element_timeout: Duration::from_secs(30),
        ..test_config()
    };
    let sink = Arc::new(RecordingSink::default());
    let runner = BatchRunner::open(Arc::new(MemoryPage::new(LISTING_URL)), config)
        .unwrap()
        .with_notifier(sink.clone());
    (Arc::new(runner), sink)
}

#[tokio::test(start_paused = true)]
async fn test_batch_completes_in_order() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, sink) = runner_for(&site, test_config());
    let items = vec![
        item("Ada", "Fractions"),
        item("Grace", "Fractions"),
        item("Alan", "Fractions"),
    ];

    let first = runner.submit(items, settings("Maths", false)).await.unwrap();
    assert_eq!(first, ResumeStatus::Processed(Outcome::Completed));
    site.reset();

    let rest = run_to_idle(&runner, &site).await;
    assert_eq!(
        rest,
        vec![
            ResumeStatus::Processed(Outcome::Completed),
            ResumeStatus::Processed(Outcome::Completed),
            ResumeStatus::Idle,
        ]
    );

    let students: Vec<String> = site.created().into_iter().map(|c| c.student).collect();
    assert_eq!(students, vec!["Ada Lovelace", "Grace Hopper", "Alan Turing"]);

    let first = &site.created()[0];
    assert_eq!(first.name, "Monday: Ada - Fractions");
    assert_eq!(first.subject, "Maths");
    assert_eq!(first.start, "2026-11-02 09:00");
    assert_eq!(first.due, "2026-11-09 17:00");
    assert_eq!(first.content, None);

    assert_eq!(sink.completions(), 1);
    assert_eq!(
        status_texts(&sink),
        vec![
            "Creating assignment 1 of 3",
            "Creating assignment 2 of 3",
            "Creating assignment 3 of 3",
        ]
    );
    assert_eq!(site.page.reload_count(), 2);

    let state = runner.store().load().unwrap();
    assert!(state.queue.is_empty());
    assert!(state.settings.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_completion_is_not_repeated_on_later_loads() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, sink) = runner_for(&site, test_config());

    runner
        .submit(vec![item("Ada", "Fractions")], settings("Maths", false))
        .await
        .unwrap();
    assert_eq!(runner.on_page_load().await.unwrap(), ResumeStatus::Idle);
    assert_eq!(runner.on_page_load().await.unwrap(), ResumeStatus::Idle);
    assert_eq!(sink.completions(), 1);
    assert_eq!(site.page.reload_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_item_keeps_queue() {
    let (runner, sink) = stalled_runner();
    let items = vec![item("Ada", "Fractions"), item("Grace", "Fractions")];

    let handle = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.submit(items, settings("Maths", false)).await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(runner.is_running());

    let cancelled_at = Instant::now();
    assert!(runner.cancel());
    let status = handle.await.unwrap().unwrap();
    assert!(cancelled_at.elapsed() < Duration::from_millis(50));

    assert_eq!(status, ResumeStatus::Processed(Outcome::Cancelled));
    let state = runner.store().load().unwrap();
    assert_eq!(state.queue.len(), 2);
    assert_eq!(state.queue[0].identifier, "Ada");
    assert!(!state.paused);
    assert_eq!(sink.completions(), 0);
    assert_eq!(runner.page().reload_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_item_discards_queue() {
    let (runner, sink) = stalled_runner();
    let items = vec![item("Ada", "Fractions"), item("Grace", "Fractions")];

    let handle = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.submit(items, settings("Maths", false)).await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;

    runner.stop().unwrap();
    let status = handle.await.unwrap().unwrap();
    assert_eq!(status, ResumeStatus::Processed(Outcome::Cancelled));

    let state = runner.store().load().unwrap();
    assert!(state.queue.is_empty());
    assert!(state.paused);
    assert_eq!(sink.completions(), 0);
    assert!(status_texts(&sink).contains(&"Stopped.".to_string()));
    assert_eq!(runner.resume().await.unwrap(), ResumeStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_run_clears_state() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, _sink) = runner_for(&site, test_config());
    runner
        .store()
        .replace(vec![item("Ada", "Fractions")], settings("Maths", false))
        .unwrap();

    runner.stop().unwrap();

    let state = runner.store().load().unwrap();
    assert!(state.queue.is_empty());
    assert!(state.paused);
    assert_eq!(runner.resume().await.unwrap(), ResumeStatus::Idle);
    assert!(site.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_entity_skips_then_next_completes() {
    let site = FakeSite::new(SiteOptions {
        empty_state: false,
        ..Default::default()
    });
    let (runner, sink) = runner_for(&site, test_config());
    let grace = item("Grace", "Fractions");

    let status = runner
        .submit(
            vec![item("Zed", "Fractions"), grace.clone()],
            settings("Maths", false),
        )
        .await
        .unwrap();

    assert!(matches!(
        status,
        ResumeStatus::Processed(Outcome::SkippedNotFound { .. })
    ));
    assert_eq!(runner.store().load().unwrap().queue, vec![grace]);
    let skips = sink.skips();
    assert_eq!(skips.len(), 1);
    assert!(skips[0].contains("Zed"));
    assert_eq!(site.page.reload_count(), 1);
    assert_eq!(site.dismissed(), 1);
    assert!(site.created().is_empty());

    site.reset();
    assert_eq!(
        runner.on_page_load().await.unwrap(),
        ResumeStatus::Processed(Outcome::Completed)
    );
    assert!(runner.store().load().unwrap().queue.is_empty());
    assert_eq!(sink.completions(), 1);
    assert_eq!(site.created()[0].student, "Grace Hopper");
}

#[tokio::test(start_paused = true)]
async fn test_not_found_never_fails_batch() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, sink) = runner_for(&site, test_config());

    let status = runner
        .submit(vec![item("Zed", "Fractions")], settings("Maths", false))
        .await
        .unwrap();

    assert!(matches!(
        status,
        ResumeStatus::Processed(Outcome::SkippedNotFound { .. })
    ));
    assert!(sink
        .all()
        .iter()
        .all(|n| !matches!(n, Notification::RunFailed { .. })));
    assert!(sink
        .all()
        .iter()
        .any(|n| n.severity() == Severity::Warning));
    assert_eq!(sink.completions(), 1);
    assert_eq!(site.page.reload_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_category_option_populating_late_is_still_selected() {
    let site = FakeSite::new(SiteOptions {
        category_delay: Duration::from_millis(1500),
        ..Default::default()
    });
    let (runner, sink) = runner_for(&site, test_config());
    let ada = item("Ada", "Cells")
        .with_param("level", "KS3")
        .with_param("discipline", "Biology");

    let started = Instant::now();
    let status = runner
        .submit(vec![ada], settings("Science", true))
        .await
        .unwrap();

    assert_eq!(status, ResumeStatus::Processed(Outcome::Completed));
    assert!(started.elapsed() >= Duration::from_millis(1500));

    let created = &site.created()[0];
    assert_eq!(created.subject, "Science");
    assert_eq!(created.category.as_deref(), Some("KS3 Biology"));
    assert_eq!(created.content.as_deref(), Some("Cells and organisation"));
    assert!(site.at_listing());
    assert_eq!(sink.completions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_content_keeps_assignment_and_returns() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, sink) = runner_for(&site, test_config());
    let ada = item("Ada", "Volcanoes")
        .with_param("level", "KS3")
        .with_param("discipline", "Biology");

    let status = runner
        .submit(
            vec![ada, item("Grace", "Fractions")],
            settings("Science", true),
        )
        .await
        .unwrap();

    match status {
        ResumeStatus::Processed(Outcome::SkippedSubstepFailed { reason }) => {
            assert!(reason.contains("Volcanoes"));
        }
        other => panic!("expected a sub-step skip, got {:?}", other),
    }
    assert_eq!(site.created().len(), 1);
    assert_eq!(site.created()[0].content, None);
    assert!(site.at_listing());
    assert_eq!(runner.store().load().unwrap().queue.len(), 1);
    assert!(sink.skips()[0].contains("Ada"));
    assert_eq!(site.page.reload_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_attach_control_is_never_reported_complete() {
    let site = FakeSite::new(SiteOptions {
        attach_disabled: true,
        ..Default::default()
    });
    let (runner, sink) = runner_for(&site, test_config());
    let ada = item("Ada", "Cells")
        .with_param("level", "KS3")
        .with_param("discipline", "Biology");

    let status = runner
        .submit(vec![ada, item("Grace", "Fractions")], settings("Science", true))
        .await
        .unwrap();

    match status {
        ResumeStatus::Processed(Outcome::SkippedSubstepFailed { reason }) => {
            assert!(reason.contains("Cells"));
            assert!(reason.contains("enabled"));
        }
        other => panic!("expected a sub-step skip, got {:?}", other),
    }
    assert_eq!(site.created().len(), 1);
    assert_eq!(site.created()[0].content, None);
    assert_eq!(site.dismissed(), 1);
    assert!(site.at_listing());
    assert_eq!(runner.store().load().unwrap().queue.len(), 1);
    assert_eq!(sink.skips().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_live_filtering_without_search_button() {
    let site = FakeSite::new(SiteOptions {
        live_search: true,
        ..Default::default()
    });
    let (runner, _sink) = runner_for(&site, test_config());

    let status = runner
        .submit(vec![item("Alan", "Fractions")], settings("Maths", false))
        .await
        .unwrap();
    assert_eq!(status, ResumeStatus::Processed(Outcome::Completed));
    assert_eq!(site.created()[0].student, "Alan Turing");
}

#[tokio::test(start_paused = true)]
async fn test_subject_alias_selects_umbrella_option() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, _sink) = runner_for(&site, test_config());

    runner
        .submit(vec![item("Ada", "Fractions")], settings("Biology", false))
        .await
        .unwrap();
    assert_eq!(site.created()[0].subject, "Science");
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_listing_page() {
    let site = FakeSite::new(SiteOptions::default());
    site.page.set_url("https://app.century.tech/teach/classes");
    let (runner, _sink) = runner_for(&site, test_config());

    let status = runner
        .submit(vec![item("Ada", "Fractions")], settings("Maths", false))
        .await
        .unwrap();
    assert_eq!(status, ResumeStatus::WrongPage);
    assert_eq!(runner.store().load().unwrap().queue.len(), 1);

    site.page.set_url(LISTING_URL);
    assert_eq!(
        runner.on_page_load().await.unwrap(),
        ResumeStatus::Processed(Outcome::Completed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_resume_while_running_is_busy() {
    let (runner, _sink) = stalled_runner();
    let handle = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            runner
                .submit(vec![item("Ada", "Fractions")], settings("Maths", false))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(runner.resume().await.unwrap(), ResumeStatus::Busy);

    runner.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_batch_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("batch.db");
    {
        let store = BatchStore::open(Some(path.as_path())).unwrap();
        store
            .replace(
                vec![item("Ada", "Fractions"), item("Grace", "Fractions")],
                settings("Maths", false),
            )
            .unwrap();
    }

    let site = FakeSite::new(SiteOptions::default());
    let config = RunnerConfig {
        db_path: Some(path.clone()),
        ..test_config()
    };
    let (runner, sink) = runner_for(&site, config);

    let statuses = run_to_idle(&runner, &site).await;
    assert_eq!(statuses.len(), 3);
    assert_eq!(site.created().len(), 2);
    assert_eq!(sink.completions(), 1);

    let reopened = BatchStore::open(Some(path.as_path())).unwrap();
    assert!(reopened.load().unwrap().queue.is_empty());
}

struct ServerInjector {
    runner: Arc<BatchRunner<MemoryPage>>,
    injections: Arc<AtomicU32>,
}

impl Injector for ServerInjector {
    async fn inject(&self) -> assignment_batcher::error::Result<mpsc::Sender<Envelope>> {
        self.injections.fetch_add(1, Ordering::SeqCst);
        Ok(ControlServer::spawn(Arc::clone(&self.runner)))
    }
}

#[tokio::test(start_paused = true)]
async fn test_control_client_injects_on_cold_page() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, _sink) = runner_for(&site, test_config());
    let injections = Arc::new(AtomicU32::new(0));
    let client = ControlClient::new(ServerInjector {
        runner: Arc::clone(&runner),
        injections: Arc::clone(&injections),
    });

    let response = client
        .run_automation(item("Ada", "Fractions"), settings("Maths", false))
        .await
        .unwrap();
    assert_eq!(response, ControlResponse::success());
    assert_eq!(injections.load(Ordering::SeqCst), 1);
    assert_eq!(site.created().len(), 1);

    let response = client
        .run_automation(item("Zed", "Fractions"), settings("Maths", false))
        .await
        .unwrap();
    assert!(!response.ok);
    assert!(response.error.unwrap().contains("Zed"));

    let response = client.stop_automation().await.unwrap();
    assert!(response.ok);
    assert_eq!(injections.load(Ordering::SeqCst), 1);
    assert!(runner.store().load().unwrap().paused);
}

#[tokio::test(start_paused = true)]
async fn test_control_client_reinjects_after_navigation() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, _sink) = runner_for(&site, test_config());
    let injections = Arc::new(AtomicU32::new(0));

    let (stale, receiver) = mpsc::channel(1);
    drop(receiver);
    let client = ControlClient::connected(
        ServerInjector {
            runner: Arc::clone(&runner),
            injections: Arc::clone(&injections),
        },
        stale,
    );

    assert!(client.stop_automation().await.unwrap().ok);
    assert_eq!(injections.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_leaves_queue_alone() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, _sink) = runner_for(&site, test_config());
    runner
        .store()
        .replace(vec![item("Grace", "Fractions")], settings("Maths", false))
        .unwrap();

    let outcome = runner
        .run_single(item("Ada", "Fractions"), settings("Maths", false))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(runner.store().load().unwrap().queue.len(), 1);
    assert_eq!(site.page.reload_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_batch_over_channel() {
    let site = FakeSite::new(SiteOptions::default());
    let (runner, sink) = runner_for(&site, test_config());
    let client = ControlClient::new(ServerInjector {
        runner: Arc::clone(&runner),
        injections: Arc::new(AtomicU32::new(0)),
    });

    client
        .start_batch(
            runner.store(),
            vec![item("Ada", "Fractions"), item("Grace", "Fractions")],
            settings("Maths", false),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(site.created().len(), 1);
    assert_eq!(site.page.reload_count(), 1);

    site.reset();
    run_to_idle(&runner, &site).await;
    assert_eq!(site.created().len(), 2);
    assert_eq!(sink.completions(), 1);
}
