//! End-to-end organize runs against the in-memory host.

use serde_json::json;
use tokio::sync::mpsc;

use tabshelf_lib::models::browser::{Tab, Window, WindowType, TAB_GROUP_ID_NONE};
use tabshelf_lib::models::operation::SolverStrategy;
use tabshelf_lib::services::classifier_service::ScriptedClassifier;
use tabshelf_lib::services::memory_host::{HostFaults, HostFixture, InMemoryHost};
use tabshelf_lib::state::{ChannelProgress, NoopProgress, OrganizePhase, ProgressEvent};
use tabshelf_lib::{run_full_pipeline, AppError, AppState, OrganizeConfig, PipelineCtx};

fn web_tab(id: i64, window_id: i64, index: usize, url: &str) -> Tab {
    Tab {
        id,
        window_id,
        index,
        url: url.to_string(),
        title: String::new(),
        group_id: TAB_GROUP_ID_NONE,
        active: false,
        pinned: false,
        discarded: false,
    }
}

fn host_with(windows: &[(i64, Vec<(i64, String)>)]) -> InMemoryHost {
    let mut fixture = HostFixture::default();
    for (window_id, tabs) in windows {
        fixture.windows.push(Window {
            id: *window_id,
            focused: false,
            window_type: WindowType::Normal,
        });
        for (index, (tab_id, url)) in tabs.iter().enumerate() {
            fixture.tabs.push(web_tab(*tab_id, *window_id, index, url));
        }
    }
    InMemoryHost::new(fixture)
}

fn urls(entries: &[(i64, &str)]) -> Vec<(i64, String)> {
    entries
        .iter()
        .map(|(id, url)| (*id, url.to_string()))
        .collect()
}

/// `count` tabs on one domain, ids starting at `first_id`.
fn domain_run(first_id: i64, count: usize, domain: &str) -> Vec<(i64, String)> {
    (0..count as i64)
        .map(|n| (first_id + n, format!("https://{domain}/{n}")))
        .collect()
}

fn window_sizes(host: &InMemoryHost) -> Vec<usize> {
    let mut sizes = host
        .window_ids()
        .into_iter()
        .map(|id| host.tabs_in_window(id).len())
        .collect::<Vec<_>>();
    sizes.sort_unstable();
    sizes
}

#[tokio::test(start_paused = true)]
async fn small_window_is_grouped_in_place() {
    let host = host_with(&[(
        1,
        urls(&[
            (1, "https://a.com/1"),
            (2, "https://b.com/1"),
            (3, "https://a.com/2"),
            (4, "https://b.com/2"),
            (5, "https://a.com/3"),
        ]),
    )]);
    let state = AppState::default();
    let ctx = PipelineCtx::new(&host, &state, &NoopProgress);

    let report = run_full_pipeline(&ctx, false).await.unwrap();

    assert_eq!(report.strategy, SolverStrategy::Deterministic);
    assert_eq!(report.groups_created, 2);
    assert_eq!(report.tabs_moved, 0);
    assert_eq!(report.windows_created, 0);
    assert_eq!(report.errors, 0);
    assert_eq!(host.window_ids(), vec![1]);

    let a_group = host.tab(1).unwrap().group_id;
    assert_ne!(a_group, TAB_GROUP_ID_NONE);
    assert_eq!(host.tab(3).unwrap().group_id, a_group);
    assert_eq!(host.tab(5).unwrap().group_id, a_group);
    assert_eq!(host.group(a_group).unwrap().title, "a.com");
    let b_group = host.tab(2).unwrap().group_id;
    assert_ne!(b_group, a_group);
    assert_eq!(host.group(b_group).unwrap().title, "b.com");
}

#[tokio::test(start_paused = true)]
async fn huge_domain_is_sharded_across_windows() {
    let host = host_with(&[(1, domain_run(1, 250, "news.example"))]);
    let state = AppState::default();
    let ctx = PipelineCtx::new(&host, &state, &NoopProgress);

    let report = run_full_pipeline(&ctx, false).await.unwrap();

    assert_eq!(report.errors, 0);
    assert!(report.windows_created >= 2);
    assert_eq!(report.groups_created, 3);
    assert_eq!(window_sizes(&host), vec![50, 100, 100]);

    let mut titles = host
        .fixture()
        .groups
        .into_iter()
        .map(|group| group.title)
        .collect::<Vec<_>>();
    titles.sort();
    assert_eq!(
        titles,
        vec!["1-news.example", "2-news.example", "3-news.example"]
    );
}

#[tokio::test(start_paused = true)]
async fn second_run_is_already_organized() {
    let mut mixed = domain_run(1, 40, "docs.example");
    mixed.extend(urls(&[(41, "https://a.com/1"), (42, "https://a.com/2")]));
    let host = host_with(&[(1, mixed), (2, domain_run(100, 120, "feed.example"))]);
    let state = AppState::default();

    let ctx = PipelineCtx::new(&host, &state, &NoopProgress);
    let first = run_full_pipeline(&ctx, false).await.unwrap();
    assert!(!first.already_organized);
    assert_eq!(first.errors, 0);

    let before = host.fixture();
    let calls = host.mutation_calls();
    let ctx = PipelineCtx::new(&host, &state, &NoopProgress);
    let second = run_full_pipeline(&ctx, false).await.unwrap();

    assert!(second.already_organized);
    assert_eq!(second.tabs_moved, 0);
    assert_eq!(host.mutation_calls(), calls);
    assert_eq!(host.fixture(), before);
}

#[tokio::test(start_paused = true)]
async fn straggler_windows_fold_into_largest() {
    let host = host_with(&[
        (1, domain_run(1, 40, "docs.example")),
        (2, urls(&[(50, "https://x.com/1"), (51, "https://y.com/1")])),
        (3, urls(&[(60, "https://c.com/1"), (61, "https://c.com/2")])),
    ]);
    let state = AppState::default();
    let ctx = PipelineCtx::new(&host, &state, &NoopProgress);

    let report = run_full_pipeline(&ctx, false).await.unwrap();

    assert_eq!(report.straggler_tabs_moved, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(host.window_ids(), vec![1, 3]);
    let main = host.tabs_in_window(1);
    assert_eq!(main.len(), 42);
    assert!(main.contains(&50) && main.contains(&51));
    assert_eq!(host.tabs_in_window(3), vec![60, 61]);
    assert!(!host.tab(50).unwrap().is_grouped());
}

#[tokio::test(start_paused = true)]
async fn classifier_groups_by_topic() {
    let host = host_with(&[(
        1,
        urls(&[
            (1, "https://a.com/paper"),
            (2, "https://b.com/recipe"),
            (3, "https://c.com/paper"),
        ]),
    )]);
    let state = AppState::default();
    let classifier = ScriptedClassifier::new([json!({
        "groups": [{"name": "Research", "color": "purple", "tabIndices": [0, 2]}]
    })]);
    let ctx = PipelineCtx::new(&host, &state, &NoopProgress).with_classifier(&classifier);

    let report = run_full_pipeline(&ctx, true).await.unwrap();

    assert_eq!(report.strategy, SolverStrategy::Classifier);
    assert_eq!(report.groups_created, 1);
    let group_id = host.tab(1).unwrap().group_id;
    assert_eq!(host.tab(3).unwrap().group_id, group_id);
    assert!(!host.tab(2).unwrap().is_grouped());
    let group = host.group(group_id).unwrap();
    assert_eq!(group.title, "Research");
    assert_eq!(group.color.to_string(), "purple");
}

#[tokio::test(start_paused = true)]
async fn unusable_classifier_answers_fall_back_to_domains() {
    for answer in [json!({}), json!({"groups": "not an array"})] {
        let host = host_with(&[(
            1,
            urls(&[
                (1, "https://a.com/1"),
                (2, "https://a.com/2"),
                (3, "https://b.com/1"),
            ]),
        )]);
        let state = AppState::default();
        let classifier = ScriptedClassifier::new([answer.clone()]);
        let ctx = PipelineCtx::new(&host, &state, &NoopProgress).with_classifier(&classifier);

        let report = run_full_pipeline(&ctx, true).await.unwrap();

        assert_eq!(report.strategy, SolverStrategy::ClassifierFallback, "{answer}");
        assert_eq!(report.groups_created, 1);
        let group = host.group(host.tab(1).unwrap().group_id).unwrap();
        assert_eq!(group.title, "a.com");
    }
}

#[tokio::test(start_paused = true)]
async fn silently_dropped_moves_are_repaired() {
    let host = host_with(&[
        (
            1,
            urls(&[
                (1, "https://a.com/1"),
                (2, "https://a.com/2"),
                (3, "https://a.com/3"),
            ]),
        ),
        (
            2,
            urls(&[
                (4, "https://a.com/4"),
                (5, "https://b.com/1"),
                (6, "https://b.com/2"),
            ]),
        ),
    ]);
    host.set_faults(HostFaults {
        dropped_moves: [4].into_iter().collect(),
        ..HostFaults::default()
    });
    let state = AppState::default();
    let ctx = PipelineCtx::new(&host, &state, &NoopProgress);

    let report = run_full_pipeline(&ctx, false).await.unwrap();

    assert_eq!(report.errors, 0);
    assert_eq!(host.window_ids(), vec![1]);
    assert_eq!(host.tab(4).unwrap().window_id, 1);
    let a_group = host.tab(1).unwrap().group_id;
    assert_eq!(host.tab(4).unwrap().group_id, a_group);
}

#[tokio::test(start_paused = true)]
async fn failed_read_reports_error_phase() {
    let host = host_with(&[(1, urls(&[(1, "https://a.com/1")]))]);
    host.set_faults(HostFaults {
        fail_reads: true,
        ..HostFaults::default()
    });
    let state = AppState::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = ChannelProgress(tx);
    let ctx = PipelineCtx::new(&host, &state, &sink);

    let err = run_full_pipeline(&ctx, false).await.unwrap_err();
    assert!(matches!(err, AppError::Host(_)));
    assert_eq!(host.mutation_calls(), 0);

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    assert_eq!(last.map(|event| event.phase), Some(OrganizePhase::Error));
    assert!(!state.is_organize_running());
}

#[tokio::test(start_paused = true)]
async fn tabs_closed_mid_run_are_skipped() {
    let host = host_with(&[
        (
            1,
            urls(&[
                (1, "https://a.com/1"),
                (2, "https://a.com/2"),
                (3, "https://a.com/3"),
            ]),
        ),
        (2, urls(&[(4, "https://a.com/4"), (5, "https://a.com/5")])),
    ]);
    let state = AppState::default();
    let sink = |event: ProgressEvent| {
        if event.phase == OrganizePhase::Executing {
            host.close_tab(5);
        }
    };
    let ctx = PipelineCtx::new(&host, &state, &sink);

    let report = run_full_pipeline(&ctx, false).await.unwrap();

    assert_eq!(report.errors, 0);
    assert!(host.tab(5).is_none());
    assert_eq!(host.window_ids(), vec![1]);
    assert_eq!(host.tabs_in_window(1), vec![1, 2, 3, 4]);
    let group_id = host.tab(1).unwrap().group_id;
    assert!((2..=4).all(|id| host.tab(id).unwrap().group_id == group_id));
}

#[tokio::test(start_paused = true)]
async fn closed_window_seed_does_not_scatter_its_group() {
    let mut tabs = domain_run(1, 3, "a.com");
    tabs.extend(domain_run(4, 3, "b.com"));
    let host = host_with(&[(1, tabs)]);
    let state = AppState::new(OrganizeConfig {
        window_cap: 3,
        shard_size: 3,
        small_group_limit: 3,
        ..OrganizeConfig::default()
    });
    let sink = |event: ProgressEvent| {
        if event.phase == OrganizePhase::Executing && host.tab(4).is_some() {
            host.close_tab(1);
            host.close_tab(4);
        }
    };
    let ctx = PipelineCtx::new(&host, &state, &sink);

    let report = run_full_pipeline(&ctx, false).await.unwrap();

    assert_eq!(report.errors, 0);
    assert_eq!(report.windows_created, 1);
    assert_eq!(report.groups_created, 2);
    assert_eq!(window_sizes(&host), vec![2, 2]);
    for (first, second) in [(2, 3), (5, 6)] {
        let first = host.tab(first).unwrap();
        let second = host.tab(second).unwrap();
        assert!(first.is_grouped());
        assert_eq!(first.group_id, second.group_id);
        assert_eq!(first.window_id, second.window_id);
    }
    assert_ne!(host.tab(2).unwrap().window_id, host.tab(5).unwrap().window_id);
}
