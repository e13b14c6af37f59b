/// Integration tests for the capture → buffer → storage pipeline
use fnhost_logs::{
    capture::{ConsoleArg, Interceptor, MemorySink, Stream},
    context::{self, RequestContext},
    host,
    logs::{
        FlushOutcome, LogDb, LogLevel, LogQuery, LogRecorder, LogService, LogServiceOptions,
        LogTrimmer, LogTrimmingConfig, NewLogEntry,
    },
    registry::InMemoryFunctionRegistry,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    service: LogService,
    interceptor: Arc<Interceptor>,
    sink: Arc<MemorySink>,
}

async fn harness(options: LogServiceOptions) -> Harness {
    let db = Arc::new(LogDb::new("sqlite::memory:").await.unwrap());
    let service = LogService::spawn(db, options);
    let sink = Arc::new(MemorySink::new());
    let interceptor = Arc::new(Interceptor::new(Arc::new(service.clone()), sink.clone()));
    interceptor.install();

    Harness {
        service,
        interceptor,
        sink,
    }
}

/// Flush until everything stored so far is committed
///
/// An explicit flush is skipped while the background worker is mid-flush.
async fn drain(service: &LogService) {
    loop {
        let outcome = service.flush().await;
        if outcome != FlushOutcome::Skipped && service.pending_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn entry(function_id: &str, message: String) -> NewLogEntry {
    NewLogEntry {
        request_id: format!("req-{}", message),
        function_id: Some(function_id.to_string()),
        level: LogLevel::Log,
        message,
        args: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations_are_attributed_correctly() {
    // One buffer epoch, so capture order within each request is exact
    let h = harness(LogServiceOptions {
        max_batch_size: 1000,
        max_delay: Duration::from_secs(60),
        ..Default::default()
    })
    .await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let service = h.service.clone();
        let interceptor = h.interceptor.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = RequestContext::new(format!("req-{}", i), format!("fn-{}", i % 4));
            host::run_invocation(&service, ctx, async {
                for step in 0..3 {
                    interceptor.console(LogLevel::Info, &[format!("step {}", step).into()]);
                    tokio::time::sleep(Duration::from_millis((i % 3) as u64)).await;
                }
                interceptor.write_stream(Stream::Stdout, b"done\n").unwrap();
                Ok::<_, String>(())
            })
            .await
        }));
    }
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }
    drain(&h.service).await;

    for i in 0..20 {
        let logs = h.service.get_by_request_id(&format!("req-{}", i)).await.unwrap();
        let summary: Vec<(LogLevel, &str)> =
            logs.iter().map(|l| (l.level, l.message.as_str())).collect();

        assert_eq!(
            summary,
            vec![
                (LogLevel::ExecStart, "Execution started"),
                (LogLevel::Info, "step 0"),
                (LogLevel::Info, "step 1"),
                (LogLevel::Info, "step 2"),
                (LogLevel::Stdout, "done"),
                (LogLevel::ExecEnd, "Execution completed"),
            ],
            "request {}",
            i
        );
        let expected_fn = format!("fn-{}", i % 4);
        assert!(logs.iter().all(|l| l.function_id.as_deref() == Some(expected_fn.as_str())));
    }

    assert_eq!(h.sink.contents(Stream::Stdout), "");
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_system_output_is_never_stored() {
    let h = harness(LogServiceOptions::default()).await;

    h.interceptor.console(LogLevel::Log, &["booting".into()]);
    h.interceptor.console(LogLevel::Warn, &["disk".into(), ConsoleArg::from_serialize(&90)]);
    h.interceptor.write_stream(Stream::Stdout, b"raw system line\n").unwrap();

    context::run(RequestContext::new("req-1", "fn-1"), async {
        h.interceptor.console(LogLevel::Log, &["inside".into()]);
    })
    .await;

    drain(&h.service).await;

    let recent = h.service.get_recent(None).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].message, "inside");
    assert_eq!(h.sink.contents(Stream::Stdout), "booting\nraw system line\n");
    assert_eq!(h.sink.contents(Stream::Stderr), "disk 90\n");

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_spawned_work_keeps_the_invocation_context() {
    let h = harness(LogServiceOptions::default()).await;

    let interceptor = h.interceptor.clone();
    context::run(RequestContext::new("req-spawn", "fn-spawn"), async move {
        let async_child = {
            let interceptor = interceptor.clone();
            context::spawn(async move {
                interceptor.console(LogLevel::Log, &["from task".into()]);
            })
        };
        let blocking_child = {
            let interceptor = interceptor.clone();
            context::spawn_blocking(move || {
                interceptor.write_stream(Stream::Stderr, b"from blocking\n").unwrap();
            })
        };
        async_child.await.unwrap();
        blocking_child.await.unwrap();
    })
    .await;

    drain(&h.service).await;
    let logs = h.service.get_by_request_id("req-spawn").await.unwrap();
    let messages: HashSet<&str> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, HashSet::from(["from task", "from blocking"]));

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_pagination_walks_every_entry_once() {
    let h = harness(LogServiceOptions {
        max_batch_size: 4,
        ..Default::default()
    })
    .await;

    for i in 0..25 {
        h.service.store(entry("fn-page", format!("m{:02}", i)));
    }
    h.service.store(entry("fn-other", "elsewhere".to_string()));
    drain(&h.service).await;

    let mut seen = Vec::new();
    let mut cursor = None;
    let mut pages = 0;
    loop {
        let page = h
            .service
            .get_paginated(LogQuery {
                function_id: Some("fn-page".to_string()),
                limit: 10,
                cursor: cursor.take(),
                ..Default::default()
            })
            .await
            .unwrap();
        pages += 1;
        seen.extend(page.logs.iter().map(|l| l.message.clone()));

        if !page.has_more {
            assert!(page.next_cursor.is_none());
            break;
        }
        cursor = page.next_cursor;
    }

    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 25);
    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), 25);

    // Same rows, same order as one unpaged descending read
    let all: Vec<String> = h
        .service
        .get_by_function_id("fn-page", None)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.message)
        .collect();
    assert_eq!(seen, all);

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_level_filter_with_pagination() {
    let h = harness(LogServiceOptions::default()).await;

    for i in 0..6 {
        let mut e = entry("fn-lvl", format!("e{}", i));
        e.level = if i % 2 == 0 { LogLevel::Error } else { LogLevel::Info };
        h.service.store(e);
    }
    drain(&h.service).await;

    let page = h
        .service
        .get_paginated(LogQuery {
            function_id: Some("fn-lvl".to_string()),
            levels: Some(vec![LogLevel::Error]),
            limit: 2,
            cursor: None,
        })
        .await
        .unwrap();

    assert_eq!(page.logs.len(), 2);
    assert!(page.has_more);
    assert!(page.logs.iter().all(|l| l.level == LogLevel::Error));

    let rest = h
        .service
        .get_paginated(LogQuery {
            function_id: Some("fn-lvl".to_string()),
            levels: Some(vec![LogLevel::Error]),
            limit: 2,
            cursor: page.next_cursor,
        })
        .await
        .unwrap();
    assert_eq!(rest.logs.len(), 1);
    assert!(!rest.has_more);
    assert!(rest.prev_cursor.is_some());

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_deleted_function_entries_become_orphaned() {
    let registry = Arc::new(InMemoryFunctionRegistry::new(["fn-live", "fn-doomed"]));
    let h = harness(LogServiceOptions {
        max_delay: Duration::from_secs(60),
        registry: Some(registry.clone()),
        ..Default::default()
    })
    .await;

    h.service.store(entry("fn-live", "kept".to_string()));
    h.service.store(entry("fn-doomed", "orphan".to_string()));
    registry.unregister("fn-doomed");
    assert!(matches!(h.service.flush().await, FlushOutcome::Written(2)));

    let stats = h.service.db().get_stats().await.unwrap();
    assert_eq!(stats.log_count, 2);
    assert_eq!(stats.orphaned_count, 1);
    assert_eq!(
        h.service.get_distinct_function_ids().await.unwrap(),
        vec!["fn-live".to_string()]
    );

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_retention_pass_keeps_newest_per_function() {
    let h = harness(LogServiceOptions::default()).await;

    for i in 0..8 {
        h.service.store(entry("fn-a", format!("a{}", i)));
    }
    for i in 0..3 {
        h.service.store(entry("fn-b", format!("b{}", i)));
    }
    drain(&h.service).await;

    let trimmer = LogTrimmer::new(
        h.service.db().clone(),
        LogTrimmingConfig {
            trimming_interval_seconds: 3600,
            max_logs_per_function: 5,
            retention_seconds: 0,
        },
    );
    let stats = trimmer.run_once().await.unwrap().unwrap();
    assert_eq!(stats.trimmed_deleted, 3);
    assert_eq!(stats.functions_checked, 2);

    let remaining: Vec<String> = h
        .service
        .get_by_function_id("fn-a", None)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.message)
        .collect();
    assert_eq!(remaining, vec!["a7", "a6", "a5", "a4", "a3"]);
    assert_eq!(h.service.get_by_function_id("fn-b", None).await.unwrap().len(), 3);

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_buffer_and_rejects_late_entries() {
    let h = harness(LogServiceOptions {
        max_batch_size: 1000,
        max_delay: Duration::from_secs(60),
        ..Default::default()
    })
    .await;

    for i in 0..5 {
        h.service.store(entry("fn-s", format!("s{}", i)));
    }
    assert_eq!(h.service.pending_count(), 5);

    h.service.shutdown().await;
    assert!(h.service.is_shutdown());
    assert_eq!(h.service.db().count().await.unwrap(), 5);

    h.service.store(entry("fn-s", "late".to_string()));
    assert_eq!(h.service.pending_count(), 0);
}
