use stage_pipeline::{Pipeline, PipelineBuilder, PipelineError, Transform};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn counter() -> impl FnMut() -> u64 + Send + 'static {
    let mut next = 0;
    move || {
        let value = next;
        next += 1;
        value
    }
}

#[test]
fn test_double_then_increment() {
    init_tracing();
    let double: Transform<u64> = Box::new(|x: u64| x * 2);
    let increment: Transform<u64> = Box::new(|x: u64| x + 1);
    let pipeline = Pipeline::new(counter(), vec![double, increment]).expect("Pipeline build failed");

    let results: Vec<u64> = (0..10)
        .map(|_| pipeline.get_next_result().expect("Result failed"))
        .collect();
    assert_eq!(results, vec![1, 3, 5, 7, 9, 11, 13, 15, 17, 19]);

    pipeline.shutdown().expect("Shutdown failed");
}

#[test]
fn test_fifo_order_with_uneven_stage_timing() {
    init_tracing();
    let mut builder = PipelineBuilder::new(counter()).name("fifo");
    for stage in 0..5u64 {
        builder = builder.stage(format!("jitter-{stage}"), move |x: u64| {
            thread::sleep(Duration::from_micros(((x + stage) % 7) * 40));
            x
        });
    }
    let pipeline = builder.build().expect("Pipeline build failed");

    for expected in 0..200 {
        assert_eq!(pipeline.get_next_result().expect("Result failed"), expected);
    }
}

#[test]
fn test_links_never_hold_two_items() {
    init_tracing();
    let pipeline = PipelineBuilder::new(counter())
        .stage("a", |x| x + 1)
        .stage("b", |x| x + 1)
        .stage("c", |x| x + 1)
        .build()
        .expect("Pipeline build failed");
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let sampler = scope.spawn(|| {
            let mut samples = 0u64;
            while !done.load(Ordering::Relaxed) {
                for link in 0..pipeline.stage_count() {
                    let stats = pipeline.link_stats(link).expect("Link missing");
                    assert!(stats.occupancy() <= 1, "link {link}: {stats:?}");
                }
                samples += 1;
            }
            samples
        });

        for expected in 0..2000 {
            assert_eq!(pipeline.get_next_result().expect("Result failed"), expected + 3);
        }
        done.store(true, Ordering::Relaxed);
        assert!(sampler.join().expect("Sampler panicked") > 0);
    });
}

#[test]
fn test_backpressure_pauses_source() {
    init_tracing();
    let produced = Arc::new(AtomicU64::new(0));
    let calls = Arc::clone(&produced);
    let mut next = counter();
    let pipeline = PipelineBuilder::new(move || {
        calls.fetch_add(1, Ordering::Relaxed);
        next()
    })
    .stage("identity", |x| x)
    .stage("identity", |x| x)
    .build()
    .expect("Pipeline build failed");

    // Nobody consumes: every link and every stage fills up, then the source blocks
    thread::sleep(Duration::from_millis(100));
    let paused = produced.load(Ordering::Relaxed);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(produced.load(Ordering::Relaxed), paused);

    // one item per link plus one in the hands of each stage
    let stages = pipeline.stage_count() as u64;
    assert!(paused <= 2 * stages, "produced {paused} while paused");
    let source_runs = pipeline.stage_metrics(0).expect("Metrics missing").run_time().count() as u64;
    assert_eq!(source_runs, paused);

    // Resuming delivers everything in order, nothing was lost
    for expected in 0..paused + 50 {
        assert_eq!(pipeline.get_next_result().expect("Result failed"), expected);
    }
}

#[test]
fn test_get_next_result_timeout() {
    init_tracing();
    let (gate, release) = crossbeam::channel::unbounded::<u64>();
    let pipeline = PipelineBuilder::new(move || release.recv().unwrap_or(u64::MAX))
        .stage("square", |x: u64| x.saturating_mul(x))
        .build()
        .expect("Pipeline build failed");

    let waited = pipeline
        .get_next_result_timeout(Duration::from_millis(30))
        .expect("Timeout call failed");
    assert_eq!(waited, None);

    gate.send(12).expect("Gate closed");
    let result = pipeline
        .get_next_result_timeout(Duration::from_secs(5))
        .expect("Timeout call failed");
    assert_eq!(result, Some(144));

    // let the producer return so teardown is not waiting on user code
    drop(gate);
}

#[test]
fn test_failure_encoded_in_item() {
    init_tracing();
    let mut next = counter();
    let pipeline = PipelineBuilder::new(move || -> Result<u64, String> { Ok(next()) })
        .stage("reject-odd", |item| {
            item.and_then(|x| {
                if x % 2 == 1 {
                    Err(format!("odd value {x}"))
                } else {
                    Ok(x)
                }
            })
        })
        .stage("halve", |item| item.map(|x| x / 2))
        .build()
        .expect("Pipeline build failed");

    assert_eq!(pipeline.get_next_result().expect("Result failed"), Ok(0));
    assert_eq!(
        pipeline.get_next_result().expect("Result failed"),
        Err("odd value 1".to_string())
    );
    assert_eq!(pipeline.get_next_result().expect("Result failed"), Ok(1));
}

#[test]
fn test_stateful_stage() {
    init_tracing();
    let mut total = 0;
    let pipeline = PipelineBuilder::new(counter())
        .stage("running-sum", move |x| {
            total += x;
            total
        })
        .build()
        .expect("Pipeline build failed");

    let sums: Vec<u64> = (0..5)
        .map(|_| pipeline.get_next_result().expect("Result failed"))
        .collect();
    assert_eq!(sums, vec![0, 1, 3, 6, 10]);
}

#[test]
fn test_panicking_stage_disconnects_output() {
    init_tracing();
    let pipeline = PipelineBuilder::new(counter())
        .stage("fragile", |x: u64| -> u64 {
            if x == 3 {
                panic!("cannot handle 3");
            }
            x
        })
        .stage("identity", |x| x)
        .build()
        .expect("Pipeline build failed");

    for expected in 0..3 {
        assert_eq!(pipeline.get_next_result().expect("Result failed"), expected);
    }
    assert!(matches!(
        pipeline.get_next_result(),
        Err(PipelineError::Disconnected)
    ));

    let err = pipeline.shutdown().unwrap_err();
    assert!(matches!(err, PipelineError::StagePanicked { stage: 1 }));
}

#[test]
fn test_stage_metrics_collection() {
    init_tracing();
    let pipeline = PipelineBuilder::new(counter())
        .stage("slow", |x| {
            thread::sleep(Duration::from_millis(1));
            x
        })
        .build()
        .expect("Pipeline build failed");

    for _ in 0..20 {
        pipeline.get_next_result().expect("Result failed");
    }

    let metrics = pipeline.stage_metrics(1).expect("Metrics missing");
    let snapshot = metrics.snapshot();
    assert!(snapshot.total_processed >= 20);
    assert!(snapshot.run_p50_us >= 1000.0);
    assert!(snapshot.throughput_ips > 0.0);
    assert_eq!(pipeline.link_stats(1).expect("Link missing").delivered, 20);
}
