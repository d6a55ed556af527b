use cellgrid::{PoolConfig, PoolError, ThreadPool, THREADS_ENV};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_zero_threads_rejected() {
    assert!(matches!(ThreadPool::new(0), Err(PoolError::NoThreads)));
}

#[test]
fn test_wait_on_idle_pool_returns() {
    let pool = ThreadPool::new(3).unwrap();
    assert_eq!(pool.thread_count(), 3);
    pool.wait().unwrap();
    assert_eq!(pool.pending(), 0);
}

#[test]
fn test_every_item_runs_once() {
    let pool = ThreadPool::new(4).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let hits = Arc::clone(&hits);
        pool.enqueue(move || {
            hits.fetch_add(1, Ordering::Relaxed);
        });
    }
    pool.wait().unwrap();

    assert_eq!(hits.load(Ordering::Relaxed), 1000);
    assert_eq!(pool.pending(), 0);
}

#[test]
fn test_single_worker_runs_in_fifo_order() {
    let pool = ThreadPool::new(1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..50 {
        let order = Arc::clone(&order);
        pool.enqueue(move || order.lock().unwrap().push(i));
    }
    pool.wait().unwrap();

    assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
}

#[test]
fn test_wait_blocks_until_slow_items_finish() {
    let pool = ThreadPool::new(2).unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let done = Arc::clone(&done);
        pool.enqueue(move || {
            thread::sleep(Duration::from_millis(20));
            done.fetch_add(1, Ordering::SeqCst);
        });
    }
    pool.wait().unwrap();

    assert_eq!(done.load(Ordering::SeqCst), 4);
}

#[test]
fn test_pool_reusable_across_batches() {
    let pool = ThreadPool::new(3).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    for batch in 1..=5 {
        for _ in 0..20 {
            let hits = Arc::clone(&hits);
            pool.enqueue(move || {
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait().unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), batch * 20);
    }
}

#[test]
fn test_terminate_drains_pending_items() {
    let pool = ThreadPool::new(2).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let hits = Arc::clone(&hits);
        pool.enqueue(move || {
            thread::sleep(Duration::from_micros(100));
            hits.fetch_add(1, Ordering::Relaxed);
        });
    }
    // No wait: terminate must still run everything that was queued.
    pool.terminate();

    assert_eq!(hits.load(Ordering::Relaxed), 100);
}

#[test]
fn test_drop_joins_workers() {
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let pool = ThreadPool::new(2).unwrap();
        for _ in 0..10 {
            let hits = Arc::clone(&hits);
            pool.enqueue(move || {
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }
    }
    assert_eq!(hits.load(Ordering::Relaxed), 10);
}

#[test]
fn test_panicking_item_reported_by_wait() {
    let pool = ThreadPool::new(2).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    pool.enqueue(|| panic!("boom"));
    for _ in 0..10 {
        let hits = Arc::clone(&hits);
        pool.enqueue(move || {
            hits.fetch_add(1, Ordering::Relaxed);
        });
    }

    match pool.wait() {
        Err(PoolError::WorkPanicked { count }) => assert_eq!(count, 1),
        other => panic!("expected WorkPanicked, got {:?}", other),
    }
    assert_eq!(hits.load(Ordering::Relaxed), 10);

    // The panic is reported once; the pool keeps working.
    pool.enqueue(|| {});
    pool.wait().unwrap();
}

#[test]
fn test_config_names_threads() {
    let config = PoolConfig::default()
        .threads(2)
        .name_prefix("grid-test")
        .stack_size(256 * 1024);
    let pool = ThreadPool::with_config(config).unwrap();
    let names = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..8 {
        let names = Arc::clone(&names);
        pool.enqueue(move || {
            let name = thread::current().name().map(str::to_string);
            names.lock().unwrap().push(name);
        });
    }
    pool.wait().unwrap();

    for name in names.lock().unwrap().iter() {
        let name = name.as_deref().unwrap_or_default();
        assert!(name.starts_with("grid-test-"), "unexpected thread name {name}");
    }
}

#[test]
fn test_default_config_uses_all_cpus() {
    let config = PoolConfig::default();
    assert_eq!(config.num_threads, num_cpus::get());
    assert_eq!(config.thread_name_prefix, "cellgrid-worker");
    assert!(config.stack_size.is_none());
}

#[test]
fn test_config_from_env() {
    std::env::set_var(THREADS_ENV, "3");
    assert_eq!(PoolConfig::from_env().num_threads, 3);

    std::env::set_var(THREADS_ENV, "zero");
    assert_eq!(PoolConfig::from_env().num_threads, num_cpus::get());

    std::env::set_var(THREADS_ENV, "0");
    assert_eq!(PoolConfig::from_env().num_threads, num_cpus::get());

    std::env::remove_var(THREADS_ENV);
}
