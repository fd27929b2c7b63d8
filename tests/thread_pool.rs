use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_utils::sync::WaitGroup;
use forcepool::{PoolConfig, PoolError, PoolState, Result, ThreadPool};

const THREADS: usize = 4;

#[test]
fn returns_every_submitted_value() -> Result<()> {
    let pool = ThreadPool::new(THREADS)?;
    let handles = (0..500)
        .map(|i| pool.submit(move || i))
        .collect::<Result<Vec<_>>>()?;

    let values = handles
        .into_iter()
        .map(|h| h.join())
        .collect::<Result<HashSet<i32>>>()?;
    assert_eq!(values, (0..500).collect());
    Ok(())
}

#[test]
fn failing_task_leaves_pool_usable() -> Result<()> {
    let pool = ThreadPool::new(1)?;

    let mut panicking = pool.submit(|| -> u32 {
        // Keeps the panic message off the console.
        panic_control::disable_hook_in_current_thread();
        panic!("contact solver diverged");
    })?;
    match panicking.get() {
        Err(PoolError::TaskFailed(cause)) => assert!(cause.contains("contact solver diverged")),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let mut erroring = pool.submit_fallible(|| Err::<u32, _>("negative mass"))?;
    match erroring.get() {
        Err(PoolError::TaskFailed(cause)) => assert_eq!(cause, "negative mass"),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let mut ok = pool.submit(|| 7u32)?;
    assert_eq!(*ok.get()?, 7);

    // Counters are bumped after delivery; joining the workers settles them.
    pool.shutdown();
    let stats = pool.stats();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.succeeded, 1);
    Ok(())
}

#[test]
fn many_panicking_tasks_do_not_kill_workers() -> Result<()> {
    const TASK_NUM: usize = 200;

    let pool = ThreadPool::new(THREADS)?;
    for _ in 0..TASK_NUM {
        pool.submit(|| {
            panic_control::disable_hook_in_current_thread();
            panic!();
        })?;
    }

    let counter = Arc::new(AtomicUsize::new(0));
    let wg = WaitGroup::new();
    for _ in 0..TASK_NUM {
        let counter = counter.clone();
        let wg = wg.clone();
        pool.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(wg);
        })?;
    }
    wg.wait();
    assert_eq!(counter.load(Ordering::SeqCst), TASK_NUM);
    Ok(())
}

#[test]
fn shutdown_joins_every_worker() -> Result<()> {
    thread_local! {
        static MARKER: RefCell<Option<Arc<()>>> = const { RefCell::new(None) };
    }

    let marker = Arc::new(());
    let barrier = Arc::new(Barrier::new(THREADS));
    let pool = ThreadPool::new(THREADS)?;

    // The barrier forces each task onto a different worker, so every
    // worker thread ends up holding a marker clone until it exits.
    for _ in 0..THREADS {
        let marker = marker.clone();
        let barrier = barrier.clone();
        pool.submit(move || {
            MARKER.with(|m| *m.borrow_mut() = Some(marker));
            barrier.wait();
        })?;
    }

    pool.shutdown();
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(Arc::strong_count(&marker), 1);
    drop(pool);
    Ok(())
}

#[test]
fn submit_after_shutdown_is_rejected() -> Result<()> {
    let pool = ThreadPool::new(2)?;
    pool.shutdown();
    assert!(matches!(pool.submit(|| 1), Err(PoolError::PoolClosed)));
    assert_eq!(pool.stats().submitted, 0);
    assert_eq!(pool.stats().queued, 0);
    Ok(())
}

#[test]
fn submit_after_close_is_rejected() -> Result<()> {
    let pool = ThreadPool::new(2)?;
    pool.close();
    assert!(matches!(
        pool.submit_fallible(|| Ok::<_, String>(1)),
        Err(PoolError::PoolClosed)
    ));
    Ok(())
}

#[test]
fn concurrent_increments_are_not_lost() -> Result<()> {
    const TASKS: usize = 10_000;

    for _ in 0..5 {
        let pool = ThreadPool::new(THREADS)?;
        let counter = Arc::new(Mutex::new(0usize));
        let handles = (0..TASKS)
            .map(|_| {
                let counter = counter.clone();
                pool.submit(move || *counter.lock().unwrap() += 1)
            })
            .collect::<Result<Vec<_>>>()?;
        for handle in handles {
            handle.join()?;
        }
        assert_eq!(*counter.lock().unwrap(), TASKS);
    }
    Ok(())
}

#[test]
fn get_replays_outcome() -> Result<()> {
    let pool = ThreadPool::new(2)?;
    let mut handle = pool.submit(|| vec![1.5f64, -2.0])?;
    assert_eq!(handle.get()?, &vec![1.5, -2.0]);
    assert!(handle.is_ready());
    assert_eq!(handle.get()?, &vec![1.5, -2.0]);
    Ok(())
}

#[test]
fn zero_workers_is_invalid() {
    assert!(matches!(ThreadPool::new(0), Err(PoolError::InvalidConfig(_))));
    let config = PoolConfig {
        num_threads: 0,
        ..PoolConfig::default()
    };
    assert!(matches!(
        ThreadPool::with_config(config),
        Err(PoolError::InvalidConfig(_))
    ));
}

#[test]
fn shutdown_drains_queued_tasks() -> Result<()> {
    let pool = ThreadPool::new(1)?;
    let done = Arc::new(AtomicUsize::new(0));
    let handles = (0..50)
        .map(|_| {
            let done = done.clone();
            pool.submit(move || {
                thread::sleep(Duration::from_micros(200));
                done.fetch_add(1, Ordering::SeqCst)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    pool.shutdown();
    assert_eq!(done.load(Ordering::SeqCst), 50);
    for handle in handles {
        handle.join()?;
    }
    Ok(())
}

#[test]
fn drop_drains_queued_tasks() -> Result<()> {
    let done = Arc::new(AtomicUsize::new(0));
    {
        let pool = ThreadPool::new(2)?;
        for _ in 0..100 {
            let done = done.clone();
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })?;
        }
    }
    assert_eq!(done.load(Ordering::SeqCst), 100);
    Ok(())
}

#[test]
fn shutdown_now_cancels_queued_tasks() -> Result<()> {
    let pool = Arc::new(ThreadPool::new(1)?);
    let (started_tx, started_rx) = crossbeam::channel::bounded(0);
    let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(0);

    let running = pool.submit(move || {
        started_tx.send(()).unwrap();
        gate_rx.recv().unwrap();
        "finished"
    })?;
    started_rx.recv().unwrap();

    let queued = (0..10)
        .map(|i| pool.submit(move || i))
        .collect::<Result<Vec<_>>>()?;

    // Releases the running task only after the queued ones were cancelled.
    let opener = {
        let pool = pool.clone();
        thread::spawn(move || {
            while pool.stats().cancelled < 10 {
                thread::sleep(Duration::from_millis(1));
            }
            gate_tx.send(()).unwrap();
        })
    };

    assert_eq!(pool.shutdown_now(), 10);
    opener.join().unwrap();

    assert_eq!(running.join()?, "finished");
    for handle in queued {
        assert!(matches!(handle.join(), Err(PoolError::TaskCancelled)));
    }
    assert_eq!(pool.state(), PoolState::Stopped);
    Ok(())
}

#[test]
fn lifecycle_states() -> Result<()> {
    let pool = ThreadPool::new(2)?;
    assert_eq!(pool.state(), PoolState::Running);
    assert_eq!(pool.num_threads(), 2);

    pool.close();
    assert_eq!(pool.state(), PoolState::Draining);

    pool.shutdown();
    assert_eq!(pool.state(), PoolState::Stopped);

    // Idempotent.
    pool.shutdown();
    pool.close();
    assert_eq!(pool.state(), PoolState::Stopped);
    Ok(())
}

#[test]
fn single_worker_runs_in_submission_order() -> Result<()> {
    let pool = ThreadPool::new(1)?;
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..100 {
        let order = order.clone();
        pool.submit(move || order.lock().unwrap().push(i))?;
    }
    pool.shutdown();
    assert_eq!(*order.lock().unwrap(), (0..100).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn many_producers_share_one_pool() -> Result<()> {
    let pool = Arc::new(ThreadPool::new(THREADS)?);
    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let pool = pool.clone();
            thread::spawn(move || -> Result<u64> {
                let handles = (0..250u64)
                    .map(|i| pool.submit(move || p * 1000 + i))
                    .collect::<Result<Vec<_>>>()?;
                handles.into_iter().map(|h| h.join()).sum()
            })
        })
        .collect();

    let total: u64 = producers
        .into_iter()
        .map(|p| p.join().unwrap())
        .sum::<Result<u64>>()?;
    let expected: u64 = (0..4u64)
        .flat_map(|p| (0..250u64).map(move |i| p * 1000 + i))
        .sum();
    assert_eq!(total, expected);
    assert_eq!(pool.stats().submitted, 1000);
    Ok(())
}

#[test]
fn bounded_queue_accepts_more_than_capacity() -> Result<()> {
    let config = PoolConfig::builder()
        .num_threads(2)
        .queue_capacity(2)
        .build()?;
    let pool = ThreadPool::with_config(config)?;
    let handles = (0..200)
        .map(|i| {
            pool.submit(move || {
                thread::sleep(Duration::from_micros(50));
                i
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let sum: i32 = handles
        .into_iter()
        .map(|h| h.join())
        .sum::<Result<i32>>()?;
    assert_eq!(sum, (0..200).sum());
    Ok(())
}

#[test]
fn workers_use_configured_names() -> Result<()> {
    let config = PoolConfig::builder()
        .num_threads(1)
        .thread_name_prefix("grain")
        .build()?;
    let pool = ThreadPool::with_config(config)?;
    let name = pool
        .submit(|| thread::current().name().map(str::to_string))?
        .join()?;
    assert_eq!(name.as_deref(), Some("grain-0"));
    Ok(())
}

#[test]
fn dropping_handle_does_not_disturb_pool() -> Result<()> {
    let pool = ThreadPool::new(2)?;
    for i in 0..20 {
        drop(pool.submit(move || i)?);
    }
    pool.shutdown();
    let stats = pool.stats();
    assert_eq!(stats.submitted, 20);
    assert_eq!(stats.succeeded, 20);
    Ok(())
}

#[test]
fn concurrent_shutdown_waits_for_stop() -> Result<()> {
    let pool = Arc::new(ThreadPool::new(1)?);
    let finished = Arc::new(AtomicUsize::new(0));
    {
        let finished = finished.clone();
        pool.submit(move || {
            thread::sleep(Duration::from_millis(300));
            finished.fetch_add(1, Ordering::SeqCst);
        })?;
    }

    let first = {
        let pool = pool.clone();
        thread::spawn(move || pool.shutdown())
    };
    thread::sleep(Duration::from_millis(50));

    // Whichever call ends up joining, both return only once the pool stopped.
    pool.shutdown();
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    first.join().unwrap();
    assert_eq!(pool.state(), PoolState::Stopped);
    Ok(())
}

#[test]
fn shutdown_now_on_bounded_queue_cancels_queued_tasks() -> Result<()> {
    let config = PoolConfig::builder()
        .num_threads(1)
        .queue_capacity(4)
        .build()?;
    let pool = Arc::new(ThreadPool::with_config(config)?);
    let (started_tx, started_rx) = crossbeam::channel::bounded(0);
    let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(0);

    let running = pool.submit(move || {
        started_tx.send(()).unwrap();
        gate_rx.recv().unwrap();
    })?;
    started_rx.recv().unwrap();

    let queued = (0..4)
        .map(|i| pool.submit(move || i))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(pool.stats().queued, 4);

    let opener = {
        let pool = pool.clone();
        thread::spawn(move || {
            while pool.stats().cancelled < 4 {
                thread::sleep(Duration::from_millis(1));
            }
            gate_tx.send(()).unwrap();
        })
    };

    assert_eq!(pool.shutdown_now(), 4);
    opener.join().unwrap();

    running.join()?;
    for handle in queued {
        assert!(matches!(handle.join(), Err(PoolError::TaskCancelled)));
    }
    Ok(())
}

struct PanicsOnDrop;

impl Drop for PanicsOnDrop {
    fn drop(&mut self) {
        panic_control::disable_hook_in_current_thread();
        panic!("destructor panicked");
    }
}

#[test]
fn panicking_destructors_do_not_kill_workers() -> Result<()> {
    let pool = ThreadPool::new(1)?;
    let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(0);
    pool.submit(move || gate_rx.recv().unwrap())?;

    // The handle is gone before the task runs, so the result is dropped
    // on the worker.
    drop(pool.submit(|| PanicsOnDrop)?);
    gate_tx.send(()).unwrap();
    // Panic payload whose destructor panics as well.
    let failed = pool.submit(|| -> u32 {
        panic_control::disable_hook_in_current_thread();
        std::panic::panic_any(PanicsOnDrop)
    })?;
    assert!(matches!(failed.join(), Err(PoolError::TaskFailed(_))));

    let mut ok = pool.submit(|| 9u32)?;
    assert_eq!(*ok.get()?, 9);

    pool.shutdown();
    let stats = pool.stats();
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.failed, 1);
    Ok(())
}
