//! Stress tests for the log and the cell.
//!
//! These push both primitives with realistic mixed workloads: producers
//! hammering appends while scanners take snapshots and a cleanup thread
//! drains trash; a reader herd racing a churning writer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ringtail::{BoundedLog, MemoryUsage, RcuCell};

#[derive(Debug)]
struct CallRecord {
    producer: usize,
    seq: usize,
    endpoint: String,
}

impl MemoryUsage for CallRecord {
    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.endpoint.capacity()
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn log_survives_producers_scanners_and_a_drainer() {
    const PRODUCERS: usize = 8;
    const SCANNERS: usize = 2;
    const RECORDS_PER_PRODUCER: usize = 20_000;

    let log = Arc::new(BoundedLog::new(4096, 4).unwrap());
    let done = Arc::new(AtomicBool::new(false));
    let scans_completed = Arc::new(AtomicUsize::new(0));
    let total_drained = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let log = Arc::clone(&log);
        handles.push(thread::spawn(move || {
            for seq in 0..RECORDS_PER_PRODUCER {
                log.append(CallRecord {
                    producer,
                    seq,
                    endpoint: format!("/api/v1/items/{}", seq % 100),
                });
            }
        }));
    }

    let mut scanners = Vec::new();
    for _ in 0..SCANNERS {
        let log = Arc::clone(&log);
        let done = Arc::clone(&done);
        let scans_completed = Arc::clone(&scans_completed);
        scanners.push(thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                // Within one scan: no duplicates, per-producer sequence
                // numbers strictly descending.
                let mut seen = HashSet::new();
                let mut last_seq = [usize::MAX; PRODUCERS];
                log.scan(|r| {
                    assert!(seen.insert((r.producer, r.seq)));
                    assert!(r.seq < last_seq[r.producer]);
                    last_seq[r.producer] = r.seq;
                });
                scans_completed.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    let drainer = {
        let log = Arc::clone(&log);
        let done = Arc::clone(&done);
        let total_drained = Arc::clone(&total_drained);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                total_drained.fetch_add(log.drain_trash(), Ordering::Relaxed);
                thread::sleep(Duration::from_millis(1));
            }
            total_drained.fetch_add(log.drain_trash(), Ordering::Relaxed);
        })
    };

    for handle in handles {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for scanner in scanners {
        scanner.join().unwrap();
    }
    drainer.join().unwrap();

    let elapsed = start.elapsed();
    let appends = PRODUCERS * RECORDS_PER_PRODUCER;
    println!("log stress:");
    println!("  {} appends in {:?}", appends, elapsed);
    println!(
        "  {:.0} appends/sec",
        appends as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  {} scans, {} lists drained",
        scans_completed.load(Ordering::Relaxed),
        total_drained.load(Ordering::Relaxed)
    );

    assert!(total_drained.load(Ordering::Relaxed) > 0);
}

#[test]
#[cfg_attr(miri, ignore)]
fn cell_survives_a_reader_herd_under_churn() {
    const READERS: usize = 8;
    const UPDATES: usize = 2_000;

    let cell = Arc::new(RcuCell::new(String::from("generation-0")));
    let done = Arc::new(AtomicBool::new(false));
    let reads_completed = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let mut readers = Vec::new();
    for _ in 0..READERS {
        let cell = Arc::clone(&cell);
        let done = Arc::clone(&done);
        let reads_completed = Arc::clone(&reads_completed);
        readers.push(thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let len = cell.read(|v| v.len());
                assert!(len >= "generation-0".len());
                reads_completed.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    // Writer churns as fast as reclamation allows.
    for generation in 1..=UPDATES {
        let retired = cell.update(format!("generation-{generation}"));
        drop(retired); // waits for stragglers, then frees
    }

    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    let elapsed = start.elapsed();
    let reads = reads_completed.load(Ordering::Relaxed);
    println!("cell stress:");
    println!(
        "  {} reads, {} updates in {:?}",
        reads, UPDATES, elapsed
    );
    println!("  {:.0} reads/sec", reads as f64 / elapsed.as_secs_f64());

    assert!(reads > 0);
    assert!(cell.can_reclaim(u64::MAX));
}
