//! Round-trip delivery tests: everything submitted comes out of the sink,
//! in per-producer submission order.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use oluk::Logger;

/// Sink that records everything written to it, shareable with the test.
#[derive(Clone)]
struct RecordingSink(Arc<Mutex<Vec<u8>>>);

impl RecordingSink {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

fn fast_logger() -> Arc<Logger> {
    Logger::builder()
        .poll_period(Duration::from_millis(1))
        .build()
}

#[test]
#[cfg_attr(miri, ignore)]
fn three_entries_arrive_in_order() {
    let logger = fast_logger();
    let summary = RecordingSink::new();
    logger
        .start_logging(Box::new(summary.clone()), Box::new(RecordingSink::new()))
        .unwrap();
    logger.start_io_thread();

    let producer = logger.register_producer();
    for msg in ["a", "b", "c"] {
        producer.submit(move |log| log.summary(msg));
    }
    drop(producer);

    assert!(wait_for(
        || summary.lines().len() == 3,
        Duration::from_secs(5)
    ));
    assert_eq!(summary.lines(), vec!["a", "b", "c"]);

    logger.stop_logging().unwrap();
    logger.stop_io_thread();
}

#[test]
#[cfg_attr(miri, ignore)]
fn single_entry_single_drain() {
    let logger = fast_logger();
    let summary = RecordingSink::new();
    logger
        .start_logging(Box::new(summary.clone()), Box::new(RecordingSink::new()))
        .unwrap();
    logger.start_io_thread();

    let producer = logger.register_producer();
    producer.submit(|log| log.summary("only"));
    drop(producer);

    assert!(wait_for(
        || !summary.lines().is_empty(),
        Duration::from_secs(5)
    ));
    // Exactly once: give the I/O thread a few more ticks to mis-deliver.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(summary.lines(), vec!["only"]);

    logger.stop_io_thread();
}

#[test]
#[cfg_attr(miri, ignore)]
fn two_producers_each_keep_their_order() {
    let logger = fast_logger();
    let summary = RecordingSink::new();
    logger
        .start_logging(Box::new(summary.clone()), Box::new(RecordingSink::new()))
        .unwrap();
    logger.start_io_thread();

    let mut handles = Vec::new();
    for (name, msgs) in [("p1", ["a", "b"]), ("p2", ["x", "y"])] {
        let logger = logger.clone();
        handles.push(thread::spawn(move || {
            let producer = logger.register_producer();
            for msg in msgs {
                producer.submit(move |log| log.summary(&format!("{}:{}", name, msg)));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(wait_for(
        || summary.lines().len() == 4,
        Duration::from_secs(5)
    ));
    let lines = summary.lines();
    let p1: Vec<_> = lines.iter().filter(|l| l.starts_with("p1:")).collect();
    let p2: Vec<_> = lines.iter().filter(|l| l.starts_with("p2:")).collect();
    assert_eq!(p1, vec!["p1:a", "p1:b"]);
    assert_eq!(p2, vec!["p2:x", "p2:y"]);

    logger.stop_io_thread();
}

#[test]
#[cfg_attr(miri, ignore)]
fn per_producer_sequences_are_exact() {
    const PRODUCERS: usize = 4;
    const ENTRIES: usize = 500;

    let logger = fast_logger();
    let summary = RecordingSink::new();
    logger
        .start_logging(Box::new(summary.clone()), Box::new(RecordingSink::new()))
        .unwrap();
    logger.start_io_thread();

    let mut handles = Vec::new();
    for p in 0..PRODUCERS {
        let logger = logger.clone();
        handles.push(thread::spawn(move || {
            let producer = logger.register_producer();
            for i in 0..ENTRIES {
                producer.submit(move |log| log.summary(&format!("p{}:{}", p, i)));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(wait_for(
        || summary.lines().len() == PRODUCERS * ENTRIES,
        Duration::from_secs(30)
    ));

    let lines = summary.lines();
    for p in 0..PRODUCERS {
        let prefix = format!("p{}:", p);
        let seen: Vec<_> = lines.iter().filter(|l| l.starts_with(&prefix)).collect();
        let expected: Vec<String> = (0..ENTRIES).map(|i| format!("p{}:{}", p, i)).collect();
        assert_eq!(seen, expected.iter().collect::<Vec<_>>());
    }

    logger.stop_io_thread();
}
