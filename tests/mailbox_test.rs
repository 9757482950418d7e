use mqbox::{ArrivedMessage, Error, Interrupt, Mailbox, QoS, Timeout, Topic, TopicFilter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn msg(topic: &str, payload: &[u8]) -> ArrivedMessage {
    ArrivedMessage::new(Topic::new(topic).unwrap(), payload.to_vec(), QoS::AtLeastOnce)
}

fn filter(s: &str) -> TopicFilter {
    TopicFilter::new(s).unwrap()
}

#[test]
fn test_parked_pop_returns_concurrent_enqueue() {
    let mailbox = Mailbox::new();
    let sent = msg("round/trip", b"hello");

    let consumer = {
        let mailbox = mailbox.clone();
        thread::spawn(move || mailbox.pop(Timeout::Never))
    };

    thread::sleep(Duration::from_millis(50));
    mailbox.enqueue(sent.clone());

    let received = consumer.join().unwrap().unwrap().unwrap();
    assert!(received.exact_eq(&sent));
    assert!(mailbox.is_empty());
}

#[test]
fn test_bounded_pop_waits_full_timeout() {
    let mailbox = Mailbox::new();
    let timeout = Duration::from_millis(100);

    let start = Instant::now();
    assert!(mailbox.pop(timeout).unwrap().is_none());
    assert!(start.elapsed() >= timeout);
}

#[test]
fn test_zero_timeout_returns_immediately() {
    let mailbox = Mailbox::new();
    let start = Instant::now();
    assert!(mailbox.pop(Timeout::IMMEDIATE).unwrap().is_none());
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_wait_all_returns_only_when_every_filter_matches() {
    let mailbox = Mailbox::new();
    let finished = Arc::new(AtomicBool::new(false));
    let delay = Duration::from_millis(100);

    let waiter = {
        let mailbox = mailbox.clone();
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            let result = mailbox.wait_all(&[filter("x/1"), filter("y/1")], Timeout::Never);
            finished.store(true, Ordering::SeqCst);
            result
        })
    };

    thread::sleep(Duration::from_millis(20));
    mailbox.enqueue(msg("x/1", b"first"));
    thread::sleep(delay);
    assert!(!finished.load(Ordering::SeqCst), "returned before y/1 arrived");

    mailbox.enqueue(msg("y/1", b"second"));
    assert!(waiter.join().unwrap().unwrap());
    // Waiting never consumes
    assert_eq!(mailbox.len(), 2);
}

#[test]
fn test_filtered_pop_ignores_non_matching_arrivals() {
    let mailbox = Mailbox::new();

    let consumer = {
        let mailbox = mailbox.clone();
        thread::spawn(move || mailbox.pop_filtered(&filter("x/+"), Duration::from_secs(5)))
    };

    thread::sleep(Duration::from_millis(20));
    mailbox.enqueue(msg("y/1", b"skip"));
    thread::sleep(Duration::from_millis(20));
    mailbox.enqueue(msg("x/1", b"take"));

    let received = consumer.join().unwrap().unwrap().unwrap();
    assert_eq!(received.topic().name(), "x/1");
    assert_eq!(mailbox.len(), 1);
    assert!(mailbox.contains(&filter("y/1")));
}

#[test]
fn test_wait_with_filter_does_not_consume() {
    let mailbox = Mailbox::new();

    let waiter = {
        let mailbox = mailbox.clone();
        thread::spawn(move || mailbox.wait(Some(&filter("status/#")), Duration::from_secs(5)))
    };

    thread::sleep(Duration::from_millis(20));
    mailbox.enqueue(msg("status/online", b"1"));

    assert!(waiter.join().unwrap().unwrap());
    assert_eq!(mailbox.len(), 1);
}

#[test]
fn test_concurrent_consumers_receive_each_message_once() {
    const CONSUMERS: usize = 4;
    const MESSAGES: usize = 400;

    let mailbox = Mailbox::new();

    let received: Vec<Vec<usize>> = crossbeam::thread::scope(|scope| {
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let mailbox = &mailbox;
                scope.spawn(move |_| {
                    let mut seen = Vec::new();
                    while let Some(m) = mailbox.pop(Duration::from_millis(200)).unwrap() {
                        let n: usize = std::str::from_utf8(m.payload()).unwrap().parse().unwrap();
                        seen.push(n);
                    }
                    seen
                })
            })
            .collect();

        for n in 0..MESSAGES {
            mailbox.enqueue(msg("load/test", n.to_string().as_bytes()));
        }

        consumers.into_iter().map(|c| c.join().unwrap()).collect()
    })
    .unwrap();

    // Every consumer sees a strictly increasing subsequence
    for seen in &received {
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    let mut all: Vec<usize> = received.into_iter().flatten().collect();
    all.sort_unstable();
    assert_eq!(all, (0..MESSAGES).collect::<Vec<_>>());
    assert_eq!(mailbox.stats().consumed, MESSAGES as u64);
}

#[test]
fn test_parked_consumer_does_not_block_readers() {
    let mailbox = Mailbox::new();
    mailbox.enqueue(msg("present", b""));
    let interrupt = Interrupt::new();

    let consumer = {
        let mailbox = mailbox.clone();
        let interrupt = interrupt.clone();
        thread::spawn(move || {
            mailbox
                .interruptible(&interrupt)
                .pop_filtered(&filter("absent"), Timeout::Never)
        })
    };

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    assert_eq!(mailbox.len(), 1);
    assert!(mailbox.contains(&filter("present")));
    assert!(!mailbox.contains_all(&[filter("present"), filter("absent")]));
    assert!(start.elapsed() < Duration::from_millis(50));

    interrupt.raise();
    assert!(matches!(consumer.join().unwrap(), Err(Error::Interrupted)));
}

#[test]
fn test_interrupt_wakes_parked_wait_promptly() {
    let mailbox = Mailbox::new();
    let interrupt = Interrupt::new();

    let waiter = {
        let mailbox = mailbox.clone();
        let interrupt = interrupt.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let result = mailbox
                .interruptible(&interrupt)
                .wait_all(&[filter("never/1"), filter("never/2")], Timeout::Never);
            (result, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    interrupt.raise();

    let (result, elapsed) = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::Interrupted)));
    assert!(elapsed < Duration::from_secs(2));
    assert!(!interrupt.is_raised());
}

#[test]
fn test_interrupt_is_distinct_from_timeout() {
    let mailbox = Mailbox::new();
    let interrupt = Interrupt::new();
    let waiter = mailbox.interruptible(&interrupt);

    assert!(waiter.pop(Duration::from_millis(20)).unwrap().is_none());
    interrupt.raise();
    assert!(matches!(
        waiter.pop(Duration::from_millis(20)),
        Err(Error::Interrupted)
    ));
}

#[test]
fn test_interrupt_racing_arrival_never_loses_message() {
    for _ in 0..50 {
        let mailbox = Mailbox::new();
        let interrupt = Interrupt::new();

        let consumer = {
            let mailbox = mailbox.clone();
            let interrupt = interrupt.clone();
            thread::spawn(move || mailbox.interruptible(&interrupt).pop(Timeout::Never))
        };

        thread::sleep(Duration::from_millis(2));
        mailbox.enqueue(msg("race", b"payload"));
        interrupt.raise();

        let delivered = match consumer.join().unwrap() {
            Ok(Some(m)) => m,
            Err(Error::Interrupted) => mailbox
                .pop(Timeout::IMMEDIATE)
                .unwrap()
                .expect("interrupted pop must leave the message buffered"),
            other => panic!("unexpected result: {:?}", other),
        };
        assert_eq!(delivered.topic().name(), "race");
        assert!(mailbox.is_empty());
    }
}
