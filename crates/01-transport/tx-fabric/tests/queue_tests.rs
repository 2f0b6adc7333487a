//! Shared transmit queue integration tests.
//! Covers notification ordering, the release/restart lifecycle, send failure
//! handling, a producer/transport thread pair, and (optionally) property-based
//! checks of end-to-end ordering.

use std::convert::Infallible;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use tx_fabric::{ChannelNotify, FabricError, TxNotify, TxQueue};
use tx_fifo::wire::decode_frame;
use tx_fifo::{FifoConfig, PayloadType, MAX_PAYLOAD_LEN};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct CountingNotify {
    kicks: AtomicUsize,
    spaces: AtomicUsize,
}

impl TxNotify for CountingNotify {
    fn kick(&self) {
        self.kicks.fetch_add(1, Ordering::SeqCst);
    }

    fn space_available(&self) {
        self.spaces.fetch_add(1, Ordering::SeqCst);
    }
}

fn payload_for(i: u32) -> Vec<u8> {
    i.to_le_bytes().repeat(1 + (i % 13) as usize)
}

/// Decodes every frame and flattens the payloads, checking sequence numbers
/// run consecutively from `first_sequence`.
fn flatten(frames: &[Vec<u8>], first_sequence: u32) -> Vec<(PayloadType, Vec<u8>)> {
    let mut out = Vec::new();
    for (idx, bytes) in frames.iter().enumerate() {
        let frame = decode_frame(bytes).expect("decode frame");
        assert_eq!(frame.sequence, first_sequence + idx as u32);
        out.extend(
            frame
                .payloads
                .into_iter()
                .map(|pld| (pld.ty, pld.bytes.to_vec())),
        );
    }
    out
}

/// Every append kicks the transport, including the ones declined for space.
#[test]
fn append_kicks_after_every_call() {
    init_logging();
    let notify = Arc::new(CountingNotify::default());
    let cfg = FifoConfig::new(256, 16).with_frame_ceiling(128);
    let queue = TxQueue::setup(cfg, Arc::clone(&notify)).expect("setup");

    let mut attempts = 0;
    let mut declined = false;
    while attempts < 10 {
        attempts += 1;
        match queue.append(&[0x5A; 100], PayloadType::Data) {
            Ok(_) => {}
            Err(err) => {
                assert!(err.is_no_space(), "unexpected error: {err}");
                declined = true;
                break;
            }
        }
    }

    assert!(declined, "ring never filled up");
    assert_eq!(notify.kicks.load(Ordering::SeqCst), attempts);
    assert!(Arc::ptr_eq(queue.notifier(), &notify));
    let metrics = queue.metrics();
    assert_eq!(metrics.kicks as usize, attempts);
    assert_eq!(metrics.no_space, 1);
    assert_eq!(metrics.appended as usize, attempts - 1);
    assert_eq!(notify.spaces.load(Ordering::SeqCst), 0);
}

/// Frames come out in append order with consecutive sequence numbers.
#[test]
fn pump_delivers_frames_in_order() {
    init_logging();
    let queue = TxQueue::polling(FifoConfig::new(4096, 16)).expect("setup");
    let mut frames = Vec::new();
    let mut expected = Vec::new();

    for i in 0..200u32 {
        let payload = payload_for(i);
        let ty = if i % 17 == 0 {
            PayloadType::Ctrl
        } else {
            PayloadType::Data
        };
        if let Err(err) = queue.append(&payload, ty) {
            assert!(err.is_no_space(), "unexpected error: {err}");
            queue
                .pump(|bytes| -> Result<(), Infallible> {
                    frames.push(bytes.to_vec());
                    Ok(())
                })
                .expect("pump");
            queue.append(&payload, ty).expect("append after drain");
        }
        expected.push((ty, payload));
    }
    queue
        .pump(|bytes| -> Result<(), Infallible> {
            frames.push(bytes.to_vec());
            Ok(())
        })
        .expect("pump");

    assert_eq!(flatten(&frames, 0), expected);
    assert_eq!(queue.free_bytes().expect("free"), 4096);
    let stats = queue.stats().expect("stats");
    assert_eq!(stats.frames, frames.len() as u64);
    assert_eq!(stats.payloads, 200);
}

/// A failed send drops the frame but still returns its ring space.
#[test]
fn failed_send_is_acknowledged_and_dropped() {
    init_logging();
    let notify = Arc::new(CountingNotify::default());
    let queue = TxQueue::setup(FifoConfig::new(1024, 16), Arc::clone(&notify)).expect("setup");

    queue.append(b"first", PayloadType::Data).expect("append");
    queue.append(b"", PayloadType::ResetWarm).expect("append");
    queue.append(b"third", PayloadType::Data).expect("append");

    let mut delivered = Vec::new();
    let sent = queue
        .pump(|bytes| {
            let frame = decode_frame(bytes).expect("decode");
            if frame.sequence == 1 {
                return Err("link down");
            }
            delivered.push(frame.payloads[0].bytes.to_vec());
            Ok(())
        })
        .expect("pump");

    assert_eq!(sent, 3);
    assert_eq!(delivered, vec![b"first".to_vec(), b"third".to_vec()]);
    let metrics = queue.metrics();
    assert_eq!(metrics.retrieved, 3);
    assert_eq!(metrics.acked, 3);
    assert_eq!(metrics.send_failed, 1);
    assert_eq!(notify.spaces.load(Ordering::SeqCst), 3);
    assert_eq!(queue.free_bytes().expect("free"), 1024);
}

/// Only one frame is handed out until it is acknowledged.
#[test]
fn in_flight_frame_blocks_retrieval() {
    let queue = TxQueue::polling(FifoConfig::new(1024, 16)).expect("setup");
    queue.append(b"a", PayloadType::Data).expect("append");
    queue.append(b"b", PayloadType::ResetCold).expect("append");

    let first = queue.next_ready().expect("next").expect("frame");
    assert_eq!(first.sequence, 0);
    assert_eq!(first.bytes.len() % 16, 0);
    assert!(queue.next_ready().expect("next").is_none());

    assert!(queue.acknowledge_sent().expect("ack"));
    assert!(!queue.acknowledge_sent().expect("ack"));

    let second = queue.next_ready().expect("next").expect("frame");
    assert_eq!(second.sequence, 1);
    assert_eq!(second.payload_count, 1);
    let decoded = decode_frame(&second.bytes).expect("decode");
    assert_eq!(decoded.payloads[0].ty, PayloadType::ResetCold);
    assert!(queue.acknowledge_sent().expect("ack"));
}

#[test]
fn oversized_payload_is_counted_and_rejected() {
    let queue = TxQueue::polling(FifoConfig::default()).expect("setup");
    let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
    let err = queue.append(&big, PayloadType::Data).unwrap_err();
    assert!(matches!(err, FabricError::Fifo(_)));
    assert!(!err.is_no_space());
    assert_eq!(queue.metrics().too_large, 1);
    assert!(queue.next_ready().expect("next").is_none());
}

/// Released queues refuse work until restarted; a restart begins again at
/// sequence zero with an empty ring.
#[test]
fn release_and_restart_lifecycle() {
    init_logging();
    let queue = TxQueue::polling(FifoConfig::new(1024, 16)).expect("setup");
    queue.append(b"before", PayloadType::Data).expect("append");
    let frame = queue.next_ready().expect("next").expect("frame");
    assert_eq!(frame.sequence, 0);

    assert!(queue.release());
    assert!(queue.is_released());
    assert!(!queue.release());
    assert!(matches!(
        queue.append(b"x", PayloadType::Data),
        Err(FabricError::Released)
    ));
    assert!(matches!(queue.next_ready(), Err(FabricError::Released)));
    assert!(matches!(queue.acknowledge_sent(), Err(FabricError::Released)));
    assert!(matches!(queue.stats(), Err(FabricError::Released)));

    queue.restart().expect("restart");
    assert!(!queue.is_released());
    queue.append(b"after", PayloadType::Data).expect("append");
    let frame = queue.next_ready().expect("next").expect("frame");
    assert_eq!(frame.sequence, 0);
    let decoded = decode_frame(&frame.bytes).expect("decode");
    assert_eq!(decoded.payloads[0].bytes, b"after");
}

/// Restarting a live queue drops whatever was queued or in flight.
#[test]
fn restart_discards_queued_frames() {
    let queue = TxQueue::polling(FifoConfig::new(1024, 16)).expect("setup");
    queue.append(b"one", PayloadType::Data).expect("append");
    queue.next_ready().expect("next").expect("frame");
    queue.append(b"two", PayloadType::Data).expect("append");

    queue.restart().expect("restart");
    assert!(queue.next_ready().expect("next").is_none());
    assert!(!queue.acknowledge_sent().expect("ack"));
    assert_eq!(queue.stats().expect("stats").frames, 0);
}

/// A producer thread backs off on `NoSpace` until the transport thread's
/// acknowledgements free space; nothing is lost or reordered.
#[test]
fn producer_and_transport_threads_preserve_order() {
    init_logging();
    const TOTAL: u32 = 2000;
    let (notify, rx) = ChannelNotify::new();
    let cfg = FifoConfig::new(2048, 64).with_frame_ceiling(512);
    let queue = TxQueue::setup(cfg, notify).expect("setup");
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let queue = queue.clone();
        let space = rx.space.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(20);
            for i in 0..TOTAL {
                let payload = payload_for(i);
                loop {
                    match queue.append(&payload, PayloadType::Data) {
                        Ok(_) => break,
                        Err(err) if err.is_no_space() => {
                            assert!(Instant::now() < deadline, "producer starved");
                            let _ = space.recv_timeout(Duration::from_millis(5));
                        }
                        Err(err) => panic!("append failed: {err}"),
                    }
                }
            }
            done.store(true, Ordering::Release);
        })
    };

    let transport = {
        let queue = queue.clone();
        let kick = rx.kick.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(20);
            let mut next_sequence = 0u32;
            let mut seen = Vec::new();
            loop {
                let _ = kick.recv_timeout(Duration::from_millis(5));
                let finished = done.load(Ordering::Acquire);
                queue
                    .pump(|bytes| -> Result<(), Infallible> {
                        let frame = decode_frame(bytes).expect("decode");
                        assert_eq!(frame.sequence, next_sequence);
                        assert_eq!(bytes.len() % 64, 0);
                        next_sequence += 1;
                        seen.extend(frame.payloads.iter().map(|pld| pld.bytes.to_vec()));
                        Ok(())
                    })
                    .expect("pump");
                if finished {
                    break;
                }
                assert!(Instant::now() < deadline, "transport timed out");
            }
            seen
        })
    };

    producer.join().expect("producer");
    let seen = transport.join().expect("transport");
    let expected: Vec<_> = (0..TOTAL).map(payload_for).collect();
    assert_eq!(seen.len(), expected.len());
    assert_eq!(seen, expected);

    let metrics = queue.metrics();
    assert_eq!(metrics.appended, u64::from(TOTAL));
    assert_eq!(metrics.retrieved, metrics.acked);
}

#[cfg(feature = "proptest")]
mod prop {
    use super::*;
    use proptest::collection;
    use proptest::prelude::*;

    fn ty_for(tag: u8) -> PayloadType {
        match tag {
            0 => PayloadType::Ctrl,
            1 => PayloadType::ResetWarm,
            2 => PayloadType::Trace,
            _ => PayloadType::Data,
        }
    }

    proptest! {
        /// Arbitrary payload mixes come out of the queue whole and in order.
        #[test]
        fn payloads_survive_in_order(
            ops in collection::vec((0usize..300, 0u8..8, any::<u8>()), 1..150)
        ) {
            let queue = TxQueue::polling(FifoConfig::new(1024, 16).with_frame_ceiling(512))
                .expect("setup");
            let mut frames = Vec::new();
            let mut expected = Vec::new();

            for (len, tag, fill) in ops {
                let payload = vec![fill; len];
                let ty = ty_for(tag);
                if let Err(err) = queue.append(&payload, ty) {
                    prop_assert!(err.is_no_space());
                    queue
                        .pump(|bytes| -> Result<(), Infallible> {
                            frames.push(bytes.to_vec());
                            Ok(())
                        })
                        .expect("pump");
                    prop_assert!(queue.append(&payload, ty).is_ok());
                }
                expected.push((ty, payload));
            }
            queue
                .pump(|bytes| -> Result<(), Infallible> {
                    frames.push(bytes.to_vec());
                    Ok(())
                })
                .expect("pump");

            prop_assert_eq!(flatten(&frames, 0), expected);
        }
    }
}
