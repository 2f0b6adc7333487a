//! Command-line driver for the transmit FIFO: synthetic workloads and frame dumps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tx_fabric::{ChannelNotify, NotifyReceiver, TxQueue};
use tx_fifo::wire::decode_frame;
use tx_fifo::{FifoConfig, PayloadType, DEFAULT_BLOCK_ALIGNMENT, DEFAULT_CAPACITY, MAX_PAYLOAD_LEN};

/// Text rendering helpers used by the CLI commands.
mod render {
    use std::fmt::Write;

    use tx_fabric::QueueMetricsSnapshot;
    use tx_fifo::wire::DecodedFrame;
    use tx_fifo::{PayloadType, TxStats};

    pub fn type_name(ty: PayloadType) -> &'static str {
        match ty {
            PayloadType::Data => "data",
            PayloadType::Ctrl => "ctrl",
            PayloadType::Trace => "trace",
            PayloadType::ResetWarm => "reset-warm",
            PayloadType::ResetCold => "reset-cold",
            PayloadType::EData => "edata",
        }
    }

    fn opt(value: Option<usize>) -> String {
        value.map_or_else(|| "-".to_string(), |v| v.to_string())
    }

    fn mean(value: Option<f64>) -> String {
        value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
    }

    /// Format retrieval statistics and queue counters after a run.
    pub fn stats(stats: &TxStats, metrics: &QueueMetricsSnapshot, retries: u64) -> String {
        let mut out = String::new();
        writeln!(
            out,
            "Frames: {} payloads={} (min {}, max {}, mean {})",
            stats.frames,
            stats.payloads,
            opt(stats.payloads_min),
            opt(stats.payloads_max),
            mean(stats.mean_payloads())
        )
        .expect("write frames");
        writeln!(
            out,
            "Bytes: {} (min {}, max {}, mean {})",
            stats.bytes,
            opt(stats.size_min),
            opt(stats.size_max),
            mean(stats.mean_frame_size())
        )
        .expect("write bytes");
        writeln!(
            out,
            "Queue: appended={} no_space={} too_large={} retrieved={} acked={} send_failed={} kicks={} retries={}",
            metrics.appended,
            metrics.no_space,
            metrics.too_large,
            metrics.retrieved,
            metrics.acked,
            metrics.send_failed,
            metrics.kicks,
            retries
        )
        .expect("write queue");
        out
    }

    /// Format a decoded frame's header followed by one line per payload.
    pub fn frame(frame: &DecodedFrame<'_>) -> String {
        let mut out = String::new();
        writeln!(
            out,
            "Frame #{}: {} bytes, {} payload(s), padding {}",
            frame.sequence,
            frame.size,
            frame.payloads.len(),
            frame.padding
        )
        .expect("write frame header");
        for (idx, pld) in frame.payloads.iter().enumerate() {
            writeln!(
                out,
                "  [{idx}] {} {} bytes",
                type_name(pld.ty),
                pld.bytes.len()
            )
            .expect("write payload");
        }
        out
    }

    /// Format a hexdump of a frame, 16 bytes per line.
    pub fn hexdump(bytes: &[u8]) -> String {
        let mut out = String::new();
        for (line, chunk) in bytes.chunks(16).enumerate() {
            write!(out, "{:04X}:", line * 16).expect("write prefix");
            for byte in chunk {
                write!(out, " {byte:02X}").expect("write byte");
            }
            out.push('\n');
        }
        if bytes.is_empty() {
            out.push_str("0000:\n");
        }
        out
    }
}

/// Drive the transmit FIFO with synthetic payloads.
#[derive(Parser, Debug)]
#[command(author, version, about = "Exercise the transmit FIFO", long_about = None)]
struct Cli {
    #[command(flatten)]
    fifo: FifoArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct FifoArgs {
    /// Ring capacity in bytes.
    #[arg(long, value_parser = parse_usize, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,
    /// Transport block alignment in bytes.
    #[arg(long, value_parser = parse_usize, default_value_t = DEFAULT_BLOCK_ALIGNMENT)]
    block_alignment: usize,
    /// Frame size ceiling in bytes (defaults to half the capacity).
    #[arg(long, value_parser = parse_usize)]
    frame_ceiling: Option<usize>,
}

impl FifoArgs {
    fn config(&self) -> Result<FifoConfig> {
        let mut cfg = FifoConfig::new(self.capacity, self.block_alignment);
        if let Some(ceiling) = self.frame_ceiling {
            cfg = cfg.with_frame_ceiling(ceiling);
        }
        cfg.validate().context("invalid fifo configuration")?;
        Ok(cfg)
    }
}

#[derive(Args, Debug)]
struct WorkloadArgs {
    /// Number of payloads to generate.
    #[arg(short = 'n', long, default_value_t = 1000)]
    payloads: usize,
    /// Smallest payload length.
    #[arg(long, value_parser = parse_usize, default_value_t = 1)]
    min_len: usize,
    /// Largest payload length.
    #[arg(long, value_parser = parse_usize, default_value_t = 1400)]
    max_len: usize,
    /// Every Nth payload is a control message (0 disables).
    #[arg(long, default_value_t = 10)]
    ctrl_every: usize,
    /// RNG seed for payload lengths and contents.
    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push a workload through a producer and a transport thread and print statistics.
    Run {
        #[command(flatten)]
        workload: WorkloadArgs,
        /// Give up if the workload has not drained after this many seconds.
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Queue a workload without draining and hexdump the first frames.
    Dump {
        #[command(flatten)]
        workload: WorkloadArgs,
        /// Number of frames to print.
        #[arg(short, long, default_value_t = 2)]
        frames: usize,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = cli.fifo.config()?;

    match cli.command {
        Command::Run {
            workload,
            timeout_secs,
        } => handle_run(cfg, &workload, Duration::from_secs(timeout_secs)),
        Command::Dump { workload, frames } => handle_dump(cfg, &workload, frames),
    }
}

fn generate(args: &WorkloadArgs) -> Result<Vec<(PayloadType, Vec<u8>)>> {
    if args.min_len > args.max_len {
        bail!("--min-len {} exceeds --max-len {}", args.min_len, args.max_len);
    }
    if args.max_len > MAX_PAYLOAD_LEN {
        bail!("--max-len {} exceeds the payload limit {MAX_PAYLOAD_LEN}", args.max_len);
    }
    let mut rng = StdRng::seed_from_u64(args.seed);
    let workload = (0..args.payloads)
        .map(|idx| {
            let len = rng.gen_range(args.min_len..=args.max_len);
            let mut payload = vec![0u8; len];
            rng.fill(payload.as_mut_slice());
            let ty = if args.ctrl_every != 0 && idx % args.ctrl_every == args.ctrl_every - 1 {
                PayloadType::Ctrl
            } else {
                PayloadType::Data
            };
            (ty, payload)
        })
        .collect();
    Ok(workload)
}

fn handle_run(cfg: FifoConfig, args: &WorkloadArgs, timeout: Duration) -> Result<()> {
    let workload = generate(args)?;
    let (notify, rx) = ChannelNotify::new();
    let queue = TxQueue::setup(cfg, notify).context("failed to set up tx queue")?;
    let done = Arc::new(AtomicBool::new(false));
    let deadline = Instant::now() + timeout;

    let transport = {
        let queue = queue.clone();
        let kick = rx.kick.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || -> Result<usize> {
            let mut delivered = 0usize;
            loop {
                let _ = kick.recv_timeout(Duration::from_millis(1));
                let finished = done.load(Ordering::Acquire);
                queue.pump(|bytes| {
                    decode_frame(bytes).map(|frame| delivered += frame.payloads.len())
                })?;
                if finished {
                    return Ok(delivered);
                }
                if Instant::now() > deadline {
                    bail!("transport timed out after {delivered} payloads");
                }
            }
        })
    };

    let mut retries = 0u64;
    let produced = produce(&queue, &rx, &workload, deadline, &mut retries);
    done.store(true, Ordering::Release);
    let delivered = transport
        .join()
        .map_err(|_| anyhow!("transport thread panicked"))??;
    produced?;

    if delivered != workload.len() {
        bail!("delivered {delivered} of {} payloads", workload.len());
    }
    let stats = queue.stats()?;
    print!("{}", render::stats(&stats, &queue.metrics(), retries));
    queue.release();
    Ok(())
}

fn produce(
    queue: &TxQueue<ChannelNotify>,
    rx: &NotifyReceiver,
    workload: &[(PayloadType, Vec<u8>)],
    deadline: Instant,
    retries: &mut u64,
) -> Result<()> {
    for (idx, (ty, payload)) in workload.iter().enumerate() {
        loop {
            match queue.append(payload, *ty) {
                Ok(_) => break,
                Err(err) if err.is_no_space() => {
                    if Instant::now() > deadline {
                        bail!("producer timed out at payload {idx}");
                    }
                    *retries += 1;
                    let _ = rx.space.recv_timeout(Duration::from_millis(1));
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("append of payload {idx} failed"))
                }
            }
        }
    }
    Ok(())
}

fn handle_dump(cfg: FifoConfig, args: &WorkloadArgs, frames: usize) -> Result<()> {
    let workload = generate(args)?;
    let queue = TxQueue::polling(cfg).context("failed to set up tx queue")?;

    let mut queued = 0usize;
    for (ty, payload) in &workload {
        match queue.append(payload, *ty) {
            Ok(_) => queued += 1,
            Err(err) if err.is_no_space() => break,
            Err(err) => return Err(err).context("append failed"),
        }
    }
    if queued < workload.len() {
        log::info!("ring full after {queued} of {} payloads", workload.len());
    }

    for _ in 0..frames {
        let Some(frame) = queue.next_ready()? else {
            break;
        };
        let decoded = decode_frame(&frame.bytes)
            .with_context(|| format!("frame #{} failed to decode", frame.sequence))?;
        print!("{}", render::frame(&decoded));
        print!("{}", render::hexdump(&frame.bytes));
        queue.acknowledge_sent()?;
    }
    Ok(())
}

fn parse_usize(input: &str) -> Result<usize, String> {
    if let Some(stripped) = input.strip_prefix("0x") {
        usize::from_str_radix(stripped, 16).map_err(|_| format!("invalid hex value '{input}'"))
    } else {
        input
            .parse::<usize>()
            .map_err(|_| format!("invalid number '{input}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::render;
    use insta::assert_snapshot;
    use tx_fabric::QueueMetricsSnapshot;
    use tx_fifo::wire::decode_frame;
    use tx_fifo::{FifoConfig, PayloadType, TxFifo, TxStats};

    fn sample_frame() -> Vec<u8> {
        let mut fifo = TxFifo::setup(FifoConfig::new(1024, 16)).expect("setup");
        fifo.append(b"hello", PayloadType::Data).expect("append");
        fifo.append(&[0x01, 0x02], PayloadType::Ctrl).expect("append");
        let frame = fifo.get_next_ready().expect("frame");
        frame.bytes.to_vec()
    }

    #[test]
    fn stats_render_matches_expectation() {
        let stats = TxStats {
            frames: 3,
            payloads: 16,
            payloads_min: Some(1),
            payloads_max: Some(12),
            bytes: 704,
            size_min: Some(64),
            size_max: Some(512),
        };
        let metrics = QueueMetricsSnapshot {
            appended: 16,
            no_space: 2,
            too_large: 0,
            retrieved: 3,
            acked: 3,
            send_failed: 0,
            kicks: 18,
        };
        assert_snapshot!(render::stats(&stats, &metrics, 2), @r"
        Frames: 3 payloads=16 (min 1, max 12, mean 5.33)
        Bytes: 704 (min 64, max 512, mean 234.67)
        Queue: appended=16 no_space=2 too_large=0 retrieved=3 acked=3 send_failed=0 kicks=18 retries=2
        ");
    }

    #[test]
    fn empty_stats_render_dashes() {
        let out = render::stats(&TxStats::default(), &QueueMetricsSnapshot::default(), 0);
        assert_snapshot!(out.lines().next().unwrap_or_default(), @"Frames: 0 payloads=0 (min -, max -, mean -)");
    }

    #[test]
    fn frame_render_matches_expectation() {
        let bytes = sample_frame();
        let decoded = decode_frame(&bytes).expect("decode");
        assert_snapshot!(render::frame(&decoded), @r"
        Frame #0: 64 bytes, 2 payload(s), padding 0
          [0] data 5 bytes
          [1] ctrl 2 bytes
        ");
    }

    #[test]
    fn hexdump_render_matches_expectation() {
        assert_snapshot!(render::hexdump(&sample_frame()), @r"
        0000: 0D 90 FE CA 00 00 00 00 40 00 02 00 00 00 00 00
        0010: 05 00 00 00 02 00 01 00 00 00 00 00 00 00 00 00
        0020: 68 65 6C 6C 6F AD AD AD AD AD AD AD AD AD AD AD
        0030: 01 02 AD AD AD AD AD AD AD AD AD AD AD AD AD AD
        ");
    }
}
