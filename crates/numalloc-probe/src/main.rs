//! numalloc diagnostics harness
//!
//! Prints the detected topology, then exercises the process-wide allocator
//! in four phases: basic lifecycle, node placement, concurrent accounting
//! and a timed bulk run. Exits non-zero if usage accounting does not return
//! to its baseline.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use numalloc_core::topology::{distance_table, DEFAULT_SYSFS_ROOT};
use numalloc_core::{
    global, AllocatorConfig, NodeBackend, NumaPolicy, SysfsTopology, TopologyProber,
    HEADER_WIDTH,
};
use numalloc_sds::Sds;

/// numalloc-probe - Topology-aware allocator diagnostics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root of the sysfs node tree
    #[arg(long, default_value = DEFAULT_SYSFS_ROOT)]
    sysfs_root: PathBuf,

    /// Placement policy (default, distance-first, round-robin, balanced)
    #[arg(long, default_value = "default")]
    policy: NumaPolicy,

    /// Use the caller's node as default node
    #[arg(long)]
    local_default: bool,

    /// Worker threads for the thread-safety phase [default: number of CPUs]
    #[arg(long)]
    threads: Option<usize>,

    /// Blocks allocated in the performance phase
    #[arg(long, default_value_t = 1000)]
    blocks: usize,

    /// Size of each block in the performance phase
    #[arg(long, default_value_t = 1024)]
    block_size: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "numalloc_core={0},numalloc_probe={0}",
                    args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting numalloc probe");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = AllocatorConfig::builder()
        .policy(args.policy)
        .local_default(args.local_default)
        .sysfs_root(&args.sysfs_root)
        .build()
        .context("invalid allocator configuration")?;
    global::install(&config).context("failed to install allocator")?;

    print_topology(&args.sysfs_root);

    let baseline = global::used_bytes();
    basic_phase(baseline)?;
    placement_phase(baseline)?;
    thread_phase(baseline, args.threads.unwrap_or_else(num_cpus::get))?;
    performance_phase(baseline, args.blocks, args.block_size)?;

    global::shutdown();
    println!("All phases passed");
    Ok(())
}

fn check_baseline(phase: &str, baseline: usize) -> Result<()> {
    let used = global::used_bytes();
    if used != baseline {
        bail!("{phase}: used bytes {used} after cleanup, expected {baseline}");
    }
    Ok(())
}

fn print_topology(root: &std::path::Path) {
    let topo = SysfsTopology::with_root(root);
    topo.log_topology();

    println!("=== Topology ===");
    println!("{}", topo.summary());
    if topo.topology_available() {
        println!("{}", distance_table(&topo));
    }

    let alloc = global::allocator();
    println!("Policy: {}", alloc.policy());
    println!("Ranking: {:?}", alloc.ranking().as_slice());
    println!();
}

fn basic_phase(baseline: usize) -> Result<()> {
    println!("=== Basic ===");

    let ptr = global::allocate(100);
    println!("allocate(100): {ptr:p}");

    let copy = global::allocate_copy(b"Hello, NUMA!\0");
    // SAFETY: copy holds 13 initialized bytes
    let text = unsafe { std::slice::from_raw_parts(copy.as_ptr(), 12) };
    println!("allocate_copy: {}", String::from_utf8_lossy(text));

    // SAFETY: ptr is live and replaced by the result
    let ptr = unsafe { global::reallocate(Some(ptr), 200) };
    println!("reallocate to 200 bytes: {ptr:p}");

    let expected = baseline + 200 + 13 + 2 * HEADER_WIDTH;
    let used = global::used_bytes();
    println!("Used bytes: {used}");
    if used != expected {
        bail!("basic: used bytes {used}, expected {expected}");
    }

    let mut s = Sds::from("sds on numalloc");
    s.cat_fmt(format_args!(", {} bytes in use", global::used_bytes()));
    println!("{s}");
    drop(s);

    // SAFETY: both blocks are live and not used afterwards
    unsafe {
        global::free(Some(ptr));
        global::free(Some(copy));
        global::free(None);
    }
    println!("After free: {} bytes", global::used_bytes());
    println!();
    check_baseline("basic", baseline)
}

fn placement_phase(baseline: usize) -> Result<()> {
    println!("=== Node placement ===");

    let alloc = global::allocator();
    let Some(current) = global::current_node() else {
        println!("Topology not available, all allocations are untargeted");
        println!();
        return Ok(());
    };
    println!("Current node: {current}");

    let nodes = alloc.topology().nodes();
    let target = nodes
        .iter()
        .copied()
        .find(|&n| n != current)
        .unwrap_or(current);
    println!("Allocating on node {target}");

    let ptr = global::allocate_on_node(512, target);
    let message = b"Allocated on specific node\0";
    // SAFETY: ptr holds 512 bytes
    unsafe {
        ptr.as_ptr()
            .copy_from_nonoverlapping(message.as_ptr(), message.len());
    }
    // SAFETY: ptr is live
    let placed = unsafe { alloc.block_node(ptr) };
    let backing = NodeBackend::memory_node(ptr.as_ptr());
    println!("Placed on: {placed:?}, kernel reports: {backing:?}");

    // SAFETY: ptr is live and not used afterwards
    unsafe { global::free(Some(ptr)) };

    global::set_default_node(current).context("setting default node")?;
    println!("Default node set to: {current}");

    let stats = alloc.stats();
    println!(
        "Stats: {} targeted, {} untargeted, {} failed attempts",
        stats.targeted, stats.fallbacks, stats.failed_attempts
    );
    println!();
    check_baseline("placement", baseline)
}

fn thread_phase(baseline: usize, threads: usize) -> Result<()> {
    println!("=== Thread safety ===");

    global::enable_thread_safety();
    println!("Thread safety enabled, {threads} threads");

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            thread::spawn(move || {
                let mut held = Vec::with_capacity(64);
                for i in 0..1000 {
                    held.push(global::allocate(32 + (i + t) % 256));
                    if held.len() == 64 {
                        for ptr in held.drain(..) {
                            // SAFETY: blocks are owned by this thread
                            unsafe { global::free(Some(ptr)) };
                        }
                    }
                }
                for ptr in held {
                    // SAFETY: blocks are owned by this thread
                    unsafe { global::free(Some(ptr)) };
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            bail!("thread safety: worker panicked");
        }
    }

    println!("Used bytes after join: {}", global::used_bytes());
    println!();
    check_baseline("thread safety", baseline)
}

fn performance_phase(baseline: usize, count: usize, block_size: usize) -> Result<()> {
    println!("=== Performance ===");
    println!("Allocating {count} blocks of {block_size} bytes each");

    let start = Instant::now();
    let mut blocks = Vec::with_capacity(count);
    let mut label = String::new();
    for i in 0..count {
        let ptr = global::allocate(block_size);
        label.clear();
        let _ = write!(label, "Block {i}");
        let n = label.len().min(block_size);
        // SAFETY: ptr holds block_size bytes
        unsafe {
            ptr.as_ptr().copy_from_nonoverlapping(label.as_ptr(), n);
        }
        blocks.push(ptr);
    }
    let alloc_time = start.elapsed();
    println!(
        "Memory usage after allocation: {} bytes ({:?})",
        global::used_bytes(),
        alloc_time
    );

    let start = Instant::now();
    for ptr in blocks {
        // SAFETY: every block is live and freed exactly once
        unsafe { global::free(Some(ptr)) };
    }
    println!(
        "Memory usage after free: {} bytes ({:?})",
        global::used_bytes(),
        start.elapsed()
    );
    println!();
    check_baseline("performance", baseline)
}
