//! Allocation-churn stress tool.
//!
//! Hammers a host-backed resizable buffer with random allocate/free/write
//! cycles and reports fragmentation and growth behavior. Run with
//! `cargo run -p quarry-stress --release`; `QUARRY_STRESS_ITERATIONS`
//! overrides the cycle count.

use anyhow::{Context, Result};
use quarry_alloc::{
    DynamicBufferConfig, DynamicResizableBuffer, HostBacking, MemoryRange, SubBuffer,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

const DEFAULT_ITERATIONS: usize = 200_000;
const REPORT_INTERVAL: usize = 20_000;

const MIN_ALLOC: u64 = 16;
const MAX_ALLOC: u64 = 8 << 10;
const ALIGNMENTS: [u64; 4] = [1, 16, 64, 256];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let iterations = match std::env::var("QUARRY_STRESS_ITERATIONS") {
        Ok(value) => value
            .parse()
            .context("QUARRY_STRESS_ITERATIONS must be a positive integer")?,
        Err(_) => DEFAULT_ITERATIONS,
    };

    info!(iterations, "starting allocation churn");

    let buffer = DynamicResizableBuffer::new(
        HostBacking::new(1 << 20),
        DynamicBufferConfig {
            grow_size: 4 << 20,
            max_size: 512 << 20,
        },
    );

    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut held: Vec<SubBuffer<HostBacking>> = Vec::new();
    let mut total_allocs = 0u64;
    let mut total_frees = 0u64;

    for i in 0..iterations {
        // Bias toward allocation until churn reaches a steady working set.
        let allocate = held.len() < 64 || rng.gen_bool(0.55);

        if allocate {
            let size = rng.gen_range(MIN_ALLOC..=MAX_ALLOC);
            let alignment = ALIGNMENTS[rng.gen_range(0..ALIGNMENTS.len())];
            let fill = vec![(i & 0xFF) as u8; size as usize];

            let sub = buffer
                .allocate(size, alignment, Some(&fill))
                .context("allocation failed during churn")?;
            held.push(sub);
            total_allocs += 1;
        } else {
            let idx = rng.gen_range(0..held.len());
            held.swap_remove(idx);
            total_frees += 1;
        }

        if (i + 1) % REPORT_INTERVAL == 0 {
            let stats = buffer.stats();
            info!(
                cycle = i + 1,
                size = stats.size,
                allocated = stats.allocated,
                live = stats.allocation_count,
                fragmentation_percent = stats.fragmentation_percent,
                reallocations = stats.reallocation_count,
                "churn progress"
            );
        }
    }

    // Verify a sample of live allocations still hold their fill pattern.
    let mut verified = 0usize;
    for sub in held.iter().take(32) {
        let range = MemoryRange::new(sub.offset(), sub.size());
        buffer.with_backing(|backing| {
            let bytes = &backing.as_slice()[range.offset as usize..range.end() as usize];
            assert!(
                bytes.windows(2).all(|w| w[0] == w[1]),
                "fill pattern torn at {range}"
            );
        });
        verified += 1;
    }

    held.clear();
    let stats = buffer.stats();
    info!(
        total_allocs,
        total_frees,
        verified,
        final_size = stats.size,
        reallocations = stats.reallocation_count,
        fragmentation_percent = stats.fragmentation_percent,
        "churn complete"
    );

    assert_eq!(stats.allocation_count, 0, "leaked sub-buffers after churn");
    Ok(())
}
