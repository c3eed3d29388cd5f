//! GPU primitive parity tests
//!
//! Compares the GPU prefix sum, counting sort and spatial hash against the
//! host implementations in `sim`:
//! 1. Prefix sum is exclusive across block boundaries
//! 2. Counting sort is stable and matches the host sort exactly
//! 3. Spatial hash keys, indices and offsets match the host hash
//! 4. Random inputs agree with the host (proptest)
//!
//! Needs a GPU adapter, so every test is ignored by default:
//! cargo test -p slick-gpu -- --ignored

use std::sync::OnceLock;

use glam::Vec2;
use gpu::counting_sort::GpuCountingSort;
use gpu::pipeline_builder::storage_buffer;
use gpu::prefix_sum::GpuPrefixSum;
use gpu::readback::read_buffer;
use gpu::spatial_hash::GpuSpatialHash;
use gpu::GpuContext;
use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sim::sort::{counting_sort, exclusive_scan};
use sim::SpatialHash;

fn context() -> &'static GpuContext {
    static CONTEXT: OnceLock<GpuContext> = OnceLock::new();
    CONTEXT.get_or_init(|| {
        GpuContext::new_blocking()
            .unwrap_or_else(|e| panic!("GPU tests need an adapter: {}", e))
    })
}

fn upload(context: &GpuContext, label: &str, data: &[u32], capacity: usize) -> wgpu::Buffer {
    let buffer = storage_buffer(&context.device, label, (capacity.max(data.len()) * 4) as u64);
    context
        .queue
        .write_buffer(&buffer, 0, bytemuck::cast_slice(data));
    buffer
}

fn run_prefix_sum(context: &GpuContext, values: &[u32]) -> Vec<u32> {
    let n = values.len() as u32;
    let mut scan = GpuPrefixSum::new(&context.device, n).expect("prefix sum pipelines");
    let data = upload(context, "Scan Data", values, values.len());
    scan.bind(&context.device, &data);
    scan.prepare(&context.queue, n);

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    scan.encode(&mut encoder, n);
    context.queue.submit(Some(encoder.finish()));

    read_buffer(&context.device, &context.queue, &data, values.len()).expect("scan readback")
}

fn run_counting_sort(context: &GpuContext, items: &[u32], keys: &[u32], max_key: u32) -> (Vec<u32>, Vec<u32>) {
    let n = keys.len() as u32;
    let capacity = n.max(1);
    let mut sort = GpuCountingSort::new(&context.device, capacity).expect("sort pipelines");
    let item_buffer = upload(context, "Sort Items", items, capacity as usize);
    let key_buffer = upload(context, "Sort Keys", keys, capacity as usize);
    sort.bind(&context.device, &item_buffer, &key_buffer);
    let (n, max_key) = sort.prepare(&context.queue, n, max_key);

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    sort.encode(&mut encoder, &item_buffer, &key_buffer, n, max_key);
    context.queue.submit(Some(encoder.finish()));

    let items = read_buffer(&context.device, &context.queue, &item_buffer, n as usize).expect("items readback");
    let keys = read_buffer(&context.device, &context.queue, &key_buffer, n as usize).expect("keys readback");
    (items, keys)
}

#[test]
#[ignore] // Needs a GPU adapter
fn prefix_sum_single_block() {
    let context = context();
    let values: Vec<u32> = (0..300).map(|i| i % 7).collect();

    let gpu = run_prefix_sum(context, &values);
    let mut expected = values.clone();
    exclusive_scan(&mut expected);
    assert_eq!(gpu, expected);
}

#[test]
#[ignore] // Needs a GPU adapter
fn prefix_sum_spans_blocks() {
    let context = context();
    let mut rng = StdRng::seed_from_u64(7);
    // Not a multiple of the block size, so the last block is partial
    let values: Vec<u32> = (0..5_000).map(|_| rng.gen_range(0..16)).collect();

    let gpu = run_prefix_sum(context, &values);
    let mut expected = values.clone();
    exclusive_scan(&mut expected);
    assert_eq!(gpu[0], 0);
    assert_eq!(gpu, expected);
}

#[test]
#[ignore] // Needs a GPU adapter
fn prefix_sum_leaves_tail_untouched() {
    let context = context();
    let values = vec![1u32; 1_024];
    let mut scan = GpuPrefixSum::new(&context.device, 1_024).expect("prefix sum pipelines");
    let data = upload(context, "Scan Data", &values, values.len());
    scan.bind(&context.device, &data);
    scan.prepare(&context.queue, 600);

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    scan.encode(&mut encoder, 600);
    context.queue.submit(Some(encoder.finish()));

    let out: Vec<u32> = read_buffer(&context.device, &context.queue, &data, values.len()).expect("readback");
    for (i, &v) in out.iter().enumerate().take(600) {
        assert_eq!(v, i as u32);
    }
    assert!(out[600..].iter().all(|&v| v == 1), "elements past the count were modified");
}

#[test]
#[ignore] // Needs a GPU adapter
fn prefix_sum_exact_block_multiple() {
    let context = context();
    // Eight full blocks, no partial tail
    let values: Vec<u32> = (0..4_096).map(|i| i % 5).collect();

    let gpu = run_prefix_sum(context, &values);
    let mut expected = values.clone();
    exclusive_scan(&mut expected);
    assert_eq!(gpu, expected);
}

#[test]
#[ignore] // Needs a GPU adapter
fn prefix_sum_spans_more_blocks_than_a_workgroup() {
    let context = context();
    let mut rng = StdRng::seed_from_u64(19);
    // 601 blocks, more block totals than one 512-wide scan covers
    let values: Vec<u32> = (0..512 * 600 + 17).map(|_| rng.gen_range(0..4)).collect();

    let gpu = run_prefix_sum(context, &values);
    let mut expected = values.clone();
    exclusive_scan(&mut expected);
    assert_eq!(gpu.len(), expected.len());
    assert_eq!(gpu, expected);
}

#[test]
#[ignore] // Needs a GPU adapter
fn counting_sort_matches_host() {
    let context = context();
    let mut rng = StdRng::seed_from_u64(42);
    let n = 3_000usize;
    let max_key = (n - 1) as u32;
    let keys: Vec<u32> = (0..n).map(|_| rng.gen_range(0..=max_key)).collect();
    let items: Vec<u32> = (0..n as u32).collect();

    let (gpu_items, gpu_keys) = run_counting_sort(context, &items, &keys, max_key);

    let mut host_items = items.clone();
    let mut host_keys = keys.clone();
    counting_sort(&mut host_items, &mut host_keys, n, max_key);
    assert_eq!(gpu_keys, host_keys);
    assert_eq!(gpu_items, host_items);
}

#[test]
#[ignore] // Needs a GPU adapter
fn counting_sort_is_stable_under_heavy_duplication() {
    let context = context();
    // Few distinct keys, so most of every block shares a digit
    let n = 2_048u32;
    let keys: Vec<u32> = (0..n).map(|i| (i * 7) % 4).collect();
    let items: Vec<u32> = (0..n).collect();

    let (gpu_items, gpu_keys) = run_counting_sort(context, &items, &keys, 3);

    assert!(gpu_keys.windows(2).all(|w| w[0] <= w[1]), "keys not ascending");
    for w in gpu_items.windows(2).zip(gpu_keys.windows(2)) {
        let (items, keys) = w;
        if keys[0] == keys[1] {
            assert!(items[0] < items[1], "equal keys lost their input order");
        }
    }
}

#[test]
#[ignore] // Needs a GPU adapter
fn counting_sort_all_keys_equal() {
    let context = context();
    // One bucket holds every element, as when all particles share a cell
    let n = 4_096usize;
    let max_key = (n - 1) as u32;
    let keys = vec![1_234u32; n];
    let items: Vec<u32> = (0..n as u32).rev().collect();

    let (gpu_items, gpu_keys) = run_counting_sort(context, &items, &keys, max_key);

    let mut host_items = items.clone();
    let mut host_keys = keys.clone();
    counting_sort(&mut host_items, &mut host_keys, n, max_key);
    assert_eq!(gpu_keys, host_keys);
    assert_eq!(gpu_items, host_items);
    assert_eq!(gpu_items, items, "equal keys lost their input order");
}

#[test]
#[ignore] // Needs a GPU adapter
fn counting_sort_keys_above_element_count() {
    let context = context();
    let mut rng = StdRng::seed_from_u64(5);
    let n = 1_000usize;
    let max_key = 99_999u32;
    let keys: Vec<u32> = (0..n).map(|_| rng.gen_range(0..=max_key)).collect();
    let items: Vec<u32> = (0..n as u32).collect();

    let (gpu_items, gpu_keys) = run_counting_sort(context, &items, &keys, max_key);

    let mut host_items = items.clone();
    let mut host_keys = keys.clone();
    counting_sort(&mut host_items, &mut host_keys, n, max_key);
    assert_eq!(gpu_keys, host_keys);
    assert_eq!(gpu_items, host_items);
}

#[test]
#[ignore] // Needs a GPU adapter
fn counting_sort_only_touches_prefix() {
    let context = context();
    let keys = vec![5u32, 3, 9, 1, 0, 7, 7, 2];
    let items = vec![10u32, 11, 12, 13, 14, 15, 16, 17];
    let mut sort = GpuCountingSort::new(&context.device, 16).expect("sort pipelines");
    let item_buffer = upload(context, "Sort Items", &items, 16);
    let key_buffer = upload(context, "Sort Keys", &keys, 16);
    sort.bind(&context.device, &item_buffer, &key_buffer);
    let (n, max_key) = sort.prepare(&context.queue, 4, 9);

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    sort.encode(&mut encoder, &item_buffer, &key_buffer, n, max_key);
    context.queue.submit(Some(encoder.finish()));

    let out_keys: Vec<u32> = read_buffer(&context.device, &context.queue, &key_buffer, 8).expect("readback");
    let out_items: Vec<u32> = read_buffer(&context.device, &context.queue, &item_buffer, 8).expect("readback");
    assert_eq!(&out_keys[..4], &[1, 3, 5, 9]);
    assert_eq!(&out_items[..4], &[13, 11, 10, 12]);
    assert_eq!(&out_keys[4..], &keys[4..]);
    assert_eq!(&out_items[4..], &items[4..]);
}

#[test]
#[ignore] // Needs a GPU adapter
fn spatial_hash_matches_host() {
    let context = context();
    let radius = 0.5;
    let mut rng = StdRng::seed_from_u64(3);
    // Cell centres keep floor(pos / radius) identical on both sides
    let positions: Vec<Vec2> = (0..1_500)
        .map(|_| {
            let cx = rng.gen_range(-20i32..20) as f32;
            let cy = rng.gen_range(-12i32..12) as f32;
            Vec2::new(cx + 0.5, cy + 0.5) * radius
        })
        .collect();
    let n = positions.len() as u32;

    let mut hash = GpuSpatialHash::new(&context.device, n).expect("hash pipelines");
    let position_buffer = storage_buffer(&context.device, "Hash Positions", n as u64 * 8);
    context
        .queue
        .write_buffer(&position_buffer, 0, bytemuck::cast_slice(&positions));
    hash.bind(&context.device, &position_buffer);
    let n = hash.prepare(&context.queue, n, radius);

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    hash.encode(&mut encoder, n);
    context.queue.submit(Some(encoder.finish()));

    let count = n as usize;
    let keys: Vec<u32> = read_buffer(&context.device, &context.queue, &hash.keys, count).expect("keys");
    let items: Vec<u32> = read_buffer(&context.device, &context.queue, &hash.items, count).expect("items");
    let offsets: Vec<u32> = read_buffer(&context.device, &context.queue, &hash.offsets, count).expect("offsets");

    let mut host = SpatialHash::new();
    host.run(&positions, radius);
    assert_eq!(keys, host.sorted_keys());
    assert_eq!(items, host.sorted_indices());
    assert_eq!(offsets, host.offsets());
}

#[test]
#[ignore] // Needs a GPU adapter
fn spatial_hash_single_particle() {
    let context = context();
    let mut hash = GpuSpatialHash::new(&context.device, 4).expect("hash pipelines");
    let position_buffer = storage_buffer(&context.device, "Hash Positions", 32);
    context
        .queue
        .write_buffer(&position_buffer, 0, bytemuck::cast_slice(&[Vec2::new(1.25, -3.75)]));
    hash.bind(&context.device, &position_buffer);
    let n = hash.prepare(&context.queue, 1, 0.5);

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    hash.encode(&mut encoder, n);
    context.queue.submit(Some(encoder.finish()));

    let keys: Vec<u32> = read_buffer(&context.device, &context.queue, &hash.keys, 1).expect("keys");
    let items: Vec<u32> = read_buffer(&context.device, &context.queue, &hash.items, 1).expect("items");
    let offsets: Vec<u32> = read_buffer(&context.device, &context.queue, &hash.offsets, 1).expect("offsets");
    assert_eq!(keys, vec![0]);
    assert_eq!(items, vec![0]);
    assert_eq!(offsets, vec![0]);
}

/// Strategy for keys bounded by a max key chosen alongside them
fn bounded_keys() -> impl Strategy<Value = (u32, Vec<u32>)> {
    (1u32..5_000).prop_flat_map(|max_key| (Just(max_key), prop::collection::vec(0..=max_key, 1..3_000)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    #[ignore] // Needs a GPU adapter
    fn gpu_scan_matches_host(values in prop::collection::vec(0u32..1_000, 1..3_000)) {
        let gpu = run_prefix_sum(context(), &values);
        let mut expected = values.clone();
        exclusive_scan(&mut expected);
        prop_assert_eq!(gpu, expected);
    }

    #[test]
    #[ignore] // Needs a GPU adapter
    fn gpu_sort_matches_host((max_key, keys) in bounded_keys()) {
        let n = keys.len();
        let items: Vec<u32> = (0..n as u32).collect();
        let (gpu_items, gpu_keys) = run_counting_sort(context(), &items, &keys, max_key);

        let mut host_items = items.clone();
        let mut host_keys = keys.clone();
        counting_sort(&mut host_items, &mut host_keys, n, max_key);
        prop_assert_eq!(gpu_keys, host_keys);
        prop_assert_eq!(gpu_items, host_items);
    }
}
