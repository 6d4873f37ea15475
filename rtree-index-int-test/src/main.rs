use rand::rngs::StdRng;
use rand::SeedableRng;
use rtree_index::{IndexConfig, IndexResult};
use rtree_index_int_test::test_util::{cleanup, create_file_context_with, random_regions, region};

fn main() -> IndexResult<()> {
    println!("Starting stress test...");
    let ctx = create_file_context_with(IndexConfig::default())?;
    let tree = ctx.tree();

    let count = 200_000;
    let mut rng = StdRng::seed_from_u64(42);
    let regions = random_regions(&mut rng, count, 100_000.0, 50.0);

    let start = std::time::Instant::now();
    for (id, r) in regions.iter().enumerate() {
        tree.insert(id as u64, r)?;
    }
    println!("Inserted {} entries in {:?} (height {})", count, start.elapsed(), tree.height());

    let start = std::time::Instant::now();
    let found = tree.intersection(&region(&[25_000.0, 25_000.0], &[75_000.0, 75_000.0]))?;
    println!("Found {} entries in the centre window in {:?}", found.len(), start.elapsed());

    let start = std::time::Instant::now();
    let mut total = 0;
    for r in regions.iter().take(1000) {
        total += tree.nearest(10, r)?.len();
    }
    println!("Ran 1000 nearest-10 queries ({} results) in {:?}", total, start.elapsed());

    let start = std::time::Instant::now();
    for (id, r) in regions.iter().enumerate().step_by(2) {
        tree.delete(id as u64, r)?;
    }
    println!("Deleted {} entries in {:?}", count / 2, start.elapsed());

    let start = std::time::Instant::now();
    let report = tree.validate()?;
    println!("Validated in {:?}: {}", start.elapsed(), report);

    let stats = tree.stats();
    println!(
        "Pages: {}, cache hit ratio: {:.2}, reads: {}, writes: {}",
        stats.page_count,
        stats.cache_hit_ratio(),
        stats.page_reads,
        stats.page_writes
    );

    cleanup(ctx)?;
    println!("Stress test complete.");
    Ok(())
}
