use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtree_index::{IndexConfig, NearestTies, RTree, Region};
use rtree_index_int_test::test_util::{
    cleanup, create_memory_context, point, random_regions, region, run_test, scan_intersecting,
    small_config, sorted,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    #[test]
    fn test_inserted_entry_is_found_immediately() {
        run_test(
            create_memory_context,
            |ctx| {
                let tree = ctx.tree();
                let mut rng = StdRng::seed_from_u64(11);
                for (id, r) in random_regions(&mut rng, 400, 1000.0, 20.0).into_iter().enumerate() {
                    tree.insert(id as u64, &r)?;
                    assert!(tree.intersection(&r)?.contains(&(id as u64)));
                }
                assert!(tree.is_valid()?);
                Ok(())
            },
            cleanup,
        )
    }

    #[test]
    fn test_deleted_entry_is_gone() {
        run_test(
            create_memory_context,
            |ctx| {
                let tree = ctx.tree();
                let mut rng = StdRng::seed_from_u64(12);
                let regions = random_regions(&mut rng, 300, 1000.0, 20.0);
                for (id, r) in regions.iter().enumerate() {
                    tree.insert(id as u64, r)?;
                }
                for (id, r) in regions.iter().enumerate().filter(|(id, _)| id % 3 == 0) {
                    tree.delete(id as u64, r)?;
                    assert!(!tree.intersection(r)?.contains(&(id as u64)));
                }
                assert_eq!(tree.len(), 200);
                assert!(tree.is_valid()?);
                Ok(())
            },
            cleanup,
        )
    }

    #[test]
    fn test_same_id_under_two_regions() {
        run_test(
            create_memory_context,
            |ctx| {
                let tree = ctx.tree();
                let a = region(&[0.0, 0.0], &[2.0, 2.0]);
                let b = region(&[1.0, 1.0], &[3.0, 3.0]);
                tree.insert(7, &a)?;
                tree.insert(7, &b)?;

                let overlap = region(&[1.5, 1.5], &[1.5, 1.5]);
                assert_eq!(tree.intersection(&overlap)?, vec![7, 7]);

                tree.delete(7, &a)?;
                assert_eq!(tree.intersection(&overlap)?, vec![7]);
                assert_eq!(tree.intersection(&a)?, vec![7]);
                Ok(())
            },
            cleanup,
        )
    }

    #[test]
    fn test_valid_after_random_operations() {
        run_test(
            create_memory_context,
            |ctx| {
                let tree = ctx.tree();
                let mut rng = StdRng::seed_from_u64(13);
                let mut live: Vec<(u64, Region)> = Vec::new();
                let mut next_id = 0u64;

                for step in 0..2000 {
                    if live.is_empty() || rng.gen_bool(0.6) {
                        let r = random_regions(&mut rng, 1, 500.0, 10.0).remove(0);
                        tree.insert(next_id, &r)?;
                        live.push((next_id, r));
                        next_id += 1;
                    } else {
                        let (id, r) = live.swap_remove(rng.gen_range(0..live.len()));
                        tree.delete(id, &r)?;
                    }
                    if step % 250 == 0 {
                        let report = tree.validate()?;
                        assert!(report.is_valid(), "step {}: {:?}", step, report.errors);
                    }
                }

                assert!(tree.is_valid()?);
                assert_eq!(tree.len(), live.len() as u64);
                let query = region(&[100.0, 100.0], &[300.0, 300.0]);
                assert_eq!(sorted(tree.intersection(&query)?), scan_intersecting(&live, &query));
                Ok(())
            },
            cleanup,
        )
    }

    #[test]
    fn test_drain_to_empty() {
        run_test(
            create_memory_context,
            |ctx| {
                let tree = ctx.tree();
                let mut rng = StdRng::seed_from_u64(14);
                let regions = random_regions(&mut rng, 250, 100.0, 5.0);
                for (id, r) in regions.iter().enumerate() {
                    tree.insert(id as u64, r)?;
                }
                for (id, r) in regions.iter().enumerate().rev() {
                    tree.delete(id as u64, r)?;
                }
                assert!(tree.is_empty());
                assert_eq!(tree.height(), 0);
                assert!(tree.is_valid()?);

                // usable again after draining
                tree.insert(1, &regions[0])?;
                assert_eq!(tree.intersection(&regions[0])?, vec![1]);
                Ok(())
            },
            cleanup,
        )
    }

    #[test]
    fn test_nearest_one_is_closest() {
        run_test(
            create_memory_context,
            |ctx| {
                let tree = ctx.tree();
                let mut rng = StdRng::seed_from_u64(15);
                let entries: Vec<(u64, Region)> = random_regions(&mut rng, 600, 1000.0, 15.0)
                    .into_iter()
                    .enumerate()
                    .map(|(id, r)| (id as u64, r))
                    .collect();
                for (id, r) in &entries {
                    tree.insert(*id, r)?;
                }

                for query in random_regions(&mut rng, 50, 1100.0, 30.0) {
                    let found = tree.nearest(1, &query)?;
                    assert!(!found.is_empty());
                    let best = entries
                        .iter()
                        .map(|(_, r)| r.distance(&query))
                        .fold(f64::INFINITY, f64::min);
                    for id in found {
                        let stored = &entries[id as usize].1;
                        assert!(stored.distance(&query) <= best);
                    }
                }
                Ok(())
            },
            cleanup,
        )
    }

    #[test]
    fn test_nearest_k_matches_scan() {
        run_test(
            create_memory_context,
            |ctx| {
                let tree = ctx.tree();
                let mut rng = StdRng::seed_from_u64(16);
                let points: Vec<Region> = (0..500)
                    .map(|_| point(&[rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)]))
                    .collect();
                for (id, p) in points.iter().enumerate() {
                    tree.insert(id as u64, p)?;
                }

                let query = point(&[50.0, 50.0]);
                let found = tree.nearest_with_distances(10, &query)?;
                assert!(found.len() >= 10);
                assert!(found.windows(2).all(|w| w[0].1 <= w[1].1));

                let mut expected: Vec<f64> = points.iter().map(|p| p.distance(&query)).collect();
                expected.sort_by(f64::total_cmp);
                for (i, (_, d)) in found.iter().take(10).enumerate() {
                    assert_eq!(*d, expected[i]);
                }
                Ok(())
            },
            cleanup,
        )
    }

    #[test]
    fn test_nearest_tie_policies() {
        let ring = [
            [1.0, 0.0],
            [-1.0, 0.0],
            [0.0, 1.0],
            [0.0, -1.0],
            [5.0, 5.0],
        ];
        let centre = point(&[0.0, 0.0]);

        let include_all = RTree::memory(small_config()).unwrap();
        let truncate = RTree::memory(small_config().with_nearest_ties(NearestTies::Truncate)).unwrap();
        for (id, c) in ring.iter().enumerate() {
            include_all.insert(id as u64, &point(c)).unwrap();
            truncate.insert(id as u64, &point(c)).unwrap();
        }

        assert_eq!(sorted(include_all.nearest(2, &centre).unwrap()), vec![0, 1, 2, 3]);
        // truncation keeps the lowest ids among the tied
        assert_eq!(truncate.nearest(2, &centre).unwrap(), vec![0, 1]);
        assert!(include_all.nearest(0, &centre).unwrap().is_empty());
    }

    #[test]
    fn test_contained_matches_scan() {
        let tree = RTree::memory(IndexConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        let regions = random_regions(&mut rng, 1000, 200.0, 8.0);
        for (id, r) in regions.iter().enumerate() {
            tree.insert(id as u64, r).unwrap();
        }

        let window = region(&[50.0, 50.0], &[120.0, 90.0]);
        let expected = sorted(
            regions
                .iter()
                .enumerate()
                .filter(|(_, r)| window.contains(r))
                .map(|(id, _)| id as u64),
        );
        assert_eq!(sorted(tree.contained(&window).unwrap()), expected);
    }
}
