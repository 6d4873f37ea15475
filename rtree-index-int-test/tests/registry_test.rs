use rtree_index::{IndexError, IndexRegistry, OpenMode};

#[cfg(test)]
mod tests {
    use super::*;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    #[test]
    fn test_handle_lifecycle() {
        let registry = IndexRegistry::new();
        let handle = registry.create(None, 0, 2, OpenMode::Create).unwrap();

        registry.insert(handle, 1, &[0.0, 0.0], &[1.0, 1.0]).unwrap();
        registry.insert(handle, 2, &[5.0, 5.0], &[6.0, 6.0]).unwrap();
        assert_eq!(registry.intersects(handle, &[0.0, 0.0], &[2.0, 2.0]).unwrap(), vec![1]);
        assert_eq!(registry.nearest(handle, 1, &[4.0, 4.0], &[4.0, 4.0]).unwrap(), vec![2]);
        assert!(registry.is_valid(handle).unwrap());

        registry.delete(handle, 1, &[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert!(matches!(
            registry.delete(handle, 1, &[0.0, 0.0], &[1.0, 1.0]),
            Err(IndexError::EntryNotFound { id: 1 })
        ));

        registry.close(handle).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.close(handle), Err(IndexError::InvalidHandle(_))));
        assert!(matches!(
            registry.insert(handle, 3, &[0.0, 0.0], &[1.0, 1.0]),
            Err(IndexError::InvalidHandle(_))
        ));
        assert!(matches!(registry.is_valid(handle), Err(IndexError::InvalidHandle(_))));
    }

    #[test]
    fn test_handles_are_independent() {
        let registry = IndexRegistry::new();
        let flat = registry.create(None, 0, 1, OpenMode::Create).unwrap();
        let cube = registry.create(None, 1024, 3, OpenMode::Create).unwrap();
        assert_ne!(flat, cube);
        assert_eq!(registry.len(), 2);

        registry.insert(flat, 1, &[0.0], &[1.0]).unwrap();
        registry.insert(cube, 1, &[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]).unwrap();
        assert!(matches!(
            registry.insert(cube, 2, &[0.0], &[1.0]),
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert_eq!(registry.get(cube).unwrap().stats().page_size, 1024);

        registry.close(flat).unwrap();
        assert_eq!(registry.intersects(cube, &[0.0; 3], &[2.0; 3]).unwrap(), vec![1]);
        registry.close_all().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_malformed_bounds_rejected() {
        let registry = IndexRegistry::new();
        let handle = registry.create(None, 0, 2, OpenMode::Create).unwrap();

        assert!(matches!(
            registry.insert(handle, 1, &[1.0, 1.0], &[0.0, 0.0]),
            Err(IndexError::InvalidRegion(_))
        ));
        assert!(matches!(
            registry.insert(handle, 1, &[f64::NAN, 0.0], &[1.0, 1.0]),
            Err(IndexError::InvalidRegion(_))
        ));
        assert!(matches!(
            registry.intersects(handle, &[0.0, 0.0], &[1.0]),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert!(registry.get(handle).unwrap().is_empty());
    }

    #[test]
    fn test_file_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.rtree");
        let registry = IndexRegistry::new();

        assert!(registry.create(Some(&path), 0, 2, OpenMode::Open).is_err());
        assert!(matches!(
            registry.create(None, 0, 2, OpenMode::Open),
            Err(IndexError::InvalidConfig(_))
        ));

        let handle = registry.create(Some(&path), 512, 2, OpenMode::Create).unwrap();
        for i in 0..100u32 {
            let x = f64::from(i);
            registry.insert(handle, u64::from(i), &[x, x], &[x + 0.5, x + 0.5]).unwrap();
        }
        registry.close(handle).unwrap();

        assert!(matches!(
            registry.create(Some(&path), 0, 3, OpenMode::Open),
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            registry.create(Some(&path), 4096, 2, OpenMode::Open),
            Err(IndexError::InvalidConfig(_))
        ));

        let handle = registry.create(Some(&path), 0, 2, OpenMode::OpenOrCreate).unwrap();
        let mut found = registry.intersects(handle, &[10.0, 10.0], &[12.0, 12.0]).unwrap();
        found.sort_unstable();
        assert_eq!(found, vec![10, 11, 12]);
        assert!(registry.is_valid(handle).unwrap());
        registry.close(handle).unwrap();
    }
}
