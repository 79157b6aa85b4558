//! Meta Module Tests
//!
//! Validates the space tree, the `.meta` records and the stat accounting.
//!
//! ## Test Scopes
//! - **Spaces**: Creation, duplication, deletion and the stat file format.
//! - **Directories**: Make/rename/delete/list inside a space.
//! - **Records**: Metadata round trips and per-space capacity enforcement.

#[cfg(test)]
mod tests {
    use crate::meta::service::{FsMetaStore, MetaStore};
    use crate::meta::types::{ChunkRef, FileMetadata, MetaError, SpaceStat};

    fn record(size: u64) -> FileMetadata {
        FileMetadata {
            file_hash: vec![0xaa; 32],
            filename: "report.pdf".into(),
            size,
            mod_time: 1_700_000_000,
            chunks: vec![
                ChunkRef {
                    hash: vec![0x01; 32],
                    size: size / 2,
                    offset: 0,
                },
                ChunkRef {
                    hash: vec![0x02; 32],
                    size: size - size / 2,
                    offset: size / 2,
                },
            ],
        }
    }

    async fn open_store(dir: &std::path::Path) -> FsMetaStore {
        FsMetaStore::open(dir.to_path_buf()).await.expect("open")
    }

    // ============================================================
    // STAT FORMAT TESTS
    // ============================================================

    #[test]
    fn test_stat_encoding() {
        let stat = SpaceStat {
            capacity: 1000,
            occupied: 250,
        };
        assert_eq!(stat.encode(), "1000,250");
        assert_eq!(SpaceStat::decode("1000,250").expect("decode"), stat);
        assert_eq!(
            SpaceStat::decode("1000,250\n").expect("trailing newline tolerated"),
            stat
        );

        assert!(SpaceStat::decode("1000").is_err());
        assert!(SpaceStat::decode("a,b").is_err());
        assert!(SpaceStat::decode("1,2,3").is_err());
    }

    // ============================================================
    // SPACE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_space_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;

        store.new_space("alpha", 1000).await.expect("create");
        let stat = store.space_stat("alpha").await.expect("stat");
        assert_eq!(stat.capacity, 1000);
        assert_eq!(stat.occupied, 0);

        match store.new_space("alpha", 500).await {
            Err(MetaError::SpaceExists(_)) => {}
            other => panic!("expected SpaceExists, got {:?}", other),
        }

        store.delete_space("alpha").await.expect("delete");
        match store.space_stat("alpha").await {
            Err(MetaError::SpaceNotFound(_)) => {}
            other => panic!("expected SpaceNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_operations_require_a_space() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;

        match store.make_dir("ghost", "", "docs").await {
            Err(MetaError::SpaceNotFound(_)) => {}
            other => panic!("expected SpaceNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_path_components_are_validated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store.new_space("s", 1000).await.expect("create");

        for bad in ["..", ".", "", "a/b", ".stat"] {
            match store.make_dir("s", "", bad).await {
                Err(MetaError::InvalidName(_)) => {}
                other => panic!("name {:?} should be invalid, got {:?}", bad, other),
            }
        }
    }

    // ============================================================
    // DIRECTORY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_dir_make_rename_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store.new_space("s", 1000).await.expect("create");

        store.make_dir("s", "", "docs").await.expect("mkdir");
        match store.make_dir("s", "", "docs").await {
            Err(MetaError::AlreadyExists(_)) => {}
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
        store.make_dir("s", "docs", "2024").await.expect("nested mkdir");

        store
            .rename_dir("s", "docs", "2024", "archive")
            .await
            .expect("rename");
        match store.rename_dir("s", "docs", "2024", "again").await {
            Err(MetaError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }

        store.delete_dir("s", "docs", "archive").await.expect("rmdir");
        match store.delete_dir("s", "docs", "archive").await {
            Err(MetaError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dir_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store.new_space("s", 10_000).await.expect("create");

        store.make_dir("s", "", "sub").await.expect("mkdir");
        store
            .put_metadata("s", "", "report", &record(100))
            .await
            .expect("put");

        let entries = store.get_dir_sub("s", "", "").await.expect("list");
        assert_eq!(entries.len(), 2, "stat file is hidden from listings");
        assert_eq!(entries[0].name, "report");
        assert!(!entries[0].is_dir);
        assert_eq!(entries[0].size, 100);
        assert_eq!(entries[1].name, "sub");
        assert!(entries[1].is_dir);
    }

    // ============================================================
    // METADATA RECORD TESTS
    // ============================================================

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store.new_space("s", 10_000).await.expect("create");

        let meta = record(1234);
        store.put_metadata("s", "", "file", &meta).await.expect("put");
        let back = store.get_metadata("s", "", "file").await.expect("get");
        assert_eq!(back, meta);
        assert_eq!(back.chunks.len(), 2);

        assert_eq!(store.space_stat("s").await.expect("stat").occupied, 1234);

        store.delete_metadata("s", "", "file").await.expect("delete");
        match store.get_metadata("s", "", "file").await {
            Err(MetaError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }
        assert_eq!(store.space_stat("s").await.expect("stat").occupied, 0);
    }

    #[tokio::test]
    async fn test_replacing_a_record_charges_the_difference() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store.new_space("s", 10_000).await.expect("create");

        store.put_metadata("s", "", "f", &record(400)).await.expect("put");
        store.put_metadata("s", "", "f", &record(100)).await.expect("replace");
        assert_eq!(store.space_stat("s").await.expect("stat").occupied, 100);
    }

    #[tokio::test]
    async fn test_space_capacity_is_enforced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store.new_space("s", 500).await.expect("create");

        store.put_metadata("s", "", "a", &record(400)).await.expect("put");
        match store.put_metadata("s", "", "b", &record(200)).await {
            Err(MetaError::Full {
                occupied, incoming, ..
            }) => {
                assert_eq!(occupied, 400);
                assert_eq!(incoming, 200);
            }
            other => panic!("expected Full, got {:?}", other),
        }
        // The rejected record left no trace.
        assert_eq!(store.space_stat("s").await.expect("stat").occupied, 400);
        match store.get_metadata("s", "", "b").await {
            Err(MetaError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
