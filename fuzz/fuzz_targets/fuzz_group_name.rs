#![no_main]

use idcenter::storage::MemorySegmentStore;
use idcenter::{SegmentAllocator, StorageConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz group names with arbitrary strings
    // This tests handling of control characters, unicode, oversized names, etc.
    let allocator =
        SegmentAllocator::with_store(&StorageConfig::default(), MemorySegmentStore::new())
            .unwrap();

    // Convert bytes to string (invalid UTF-8 becomes replacement chars)
    let group = String::from_utf8_lossy(data);

    // Every call must return a result, never panic
    let built = allocator.build_info(&group, 0, 10);
    let propelled = allocator.propel(&group);
    let info = allocator.get(&group);

    // Names accepted by build are accepted everywhere
    if let Ok(true) = built {
        assert!(propelled.unwrap().is_some());
        assert_eq!(info.unwrap().unwrap().count, 1);
    }
});
