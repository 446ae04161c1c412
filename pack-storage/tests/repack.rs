use std::sync::Arc;

use pack_storage::{
    list_all, sort_blocks, BlockManager, BlockSummary, FilesystemStorage, SortKey, WriteBuffer,
};

#[tokio::test]
async fn test_repack_on_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FilesystemStorage::open(dir.path()).await.unwrap());
    let blocks = BlockManager::open(storage.clone()).await.unwrap();

    let payloads: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 100 + i as usize * 10]).collect();
    let mut ids = Vec::new();
    for data in &payloads {
        ids.push(blocks.write_block(data).await.unwrap());
    }
    let large = blocks.write_block(&vec![0xff; 4096]).await.unwrap();

    let stats = blocks.repackage(1000).await.unwrap();
    assert_eq!(stats.blocks_moved, 20);
    assert_eq!(stats.blobs_retired, 20);

    // every small block now lives in a pack, the large one stays standalone
    let mut listed = blocks.list_blocks("").await.unwrap();
    sort_blocks(&mut listed, SortKey::Pack, false);
    assert_eq!(listed[0].block_id, large);
    assert!(listed[1..].iter().all(|b| b.is_packed()));

    let summary = BlockSummary::from_blocks(&listed);
    assert_eq!(summary.blocks, 21);
    assert_eq!(summary.packs, 1);

    let packs = list_all(storage.as_ref(), "p").await.unwrap();
    assert_eq!(packs.len(), 1);
    let packed_bytes: u64 = payloads.iter().map(|p| p.len() as u64).sum();
    assert_eq!(packs[0].length, packed_bytes);

    // reading through a reopened repository returns the original content
    drop(blocks);
    let reopened = BlockManager::open(storage).await.unwrap();
    let mut out = WriteBuffer::new();
    for (id, data) in ids.iter().zip(&payloads) {
        reopened.get_block(id, &mut out).await.unwrap();
        assert_eq!(&out.to_byte_slice()[..], &data[..]);
    }
}

#[tokio::test]
async fn test_repack_after_delete_keeps_remaining_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FilesystemStorage::open(dir.path()).await.unwrap());
    let blocks = BlockManager::open(storage.clone()).await.unwrap();

    let a = blocks.write_block(b"alpha").await.unwrap();
    let b = blocks.write_block(b"beta").await.unwrap();
    let c = blocks.write_block(b"gamma").await.unwrap();
    blocks.repackage(100).await.unwrap();

    // the pack is still referenced by the two remaining blocks
    blocks.delete_block(&b).await.unwrap();
    assert_eq!(list_all(storage.as_ref(), "p").await.unwrap().len(), 1);

    let mut out = WriteBuffer::new();
    blocks.get_block(&a, &mut out).await.unwrap();
    assert_eq!(&out.to_byte_slice()[..], b"alpha");
    blocks.get_block(&c, &mut out).await.unwrap();
    assert_eq!(&out.to_byte_slice()[..], b"gamma");

    // a and c are the only entries left in their pack
    let stats = blocks.repackage(100).await.unwrap();
    assert_eq!(stats.blocks_moved, 0);

    blocks.delete_block(&a).await.unwrap();
    blocks.delete_block(&c).await.unwrap();
    assert!(list_all(storage.as_ref(), "p").await.unwrap().is_empty());
}
