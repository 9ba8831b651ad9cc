//! Allocate through the redirector, reopen the store, and find the data
//! again through its root offset.
//!
//! Run with `RUST_LOG=fmalloc_heap=debug` to see store lifecycle events.

use fmalloc::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dir = tempfile::tempdir()?;
    let config = StoreConfig::new(dir.path().join("session.heap"));

    let mut redirector = Redirector::new();
    let (handle, fresh) = redirector.init(&config)?;
    println!("store {handle} ready (fresh: {fresh})");

    let block = redirector.allocate(8 * 1000)?;
    let heap = redirector.heap_mut().ok_or("store not active")?;
    let offset = heap.offset_of(block.as_ptr())?;
    for (i, chunk) in heap.bytes_mut(offset, 8 * 1000)?.chunks_exact_mut(8).enumerate() {
        chunk.copy_from_slice(&(i as f64).sqrt().to_le_bytes());
    }
    heap.set_root(offset)?;
    println!("wrote 1000 doubles at offset {offset:#x}");
    println!("{:?}", redirector.stats()?);
    redirector.cleanup();

    let heap = Heap::open(&config)?;
    let bytes = heap.bytes(heap.root() + 8 * 999, 8)?;
    let last = f64::from_le_bytes(bytes.try_into()?);
    println!("after reopen: element 999 = {last:.4}");

    let v = MappedVector::<i32>::create_or_open(dir.path().join("ids.bin"), 10)?;
    v.write_region(0, &[10, 20, 30]);
    println!("mapped vector: {:?}", &v.to_vec()[..4]);
    Ok(())
}
