//! Move notifications for embedders that key side tables by address

/// Observer of objects relocated by compaction
///
/// Called in the atomic pause, once per moved object, right after its bytes
/// were copied. `from` and `to` are header addresses; the payload sits
/// [`OBJECT_HEADER_SIZE`](crate::object::OBJECT_HEADER_SIZE) bytes further.
/// Listeners must not touch the heap.
pub trait MoveListener: Send + Sync {
    fn on_move(&self, from: usize, to: usize, size_including_header: usize);
}
