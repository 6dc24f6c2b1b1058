//! Byte queues for queue-backed endpoints
//!
//! An [`InputQueue`] collects the bytes of OUT transfers, and an
//! [`OutputQueue`] feeds IN transfers. Your code accesses the other end
//! of the queue from thread context, either directly with `read()` and
//! `write()`, or from an async task with `poll_read()` and `poll_write()`.
//!
//! The driver fills or drains a queue from the USB interrupt. After each
//! packet it commits the byte count and wakes every task waiting on the
//! queue.
//!
//! ```
//! use usbv1_lld::{InputQueue, RxSink};
//!
//! let mut storage = [0; 128];
//! let queue = InputQueue::new(&mut storage);
//! let sink = RxSink::Queue(&queue);
//! # let _ = sink;
//! assert!(queue.is_empty());
//! ```

use core::{
    cell::RefCell,
    task::{Context, Poll, Waker},
};

use critical_section::Mutex;

/// Tasks waiting on a queue
///
/// When the set is full, a new waiter is woken right away, so it polls
/// again instead of hanging.
struct WaitSet {
    wakers: [Option<Waker>; 4],
}

impl WaitSet {
    const fn new() -> Self {
        WaitSet {
            wakers: [None, None, None, None],
        }
    }

    fn register(&mut self, waker: &Waker) {
        if self.wakers.iter().flatten().any(|w| w.will_wake(waker)) {
            return;
        }
        match self.wakers.iter_mut().find(|w| w.is_none()) {
            Some(slot) => *slot = Some(waker.clone()),
            None => waker.wake_by_ref(),
        }
    }

    fn wake_all(&mut self) {
        self.wakers
            .iter_mut()
            .filter_map(Option::take)
            .for_each(Waker::wake);
    }
}

/// Circular buffer state
///
/// `counter` is the number of filled bytes in an input queue, and the
/// number of free bytes in an output queue.
struct Ring<'a> {
    buffer: &'a mut [u8],
    rd: usize,
    wr: usize,
    counter: usize,
    waiting: WaitSet,
}

impl<'a> Ring<'a> {
    fn new(buffer: &'a mut [u8], counter: usize) -> Self {
        Ring {
            buffer,
            rd: 0,
            wr: 0,
            counter,
            waiting: WaitSet::new(),
        }
    }

    fn put(&mut self, byte: u8) {
        self.buffer[self.wr] = byte;
        self.wr += 1;
        if self.wr >= self.buffer.len() {
            self.wr = 0;
        }
    }

    fn get(&mut self) -> u8 {
        let byte = self.buffer[self.rd];
        self.rd += 1;
        if self.rd >= self.buffer.len() {
            self.rd = 0;
        }
        byte
    }
}

/// A queue filled by OUT transfers
pub struct InputQueue<'a> {
    ring: Mutex<RefCell<Ring<'a>>>,
}

impl<'a> InputQueue<'a> {
    /// Create an empty queue that stores bytes in `buffer`
    pub fn new(buffer: &'a mut [u8]) -> Self {
        InputQueue {
            ring: Mutex::new(RefCell::new(Ring::new(buffer, 0))),
        }
    }

    fn with_ring<T>(&self, f: impl FnOnce(&mut Ring<'a>) -> T) -> T {
        critical_section::with(|cs| f(&mut self.ring.borrow_ref_mut(cs)))
    }

    /// The number of bytes that can be read
    pub fn len(&self) -> usize {
        self.with_ring(|ring| ring.counter)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of bytes that the driver can still put into the queue
    pub fn space(&self) -> usize {
        self.with_ring(|ring| ring.buffer.len() - ring.counter)
    }

    /// Read as many bytes as possible into `buffer`, returning the count
    pub fn read(&self, buffer: &mut [u8]) -> usize {
        self.with_ring(|ring| {
            let n = ring.counter.min(buffer.len());
            buffer[..n].iter_mut().for_each(|dst| *dst = ring.get());
            ring.counter -= n;
            n
        })
    }

    /// Read into `buffer`, or register the task to be woken when data
    /// arrives
    pub fn poll_read(&self, cx: &mut Context<'_>, buffer: &mut [u8]) -> Poll<usize> {
        self.with_ring(|ring| {
            if ring.counter == 0 {
                ring.waiting.register(cx.waker());
                return Poll::Pending;
            }
            let n = ring.counter.min(buffer.len());
            buffer[..n].iter_mut().for_each(|dst| *dst = ring.get());
            ring.counter -= n;
            Poll::Ready(n)
        })
    }

    /// Store up to `n` bytes produced by `next`, without making them
    /// visible to readers. Returns the number of bytes stored.
    pub(crate) fn put(&self, n: usize, mut next: impl FnMut() -> u8) -> usize {
        self.with_ring(|ring| {
            let n = n.min(ring.buffer.len() - ring.counter);
            for _ in 0..n {
                ring.put(next());
            }
            n
        })
    }

    /// Publish `n` stored bytes and wake all readers
    pub(crate) fn commit(&self, n: usize) {
        self.with_ring(|ring| {
            ring.counter += n;
            ring.waiting.wake_all();
        })
    }
}

/// A queue drained by IN transfers
pub struct OutputQueue<'a> {
    ring: Mutex<RefCell<Ring<'a>>>,
}

impl<'a> OutputQueue<'a> {
    /// Create an empty queue that stores bytes in `buffer`
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let free = buffer.len();
        OutputQueue {
            ring: Mutex::new(RefCell::new(Ring::new(buffer, free))),
        }
    }

    fn with_ring<T>(&self, f: impl FnOnce(&mut Ring<'a>) -> T) -> T {
        critical_section::with(|cs| f(&mut self.ring.borrow_ref_mut(cs)))
    }

    /// The number of bytes waiting to be sent
    pub fn len(&self) -> usize {
        self.with_ring(|ring| ring.buffer.len() - ring.counter)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of bytes that can be written
    pub fn space(&self) -> usize {
        self.with_ring(|ring| ring.counter)
    }

    /// Write as many bytes of `buffer` as fit, returning the count
    pub fn write(&self, buffer: &[u8]) -> usize {
        self.with_ring(|ring| {
            let n = ring.counter.min(buffer.len());
            buffer[..n].iter().for_each(|&byte| ring.put(byte));
            ring.counter -= n;
            n
        })
    }

    /// Write from `buffer`, or register the task to be woken when space
    /// is available
    pub fn poll_write(&self, cx: &mut Context<'_>, buffer: &[u8]) -> Poll<usize> {
        self.with_ring(|ring| {
            if ring.counter == 0 {
                ring.waiting.register(cx.waker());
                return Poll::Pending;
            }
            let n = ring.counter.min(buffer.len());
            buffer[..n].iter().for_each(|&byte| ring.put(byte));
            ring.counter -= n;
            Poll::Ready(n)
        })
    }

    /// Hand up to `n` queued bytes to `sink`, without releasing their
    /// space. Returns the number of bytes taken.
    pub(crate) fn take(&self, n: usize, mut sink: impl FnMut(u8)) -> usize {
        self.with_ring(|ring| {
            let n = n.min(ring.buffer.len() - ring.counter);
            for _ in 0..n {
                sink(ring.get());
            }
            n
        })
    }

    /// Release the space of `n` taken bytes and wake all writers
    pub(crate) fn commit(&self, n: usize) {
        self.with_ring(|ring| {
            ring.counter += n;
            ring.waiting.wake_all();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{InputQueue, OutputQueue};
    use core::task::{Context, Poll, Waker};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        task::Wake,
        vec::Vec,
    };

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn waker() -> (Arc<Counter>, Waker) {
        let counter = Arc::new(Counter::default());
        (counter.clone(), Waker::from(counter))
    }

    #[test]
    fn input_wraps_around() {
        let mut storage = [0; 4];
        let queue = InputQueue::new(&mut storage);
        let mut bytes = 1..;
        for _ in 0..5 {
            assert_eq!(queue.put(3, || bytes.next().unwrap()), 3);
            queue.commit(3);
            let mut out = [0; 3];
            assert_eq!(queue.read(&mut out), 3);
        }
        assert_eq!(bytes.next(), Some(16));
    }

    #[test]
    fn input_put_is_bounded_by_space() {
        let mut storage = [0; 4];
        let queue = InputQueue::new(&mut storage);
        assert_eq!(queue.put(6, || 0xAA), 4);
        queue.commit(4);
        assert_eq!(queue.space(), 0);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn uncommitted_bytes_are_invisible() {
        let mut storage = [0; 8];
        let queue = InputQueue::new(&mut storage);
        queue.put(2, || 7);
        assert!(queue.is_empty());
        queue.commit(2);
        let mut out = [0; 8];
        assert_eq!(queue.read(&mut out), 2);
        assert_eq!(out[..2], [7, 7]);
    }

    #[test]
    fn output_preserves_order_across_wrap() {
        let mut storage = [0; 5];
        let queue = OutputQueue::new(&mut storage);
        let mut sent = Vec::new();
        for chunk in [[1, 2, 3], [4, 5, 6], [7, 8, 9], [10, 11, 12]] {
            assert_eq!(queue.write(&chunk), 3);
            assert_eq!(queue.len(), 3);
            assert_eq!(queue.take(3, |b| sent.push(b)), 3);
            queue.commit(3);
            assert_eq!(queue.space(), 5);
        }
        assert_eq!(sent, (1..=12).collect::<Vec<u8>>());
    }

    #[test]
    fn output_write_is_bounded_by_space() {
        let mut storage = [0; 4];
        let queue = OutputQueue::new(&mut storage);
        assert_eq!(queue.write(&[0; 6]), 4);
        assert_eq!(queue.write(&[0; 1]), 0);
    }

    #[test]
    fn commit_wakes_readers() {
        let mut storage = [0; 8];
        let queue = InputQueue::new(&mut storage);
        let (count, waker) = waker();
        let mut cx = Context::from_waker(&waker);
        let mut out = [0; 8];
        assert_eq!(queue.poll_read(&mut cx, &mut out), Poll::Pending);
        // Registering twice doesn't wake twice.
        assert_eq!(queue.poll_read(&mut cx, &mut out), Poll::Pending);

        queue.put(1, || 42);
        queue.commit(1);
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
        assert_eq!(queue.poll_read(&mut cx, &mut out), Poll::Ready(1));
        assert_eq!(out[0], 42);
    }

    #[test]
    fn commit_wakes_writers() {
        let mut storage = [0; 2];
        let queue = OutputQueue::new(&mut storage);
        let (count, waker) = waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(queue.poll_write(&mut cx, &[1, 2]), Poll::Ready(2));
        assert_eq!(queue.poll_write(&mut cx, &[3]), Poll::Pending);

        queue.take(2, |_| {});
        queue.commit(2);
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
        assert_eq!(queue.poll_write(&mut cx, &[3]), Poll::Ready(1));
    }

    #[test]
    fn full_wait_set_wakes_immediately() {
        let mut storage = [0; 2];
        let queue = InputQueue::new(&mut storage);
        let mut out = [0; 2];
        let wakers: Vec<_> = (0..5).map(|_| waker()).collect();
        for (_, waker) in &wakers {
            let mut cx = Context::from_waker(waker);
            assert_eq!(queue.poll_read(&mut cx, &mut out), Poll::Pending);
        }
        let woken: Vec<usize> = wakers
            .iter()
            .map(|(count, _)| count.0.load(Ordering::SeqCst))
            .collect();
        assert_eq!(woken, [0, 0, 0, 0, 1]);

        queue.put(1, || 0);
        queue.commit(1);
        assert!(wakers.iter().all(|(count, _)| count.0.load(Ordering::SeqCst) == 1));
    }
}
