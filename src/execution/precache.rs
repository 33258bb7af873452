//! Prefetching batches on a pool of worker threads.
//!
//! [`PreCache`] keeps `num_workers` threads busy requesting batches from its
//! upstream with requests produced by a factory, so a consumer (typically a
//! training loop) finds the next batch ready when it asks for it.
//!
//! # Capacity
//!
//! At most `cache_size` batches exist at any time, counting both finished
//! batches and batches being produced. A worker must take one of
//! `cache_size` permits before it starts on a batch; a consumer hands the
//! permit back when it takes the batch. Workers therefore block while the
//! cache is full and memory stays bounded.
//!
//! # Matching
//!
//! A consumer is served the first finished batch whose request signature
//! matches its own. If the cache is full of batches for other requests the
//! consumer's request is passed directly upstream instead of waiting forever.
//!
//! # Shutdown
//!
//! [`PreCache::shutdown`] (also run by teardown and on drop) stops the
//! workers after their in-flight call and wakes blocked consumers, which
//! then fail with [`ProvideError::Shutdown`].

use crate::core::batch::{Batch, Request, RequestSignature};
use crate::core::error::{ProvideError, ProvideResult, SetupError, SetupResult};
use crate::core::provider::{check_request, BatchProvider};
use crate::core::spec::ProviderSpec;
use crate::execution::stats::CacheStats;
use crossbeam::channel::{self, select, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Produces the requests workers send upstream.
pub type RequestFactory = dyn Fn() -> Request + Send + Sync;

/// Options for a [`PreCache`].
#[derive(Clone)]
pub struct PreCacheOptions {
    /// Maximum number of batches held or in production.
    pub cache_size: usize,
    /// Number of worker threads.
    pub num_workers: usize,
    /// How long a consumer waits for a batch; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for PreCacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreCacheOptions")
            .field("cache_size", &self.cache_size)
            .field("num_workers", &self.num_workers)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for PreCacheOptions {
    fn default() -> Self {
        Self {
            cache_size: 50,
            num_workers: 20,
            timeout: None,
        }
    }
}

impl PreCacheOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache size.
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the consumer timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A finished worker call.
struct Slot {
    signature: RequestSignature,
    result: ProvideResult<Batch>,
    bytes: usize,
}

/// State shared between the consumer side and the workers.
struct Shared {
    slots: Mutex<VecDeque<Slot>>,
    ready: Condvar,
    stopping: AtomicBool,
    stats: Mutex<CacheStats>,
}

impl Shared {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn publish(&self, slot: Slot) {
        {
            let mut stats = self.stats.lock();
            stats.produced += 1;
            if slot.result.is_err() {
                stats.failed += 1;
            }
            stats.resident_bytes += slot.bytes;
        }
        self.slots.lock().push_back(slot);
        self.ready.notify_all();
    }
}

/// Everything a worker thread needs.
struct Worker {
    index: usize,
    upstream: Arc<dyn BatchProvider>,
    shared: Arc<Shared>,
    factory: Arc<RequestFactory>,
    spec: ProviderSpec,
    permits: Receiver<()>,
    stop: Receiver<()>,
}

impl Worker {
    fn run(self) {
        debug!("precache worker {} started", self.index);
        loop {
            select! {
                recv(self.permits) -> permit => {
                    if permit.is_err() {
                        break;
                    }
                }
                recv(self.stop) -> _ => break,
            }
            if self.shared.is_stopping() {
                break;
            }

            let mut request = (self.factory)();
            request.complete_from(&self.spec);
            let signature = request.signature();
            let result = self.upstream.provide(request);
            if self.shared.is_stopping() {
                break;
            }

            let bytes = match &result {
                Ok(batch) => {
                    debug!("precache worker {} finished batch {}", self.index, batch.id);
                    batch.nbytes()
                }
                Err(error) => {
                    warn!("precache worker {} failed: {}", self.index, error);
                    0
                }
            };
            self.shared.publish(Slot { signature, result, bytes });
        }
        debug!("precache worker {} exiting", self.index);
    }
}

/// Prefetches batches from its upstream on worker threads.
pub struct PreCache {
    upstream: Arc<dyn BatchProvider>,
    options: PreCacheOptions,
    factory: Arc<RequestFactory>,
    spec: Option<ProviderSpec>,
    empty: ProviderSpec,
    shared: Arc<Shared>,
    permits: Sender<()>,
    permit_source: Receiver<()>,
    stop: Mutex<Option<Sender<()>>>,
    workers: Vec<JoinHandle<()>>,
}

impl PreCache {
    /// Prefetch from `upstream` with requests made by `factory`.
    pub fn new<F>(upstream: Box<dyn BatchProvider>, options: PreCacheOptions, factory: F) -> Self
    where
        F: Fn() -> Request + Send + Sync + 'static,
    {
        let (permits, permit_source) = channel::bounded(options.cache_size.max(1));
        Self {
            upstream: Arc::from(upstream),
            options,
            factory: Arc::new(factory),
            spec: None,
            empty: ProviderSpec::new(),
            shared: Arc::new(Shared {
                slots: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
                stopping: AtomicBool::new(false),
                stats: Mutex::new(CacheStats::default()),
            }),
            permits,
            permit_source,
            stop: Mutex::new(None),
            workers: Vec::new(),
        }
    }

    /// The options in use.
    pub fn options(&self) -> &PreCacheOptions {
        &self.options
    }

    /// A snapshot of the cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.shared.stats.lock().clone()
    }

    /// Stop the workers and wake every blocked consumer.
    ///
    /// Workers finish their in-flight call before exiting; use teardown to
    /// wait for them.
    pub fn shutdown(&self) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping {} precache worker(s)", self.workers.len());
        // closing the channel releases workers waiting for a permit
        self.stop.lock().take();
        let _guard = self.shared.slots.lock();
        self.shared.ready.notify_all();
    }

    fn join_workers(&mut self) {
        self.shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("a precache worker panicked");
            }
        }
        let mut slots = self.shared.slots.lock();
        slots.clear();
        self.shared.stats.lock().resident_bytes = 0;
    }

    fn take(&self, slot: Slot, waited: Duration) -> ProvideResult<Batch> {
        // the slot held a permit, so the channel has room for it
        let _ = self.permits.try_send(());
        let mut stats = self.shared.stats.lock();
        stats.consumed += 1;
        stats.resident_bytes = stats.resident_bytes.saturating_sub(slot.bytes);
        stats.time_waited += waited;
        slot.result
    }
}

impl BatchProvider for PreCache {
    fn name(&self) -> &str {
        "precache"
    }

    fn setup(&mut self) -> SetupResult<()> {
        if self.options.cache_size == 0 {
            return Err(SetupError::invalid(self.name(), "cache_size", "must be at least 1"));
        }
        if self.options.num_workers == 0 {
            return Err(SetupError::invalid(self.name(), "num_workers", "must be at least 1"));
        }
        Arc::get_mut(&mut self.upstream)
            .ok_or_else(|| SetupError::invalid("precache", "upstream", "already shared with running workers"))?
            .setup()?;
        let spec = self.upstream.spec().clone();

        for _ in 0..self.options.cache_size {
            self.permits
                .try_send(())
                .map_err(|e| SetupError::invalid("precache", "cache_size", e.to_string()))?;
        }

        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        *self.stop.lock() = Some(stop_tx);
        for index in 0..self.options.num_workers {
            let worker = Worker {
                index,
                upstream: Arc::clone(&self.upstream),
                shared: Arc::clone(&self.shared),
                factory: Arc::clone(&self.factory),
                spec: spec.clone(),
                permits: self.permit_source.clone(),
                stop: stop_rx.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("precache-{}", index))
                .spawn(move || worker.run())
                .map_err(|e| SetupError::invalid("precache", "num_workers", format!("cannot spawn worker: {}", e)))?;
            self.workers.push(handle);
        }
        info!(
            "precache started {} worker(s) with cache size {}",
            self.options.num_workers, self.options.cache_size
        );

        self.spec = Some(spec);
        Ok(())
    }

    fn spec(&self) -> &ProviderSpec {
        self.spec.as_ref().unwrap_or(&self.empty)
    }

    fn provide(&self, request: Request) -> ProvideResult<Batch> {
        let spec = self.spec.as_ref().ok_or_else(|| ProvideError::NotSetUp {
            node: self.name().to_string(),
        })?;
        check_request(spec, &request)?;
        let mut request = request;
        request.complete_from(spec);
        let signature = request.signature();

        let start = Instant::now();
        let deadline = self.options.timeout.map(|t| start + t);
        let mut slots = self.shared.slots.lock();
        loop {
            if self.shared.is_stopping() {
                return Err(ProvideError::Shutdown);
            }
            if let Some(position) = slots.iter().position(|s| s.signature == signature) {
                if let Some(slot) = slots.remove(position) {
                    drop(slots);
                    return self.take(slot, start.elapsed());
                }
            }
            if slots.len() >= self.options.cache_size {
                drop(slots);
                warn!(
                    "precache is full of batches for other requests, requesting {} directly",
                    request
                );
                self.shared.stats.lock().bypassed += 1;
                return self.upstream.provide(request);
            }

            match deadline {
                Some(deadline) => {
                    if self.shared.ready.wait_until(&mut slots, deadline).timed_out() {
                        return Err(ProvideError::Timeout {
                            waited_ms: start.elapsed().as_millis() as u64,
                        });
                    }
                }
                None => self.shared.ready.wait(&mut slots),
            }
        }
    }

    fn teardown(&mut self) {
        self.join_workers();
        match Arc::get_mut(&mut self.upstream) {
            Some(upstream) => upstream.teardown(),
            None => warn!("precache upstream still shared, skipping its teardown"),
        }
    }
}

impl Drop for PreCache {
    fn drop(&mut self) {
        self.join_workers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::array::{Array, ArrayData};
    use crate::core::coordinate::Coordinate;
    use crate::core::keys::{AnyKey, ArrayKey};
    use crate::core::provider::Filtered;
    use crate::core::roi::Roi;
    use crate::core::spec::{ArraySpec, DataType};
    use crate::nodes::{MemorySource, RandomLocation};
    use ndarray::{ArrayD, IxDyn};
    use std::sync::atomic::AtomicUsize;

    fn raw() -> ArrayKey {
        ArrayKey::new("RAW")
    }

    fn sampled_volume(seed: u64) -> Box<dyn BatchProvider> {
        let source = MemorySource::new("volume").with_array(
            raw(),
            Array::new(
                ArraySpec::provided(Some(Roi::new([0, 0, 0], [16, 16, 16])), Coordinate::splat(3, 1), DataType::Uint8, true),
                ArrayData::Uint8(ArrayD::from_elem(IxDyn(&[16, 16, 16]), 1)),
            ),
        );
        Box::new(Filtered::new(Box::new(source), RandomLocation::new().with_seed(seed)))
    }

    fn request() -> Request {
        Request::new().array(raw(), Roi::new([0, 0, 0], [4, 4, 4]))
    }

    /// Wraps an upstream with a delay and optional failures.
    struct Slow {
        inner: MemorySource,
        delay: Duration,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Slow {
        fn new(delay: Duration, fail: bool) -> Self {
            Self {
                inner: MemorySource::new("slow").with_array(
                    raw(),
                    Array::new(
                        ArraySpec::provided(Some(Roi::new([0, 0, 0], [4, 4, 4])), Coordinate::splat(3, 1), DataType::Uint8, true),
                        ArrayData::Uint8(ArrayD::zeros(IxDyn(&[4, 4, 4]))),
                    ),
                ),
                delay,
                fail,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl BatchProvider for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn setup(&mut self) -> SetupResult<()> {
            self.inner.setup()
        }

        fn spec(&self) -> &ProviderSpec {
            self.inner.spec()
        }

        fn provide(&self, request: Request) -> ProvideResult<Batch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if self.fail {
                return Err(ProvideError::Materialization {
                    key: AnyKey::Array(raw()),
                    roi: Roi::new([0, 0, 0], [4, 4, 4]),
                    reason: "disk on fire".to_string(),
                });
            }
            self.inner.provide(request)
        }
    }

    #[test]
    fn test_returns_batches_without_deadlock() {
        for &batches in &[1usize, 2, 5] {
            for &workers in &[1usize, 3] {
                for &cache_size in &[1usize, 5] {
                    let options = PreCacheOptions::new().with_cache_size(cache_size).with_workers(workers);
                    let mut cache = PreCache::new(sampled_volume(batches as u64), options, request);
                    cache.setup().unwrap();

                    for _ in 0..batches {
                        let batch = cache.provide(request()).unwrap();
                        let array = batch.array(&raw()).unwrap();
                        assert_eq!(array.roi(), Some(&Roi::new([0, 0, 0], [4, 4, 4])));
                        assert_eq!(array.data.shape(), &[4, 4, 4]);
                    }

                    let stats = cache.stats();
                    assert_eq!(stats.consumed, batches as u64);
                    assert!(stats.produced >= batches as u64);
                    cache.teardown();
                }
            }
        }
    }

    #[test]
    fn test_cache_size_bounds_production() {
        let slow = Slow::new(Duration::from_millis(1), false);
        let calls = slow.calls.clone();
        let options = PreCacheOptions::new().with_cache_size(3).with_workers(4);
        let mut cache = PreCache::new(Box::new(slow), options, request);
        cache.setup().unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        cache.provide(request()).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(cache.stats().resident_bytes > 0);
        cache.teardown();
    }

    #[test]
    fn test_worker_failure_reaches_consumer() {
        let options = PreCacheOptions::new().with_cache_size(2).with_workers(2);
        let mut cache = PreCache::new(Box::new(Slow::new(Duration::ZERO, true)), options, request);
        cache.setup().unwrap();

        let result = cache.provide(request());
        assert!(matches!(result, Err(ProvideError::Materialization { .. })));
        // workers keep serving after a failure
        assert!(cache.provide(request()).is_err());
        assert!(cache.stats().failed >= 2);
        cache.teardown();
    }

    #[test]
    fn test_timeout() {
        let options = PreCacheOptions::new()
            .with_cache_size(1)
            .with_workers(1)
            .with_timeout(Duration::from_millis(20));
        let mut cache = PreCache::new(Box::new(Slow::new(Duration::from_millis(300), false)), options, request);
        cache.setup().unwrap();

        assert!(matches!(cache.provide(request()), Err(ProvideError::Timeout { .. })));
        cache.teardown();
    }

    #[test]
    fn test_shutdown_releases_blocked_consumer() {
        let options = PreCacheOptions::new().with_cache_size(1).with_workers(1);
        let mut cache = PreCache::new(Box::new(Slow::new(Duration::from_millis(300), false)), options, request);
        cache.setup().unwrap();
        let cache = Arc::new(cache);

        let consumer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.provide(request()))
        };
        thread::sleep(Duration::from_millis(50));
        cache.shutdown();

        let result = consumer.join().unwrap();
        assert!(matches!(result, Err(ProvideError::Shutdown)));
        assert!(matches!(cache.provide(request()), Err(ProvideError::Shutdown)));
    }

    #[test]
    fn test_mismatched_request_bypasses_full_cache() {
        let options = PreCacheOptions::new().with_cache_size(1).with_workers(1);
        let mut cache = PreCache::new(sampled_volume(1), options, request);
        cache.setup().unwrap();

        let other = Request::new().array(raw(), Roi::new([0, 0, 0], [2, 2, 2]));
        let batch = cache.provide(other).unwrap();
        assert_eq!(batch.array(&raw()).unwrap().data.shape(), &[2, 2, 2]);
        assert_eq!(cache.stats().bypassed, 1);
        cache.teardown();
    }

    #[test]
    fn test_invalid_options_fail_setup() {
        let options = PreCacheOptions::new().with_cache_size(0);
        let mut cache = PreCache::new(sampled_volume(1), options, request);
        assert!(matches!(cache.setup(), Err(SetupError::InvalidParameter { .. })));
    }

    #[test]
    fn test_provide_before_setup() {
        let cache = PreCache::new(sampled_volume(1), PreCacheOptions::new(), request);
        assert!(matches!(cache.provide(request()), Err(ProvideError::NotSetUp { .. })));
    }
}
