//! Worker pool and queue sizing types

use std::num::NonZeroUsize;

nonzero_newtype! {
    /// A non-zero number of processor workers (shards)
    ///
    /// # Examples
    /// ```
    /// use fsagent::types::WorkerCount;
    ///
    /// let workers = WorkerCount::new(8).unwrap();
    /// assert_eq!(workers.get(), 8);
    ///
    /// assert!(WorkerCount::new(0).is_none());
    /// ```
    pub struct WorkerCount(NonZeroUsize: usize, serialize as serialize_u64);
}

impl WorkerCount {
    /// Default number of processor shards
    pub const DEFAULT: Self = Self(NonZeroUsize::new(8).unwrap());
}

impl Default for WorkerCount {
    fn default() -> Self {
        Self::DEFAULT
    }
}

nonzero_newtype! {
    /// Capacity of a bounded hand-off queue
    ///
    /// Every component boundary is a bounded queue; a zero-capacity queue
    /// would drop everything, so it is rejected at load time.
    ///
    /// # Examples
    /// ```
    /// use fsagent::types::QueueCapacity;
    ///
    /// let cap = QueueCapacity::new(1024).unwrap();
    /// assert_eq!(cap.get(), 1024);
    /// assert!(QueueCapacity::new(0).is_none());
    /// ```
    #[doc(alias = "buffer_size")]
    pub struct QueueCapacity(NonZeroUsize: usize, serialize as serialize_u64);
}

impl QueueCapacity {
    /// Default per-shard processor queue
    pub const PROCESSOR: Self = Self(NonZeroUsize::new(1024).unwrap());

    /// Default per-connection outbound queue
    pub const CONNECTION: Self = Self(NonZeroUsize::new(4096).unwrap());

    /// Default exporter batching queue
    pub const EXPORTER: Self = Self(NonZeroUsize::new(8192).unwrap());
}

impl std::str::FromStr for QueueCapacity {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.parse::<usize>()?;
        Ok(Self::new(value).unwrap_or(Self::PROCESSOR))
    }
}
