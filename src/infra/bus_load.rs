//! Sliding-window estimate of CAN bus utilization. Frames observed on the
//! wire are converted to a bit count and accumulated into 100 ms buckets; the
//! load percentage is the ratio of accumulated bits to the theoretical bus
//! capacity over the window.

/// Number of buckets in the sliding window.
const WINDOW_BUCKETS: usize = 100;

/// Duration of a single bucket in milliseconds (window = 10 s total).
const BUCKET_PERIOD_MS: u32 = 100;

/// Fixed per-frame overhead in bits: SOF + 29-bit ID + control + CRC-15 +
/// CRC delimiter + ACK + ACK delimiter + EOF + interframe space.
const FRAME_OVERHEAD_BITS: u32 = 44;

/// Sliding-window bus load meter.
///
/// `add_frame` records traffic into the open head bucket; `update` advances
/// the window with host-supplied elapsed time. Only closed buckets contribute
/// to [`BusLoad::load_percent`], so a lone frame becomes visible after one
/// full bucket period.
#[derive(Debug, Clone)]
pub struct BusLoad {
    buckets: [u32; WINDOW_BUCKETS],
    /// Index of the open head bucket.
    head: usize,
    /// Number of closed buckets (saturates at the window size).
    closed: usize,
    elapsed_ms: u32,
    bitrate: u32,
}

impl BusLoad {
    /// Meter for a 250 kbit/s bus, the ISO 11783 physical-layer rate.
    pub const fn new() -> Self {
        Self::with_bitrate(250_000)
    }

    pub const fn with_bitrate(bitrate: u32) -> Self {
        Self {
            buckets: [0; WINDOW_BUCKETS],
            head: 0,
            closed: 0,
            elapsed_ms: 0,
            bitrate,
        }
    }

    /// Record one observed frame with the given DLC into the head bucket.
    pub fn add_frame(&mut self, dlc: u8) {
        self.buckets[self.head] = self.buckets[self.head].saturating_add(frame_bits(dlc));
    }

    /// Advance the window. When the accumulated time crosses the bucket
    /// period the head bucket closes and the oldest bucket is discarded.
    pub fn update(&mut self, dt_ms: u32) {
        self.elapsed_ms += dt_ms;
        while self.elapsed_ms >= BUCKET_PERIOD_MS {
            self.elapsed_ms -= BUCKET_PERIOD_MS;
            self.head = (self.head + 1) % WINDOW_BUCKETS;
            self.buckets[self.head] = 0;
            if self.closed < WINDOW_BUCKETS - 1 {
                self.closed += 1;
            }
        }
    }

    /// Utilization over the closed portion of the window, 0.0 to 100.0.
    pub fn load_percent(&self) -> f32 {
        if self.closed == 0 || self.bitrate == 0 {
            return 0.0;
        }
        let mut bits: u64 = 0;
        for (index, bucket) in self.buckets.iter().enumerate() {
            if index != self.head {
                bits += u64::from(*bucket);
            }
        }
        let window_ms = (self.closed as u64) * u64::from(BUCKET_PERIOD_MS);
        let capacity_bits = u64::from(self.bitrate) * window_ms / 1000;
        if capacity_bits == 0 {
            return 0.0;
        }
        (bits as f32) * 100.0 / (capacity_bits as f32)
    }

    /// Drop every sample and restart the window.
    pub fn reset(&mut self) {
        self.buckets = [0; WINDOW_BUCKETS];
        self.head = 0;
        self.closed = 0;
        self.elapsed_ms = 0;
    }
}

impl Default for BusLoad {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire cost of one classical frame: fixed overhead, data bits, and a 10%
/// stuff-bit estimate on the data portion (industry convention).
fn frame_bits(dlc: u8) -> u32 {
    let data_bits = 8 * u32::from(dlc);
    FRAME_OVERHEAD_BITS + data_bits + data_bits / 10
}
