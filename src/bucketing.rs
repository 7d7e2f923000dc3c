//! Deterministic traffic bucketing.
//!
//! Every SDK must land a given seed in the same bucket, so the hash is pinned
//! to MurmurHash3 x86 32-bit with seed 1 over the seed's UTF-8 bytes.

/// Size of the variation bucket space.
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;
/// Size of the traffic-inclusion bucket space.
pub const MAX_TRAFFIC_PERCENT: u32 = 100;
/// Murmur3 seed shared by every bucketing call.
pub const HASH_SEED: u32 = 1;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// MurmurHash3 x86 32-bit.
#[must_use]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;
    let mut blocks = data.chunks_exact(4);

    for block in blocks.by_ref() {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k = 0_u32;
        for (i, byte) in tail.iter().enumerate() {
            k ^= u32::from(*byte) << (8 * i);
        }
        h ^= mix_k(k);
    }

    // Length is folded in modulo 2^32, as every other implementation does.
    h ^= data.len() as u32;
    fmix(h)
}

fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

fn fmix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Hash a bucketing seed string.
#[must_use]
pub fn hash(seed: &str) -> u32 {
    murmur3_32(seed.as_bytes(), HASH_SEED)
}

/// `floor((max * hash / 2^32 + 1) * multiplier)`.
///
/// With `multiplier == 1` the result lies in `1..=max`; with `0` it is always `0`.
#[must_use]
pub fn bucket_value(seed: &str, max: u32, multiplier: f64) -> u32 {
    let ratio = f64::from(hash(seed)) / 4_294_967_296.0;
    let scaled = (f64::from(max) * ratio + 1.0) * multiplier;
    scaled.floor() as u32
}

/// Bucket in `1..=100` used for traffic inclusion.
#[must_use]
pub fn inclusion_bucket(seed: &str) -> u32 {
    bucket_value(seed, MAX_TRAFFIC_PERCENT, 1.0)
}

/// Bucket in `1..=10000` used for variation and group tie-break selection.
#[must_use]
pub fn variation_bucket(seed: &str) -> u32 {
    bucket_value(seed, MAX_TRAFFIC_VALUE, 1.0)
}

/// Inclusive slice of the bucket space owned by one variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRange {
    pub start: u32,
    pub end: u32,
}

impl BucketRange {
    #[must_use]
    pub fn contains(&self, bucket: u32) -> bool {
        self.start <= bucket && bucket <= self.end
    }
}

/// Number of buckets a weight (0-100, fractional) claims: `ceil(weight * 100)`, at most 10000.
#[must_use]
pub fn step_factor(weight: f64) -> u32 {
    if weight.is_nan() || weight <= 0.0 {
        return 0;
    }
    let steps = (weight * 100.0).ceil();
    if steps >= f64::from(MAX_TRAFFIC_VALUE) {
        MAX_TRAFFIC_VALUE
    } else {
        steps as u32
    }
}

/// Assign contiguous ranges starting at 1, in order.
///
/// A weight with no buckets (zero, negative, or nothing left) gets `None`,
/// which no bucket value can select. The running end never passes
/// [`MAX_TRAFFIC_VALUE`].
#[must_use]
pub fn allocate_ranges(weights: impl IntoIterator<Item = f64>) -> Vec<Option<BucketRange>> {
    let mut allocated = 0_u32;
    weights
        .into_iter()
        .map(|weight| {
            let step = step_factor(weight).min(MAX_TRAFFIC_VALUE - allocated);
            if step == 0 {
                return None;
            }
            let range = BucketRange {
                start: allocated + 1,
                end: allocated + step,
            };
            allocated += step;
            Some(range)
        })
        .collect()
}

/// Range of a rollout or personalize variation: `[1, trunc(weight * 100)]`.
#[must_use]
pub fn single_range(weight: f64) -> Option<BucketRange> {
    let end = (weight * 100.0).clamp(0.0, f64::from(MAX_TRAFFIC_VALUE)) as u32;
    (end > 0).then_some(BucketRange { start: 1, end })
}

/// Index of the range containing `bucket`.
#[must_use]
pub fn find_range(ranges: &[Option<BucketRange>], bucket: u32) -> Option<usize> {
    ranges
        .iter()
        .position(|range| range.is_some_and(|r| r.contains(bucket)))
}
