//! Link quality estimation and route cost
//!
//! Raw RSS samples from received frames are smoothed into an average, turned
//! into a margin over the configured noise floor, and quantized into a link
//! quality class 0-3. Route costs are derived from that class.

use serde::{Deserialize, Serialize};

/// Quantized link quality class (0 = unusable, 3 = best)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LinkQuality(u8);

impl LinkQuality {
    /// No usable link
    pub const ZERO: LinkQuality = LinkQuality(0);
    /// Highest class
    pub const MAX: LinkQuality = LinkQuality(3);

    // Margin thresholds in dB for classes 1, 2 and 3.
    const THRESHOLDS: [u8; 3] = [2, 10, 20];
    const HYSTERESIS_DB: u8 = 2;

    /// Create a link quality class, rejecting values that do not fit in 2 bits.
    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX.0).then_some(Self(value))
    }

    /// Raw class value
    pub fn value(self) -> u8 {
        self.0
    }

    /// Quantize a link margin, staying at `last` unless the margin has moved
    /// past its threshold by more than the hysteresis band.
    pub fn from_margin(margin_db: u8, last: LinkQuality) -> Self {
        let mut thresholds = Self::THRESHOLDS;
        if last.0 > 0 {
            let idx = (last.0 - 1) as usize;
            thresholds[idx] = thresholds[idx].saturating_sub(Self::HYSTERESIS_DB);
        }

        if margin_db > thresholds[2] {
            LinkQuality(3)
        } else if margin_db > thresholds[1] {
            LinkQuality(2)
        } else if margin_db > thresholds[0] {
            LinkQuality(1)
        } else {
            LinkQuality(0)
        }
    }

    /// Cost of a single hop over a link of this quality.
    ///
    /// Higher quality gives lower cost; class 0 is unreachable.
    pub fn link_cost(self) -> RouteCost {
        match self.0 {
            3 => RouteCost(1),
            2 => RouteCost(2),
            1 => RouteCost(4),
            _ => RouteCost::UNREACHABLE,
        }
    }
}

/// 4-bit path cost; 15 means unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteCost(u8);

impl RouteCost {
    /// Cost value that marks a path as unusable
    pub const UNREACHABLE: RouteCost = RouteCost(15);

    /// Create a cost, capping at [`RouteCost::UNREACHABLE`].
    pub fn new(value: u8) -> Self {
        Self(value.min(Self::UNREACHABLE.0))
    }

    /// Raw cost value
    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_unreachable(self) -> bool {
        self == Self::UNREACHABLE
    }

    /// Cost of reaching a destination over a link of quality `link_quality`
    /// to a next hop that advertises `next_hop_cost`.
    pub fn via(link_quality: LinkQuality, next_hop_cost: RouteCost) -> Self {
        let link = link_quality.link_cost();
        if link.is_unreachable() || next_hop_cost.is_unreachable() {
            return Self::UNREACHABLE;
        }
        Self::new(link.0.saturating_add(next_hop_cost.0))
    }
}

impl Default for RouteCost {
    fn default() -> Self {
        Self::UNREACHABLE
    }
}

/// Smoothed link information for one neighbor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkQualityInfo {
    /// Average RSS scaled by `RSS_SCALE`, `None` until the first sample
    average_rss_scaled: Option<i32>,
    /// Most recent raw sample (dBm)
    last_rss: Option<i8>,
    /// Current quantized class
    link_quality: LinkQuality,
}

impl LinkQualityInfo {
    // Fixed-point scale and weight: each sample contributes 1/8.
    const RSS_SCALE: i32 = 8;

    /// Create an empty estimator
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw RSS sample (dBm) and requantize against `noise_floor_dbm`.
    pub fn add_rss(&mut self, rss_dbm: i8, noise_floor_dbm: i8) {
        let sample = rss_dbm as i32 * Self::RSS_SCALE;
        let average = match self.average_rss_scaled {
            None => sample,
            Some(avg) => avg + (sample - avg) / Self::RSS_SCALE,
        };
        self.average_rss_scaled = Some(average);
        self.last_rss = Some(rss_dbm);
        let margin = self.link_margin(noise_floor_dbm);
        self.link_quality = LinkQuality::from_margin(margin, self.link_quality);
    }

    /// Smoothed RSS in dBm, rounded to nearest
    pub fn average_rss(&self) -> Option<i8> {
        self.average_rss_scaled.map(|avg| {
            let half = Self::RSS_SCALE / 2;
            let rounded = if avg >= 0 {
                (avg + half) / Self::RSS_SCALE
            } else {
                (avg - half) / Self::RSS_SCALE
            };
            rounded.clamp(i8::MIN as i32, i8::MAX as i32) as i8
        })
    }

    pub fn last_rss(&self) -> Option<i8> {
        self.last_rss
    }

    /// Margin of the average RSS over the noise floor, 0 when unknown
    pub fn link_margin(&self, noise_floor_dbm: i8) -> u8 {
        match self.average_rss() {
            Some(avg) => (avg as i16 - noise_floor_dbm as i16).clamp(0, u8::MAX as i16) as u8,
            None => 0,
        }
    }

    pub fn link_quality(&self) -> LinkQuality {
        self.link_quality
    }

    /// Forget all samples
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
