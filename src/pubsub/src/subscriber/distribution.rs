// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// A histogram of message processing times, in whole seconds.
///
/// Samples are clamped into `[0, max]`. The histogram is not synchronized,
/// the message iterator guards it with its lease state lock.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Distribution {
    buckets: Vec<u64>,
    count: u64,
}

impl Distribution {
    pub(super) fn new(max: usize) -> Self {
        Self {
            buckets: vec![0; max + 1],
            count: 0,
        }
    }

    /// Record a sample.
    pub(super) fn record(&mut self, seconds: u64) {
        let max = self.buckets.len() - 1;
        let index = (seconds as usize).min(max);
        self.buckets[index] += 1;
        self.count += 1;
    }

    /// The nearest-rank estimate of the `p`-th percentile, `0.0 < p <= 1.0`.
    ///
    /// Returns 0 if no samples were recorded.
    pub(super) fn percentile(&self, p: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let target = ((self.count as f64) * p).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (seconds, n) in self.buckets.iter().enumerate() {
            seen += n;
            if seen >= target {
                return seconds as u64;
            }
        }
        (self.buckets.len() - 1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn empty() {
        let d = Distribution::new(600);
        assert_eq!(d.percentile(0.99), 0);
        assert_eq!(d.percentile(0.5), 0);
    }

    #[test_case(0, 0)]
    #[test_case(10, 10)]
    #[test_case(599, 599)]
    #[test_case(600, 600)]
    #[test_case(1000, 600; "clamped to max")]
    fn single_sample(sample: u64, want: u64) {
        let mut d = Distribution::new(600);
        d.record(sample);
        assert_eq!(d.percentile(0.99), want);
        assert_eq!(d.percentile(0.01), want);
    }

    #[test]
    fn percentiles() {
        let mut d = Distribution::new(100);
        for s in 1..=100 {
            d.record(s);
        }
        assert_eq!(d.percentile(0.5), 50);
        assert_eq!(d.percentile(0.9), 90);
        assert_eq!(d.percentile(0.99), 99);
        assert_eq!(d.percentile(1.0), 100);
    }

    #[test]
    fn outlier_does_not_dominate() {
        let mut d = Distribution::new(600);
        for _ in 0..200 {
            d.record(12);
        }
        d.record(500);
        assert_eq!(d.percentile(0.99), 12);
        assert_eq!(d.percentile(1.0), 500);
    }
}
