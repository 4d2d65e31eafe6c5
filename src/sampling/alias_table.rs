// src/sampling/alias_table.rs
// Walker alias table for O(1) discrete sampling of fixture and wavelength
// distributions.
// RELEVANT FILES: src/sampling/mod.rs, src/engine/reference.rs, src/engine/layout.rs

use bytemuck::{Pod, Zeroable};

/// Entry in an alias table for efficient discrete sampling
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct AliasEntry {
    /// Probability threshold for this bin
    pub prob: f32,
    /// Index of the alias bin to use if the sample exceeds prob
    pub alias: u32,
}

/// Alias table over a weighted discrete distribution.
///
/// Keeps the normalized source weights alongside the bins so `sample`
/// reports the exact selection probability, which the estimators divide by.
#[derive(Clone, Debug)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
    pdf: Vec<f32>,
    total_weight: f32,
}

impl AliasTable {
    /// Build from non-negative weights. A zero-total or empty distribution
    /// produces an unsampleable table (`sample` reports pdf 0).
    pub fn new(weights: &[f32]) -> Self {
        let n = weights.len();
        let total_weight: f32 = weights.iter().sum();

        if n == 0 || total_weight <= 0.0 {
            return Self {
                entries: vec![AliasEntry { prob: 1.0, alias: 0 }; n],
                pdf: vec![0.0; n],
                total_weight: 0.0,
            };
        }

        let pdf: Vec<f32> = weights.iter().map(|w| w / total_weight).collect();

        // Walker's method, O(n) construction.
        let mut prob = vec![0.0f32; n];
        let mut alias = vec![0u32; n];
        let mut scaled: Vec<f32> = pdf.iter().map(|p| p * n as f32).collect();

        let mut small = Vec::with_capacity(n);
        let mut large = Vec::with_capacity(n);
        for (i, &w) in scaled.iter().enumerate() {
            if w < 1.0 {
                small.push(i);
            } else {
                large.push(i);
            }
        }

        // Pair each under-full bin with the top over-full bin; the donor
        // stays on its stack until it drops below 1 so nothing is lost when
        // one stack empties first.
        while let Some(&l) = large.last() {
            let Some(s) = small.pop() else {
                break;
            };
            prob[s] = scaled[s];
            alias[s] = l as u32;
            scaled[l] = scaled[l] + scaled[s] - 1.0;
            if scaled[l] < 1.0 {
                large.pop();
                small.push(l);
            }
        }
        // Leftovers on either stack are exactly full.
        for &i in small.iter().chain(large.iter()) {
            prob[i] = 1.0;
        }

        let entries = prob
            .into_iter()
            .zip(alias)
            .map(|(p, a)| AliasEntry { prob: p, alias: a })
            .collect();

        Self {
            entries,
            pdf,
            total_weight,
        }
    }

    /// Draw a bin from two uniform variates in [0, 1).
    /// Returns `(index, pdf)`; pdf is 0 when the table is unsampleable.
    pub fn sample(&self, u1: f32, u2: f32) -> (usize, f32) {
        if self.entries.is_empty() || self.total_weight <= 0.0 {
            return (0, 0.0);
        }
        let n = self.entries.len();
        let bin = ((u1 * n as f32) as usize).min(n - 1);
        let entry = self.entries[bin];
        let selected = if u2 < entry.prob {
            bin
        } else {
            entry.alias as usize
        };
        (selected, self.pdf[selected])
    }

    /// Exact selection probability of a bin.
    pub fn pdf(&self, index: usize) -> f32 {
        self.pdf.get(index).copied().unwrap_or(0.0)
    }

    /// Raw bins for GPU buffer upload
    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    pub fn total_weight(&self) -> f32 {
        self.total_weight
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
