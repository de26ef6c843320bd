//! Per-layer key/value cache with session integrity checks
//!
//! Memory layout: `[num_layers][position * kv_dim]`. Each layer accepts
//! exactly one write per position, in order, up to a fixed capacity. Overflow
//! is an error; the cache never wraps.

use crate::error::CacheError;

/// Ordered view of one layer's cached keys and values for positions `0..=upto`
#[derive(Debug, Clone, Copy)]
pub struct KvView<'a> {
    /// Keys, `len * kv_dim` values
    pub keys: &'a [f32],
    /// Values, `len * kv_dim` values
    pub values: &'a [f32],
    /// Number of positions in the view
    pub len: usize,
}

impl<'a> KvView<'a> {
    /// Key row for one position
    #[must_use]
    pub fn key(&self, position: usize) -> &'a [f32] {
        let dim = self.keys.len() / self.len;
        &self.keys[position * dim..(position + 1) * dim]
    }

    /// Value row for one position
    #[must_use]
    pub fn value(&self, position: usize) -> &'a [f32] {
        let dim = self.values.len() / self.len;
        &self.values[position * dim..(position + 1) * dim]
    }
}

/// KV cache owned by exactly one session
#[derive(Debug, Clone)]
pub struct KvCache {
    num_layers: usize,
    kv_dim: usize,
    capacity: usize,
    keys: Vec<Vec<f32>>,
    values: Vec<Vec<f32>>,
}

impl KvCache {
    /// Create an empty cache
    ///
    /// # Arguments
    /// * `num_layers` - Number of transformer layers
    /// * `kv_dim` - Width of one K or V row
    /// * `capacity` - Maximum positions per layer
    #[must_use]
    pub fn new(num_layers: usize, kv_dim: usize, capacity: usize) -> Self {
        Self {
            num_layers,
            kv_dim,
            capacity,
            keys: vec![Vec::with_capacity(capacity * kv_dim); num_layers],
            values: vec![Vec::with_capacity(capacity * kv_dim); num_layers],
        }
    }

    /// Write K and V for `position` of `layer`
    ///
    /// # Errors
    ///
    /// - [`CacheError::LayerOutOfRange`] for a bad layer index
    /// - [`CacheError::DimensionMismatch`] if a row is not `kv_dim` wide
    /// - [`CacheError::OutOfOrder`] unless `position` is one past the last
    ///   written position of that layer
    /// - [`CacheError::ContextOverflow`] if `position >= capacity`
    pub fn append(&mut self, layer: usize, position: usize, key: &[f32], value: &[f32]) -> Result<(), CacheError> {
        self.check_layer(layer)?;
        for got in [key.len(), value.len()] {
            if got != self.kv_dim {
                return Err(CacheError::DimensionMismatch {
                    expected: self.kv_dim,
                    got,
                });
            }
        }

        let expected = self.layer_len(layer);
        if position != expected {
            return Err(CacheError::OutOfOrder {
                layer,
                expected,
                got: position,
            });
        }
        if position >= self.capacity {
            return Err(CacheError::ContextOverflow {
                position,
                capacity: self.capacity,
            });
        }

        self.keys[layer].extend_from_slice(key);
        self.values[layer].extend_from_slice(value);
        Ok(())
    }

    /// Keys and values of `layer` for positions `0..=upto`
    ///
    /// # Errors
    ///
    /// [`CacheError::LayerOutOfRange`] for a bad layer index,
    /// [`CacheError::NotWritten`] if `upto` has not been written.
    pub fn read(&self, layer: usize, upto: usize) -> Result<KvView<'_>, CacheError> {
        self.check_layer(layer)?;
        let len = self.layer_len(layer);
        if upto >= len {
            return Err(CacheError::NotWritten {
                layer,
                position: upto,
                len,
            });
        }
        let end = (upto + 1) * self.kv_dim;
        Ok(KvView {
            keys: &self.keys[layer][..end],
            values: &self.values[layer][..end],
            len: upto + 1,
        })
    }

    /// Positions written for `layer`
    #[must_use]
    pub fn layer_len(&self, layer: usize) -> usize {
        if self.kv_dim == 0 {
            return 0;
        }
        self.keys.get(layer).map_or(0, |k| k.len() / self.kv_dim)
    }

    /// Positions written for every layer (the attention context length)
    #[must_use]
    pub fn len(&self) -> usize {
        (0..self.num_layers).map(|l| self.layer_len(l)).min().unwrap_or(0)
    }

    /// Whether nothing has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum positions per layer
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Width of one K or V row
    #[must_use]
    pub fn kv_dim(&self) -> usize {
        self.kv_dim
    }

    /// Number of layers
    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Drop every position (session boundary)
    pub fn reset(&mut self) {
        for layer in self.keys.iter_mut().chain(self.values.iter_mut()) {
            layer.clear();
        }
    }

    fn check_layer(&self, layer: usize) -> Result<(), CacheError> {
        if layer >= self.num_layers {
            return Err(CacheError::LayerOutOfRange {
                layer,
                num_layers: self.num_layers,
            });
        }
        Ok(())
    }
}
