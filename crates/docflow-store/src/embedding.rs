//! uint8 embedding quantization for compact BLOB storage.

use ndarray::Array1;

/// A quantized embedding: `value ≈ byte * scale + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedEmbedding {
    pub bytes: Vec<u8>,
    pub scale: f32,
    pub offset: f32,
}

impl QuantizedEmbedding {
    /// Map `[min, max]` of the vector linearly onto `[0, 255]`.
    pub fn quantize(values: &[f32]) -> Self {
        let embedding = Array1::from(values.to_vec());
        let min_val = embedding.iter().copied().fold(f32::INFINITY, f32::min);
        let max_val = embedding.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        if embedding.is_empty() {
            return Self {
                bytes: Vec::new(),
                scale: 0.0,
                offset: 0.0,
            };
        }

        let range = max_val - min_val;
        if range < 1e-9 {
            return Self {
                bytes: vec![0u8; embedding.len()],
                scale: 0.0,
                offset: min_val,
            };
        }

        let scale = range / 255.0;
        let bytes = embedding
            .mapv(|v| ((v - min_val) / scale).round().clamp(0.0, 255.0) as u8)
            .to_vec();

        Self {
            bytes,
            scale,
            offset: min_val,
        }
    }

    pub fn dequantize(&self) -> Array1<f32> {
        Array1::from_iter(self.bytes.iter().map(|&b| b as f32 * self.scale + self.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_error_is_small() {
        let original = [0.1, 0.5, -0.3, 0.8, -0.1];
        let q = QuantizedEmbedding::quantize(&original);
        let restored = q.dequantize();
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 0.01, "Values differ: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_constant_and_empty_vectors() {
        let q = QuantizedEmbedding::quantize(&[0.5, 0.5, 0.5]);
        assert_eq!(q.scale, 0.0);
        assert_eq!(q.offset, 0.5);
        assert!(q.bytes.iter().all(|&b| b == 0));

        let empty = QuantizedEmbedding::quantize(&[]);
        assert!(empty.bytes.is_empty());
    }
}
