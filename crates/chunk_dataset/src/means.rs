use crate::types::{DatasetError, DatasetResult};
use data_contracts::ChannelMeans;
use ndarray::{ArrayView3, Axis};

/// Running mean of per-image channel means (R, G, B = channels 0, 1, 2).
#[derive(Debug, Clone, Default)]
pub struct ChannelMeanAccumulator {
    sums: [f64; 3],
    images: usize,
}

impl ChannelMeanAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, image: &ArrayView3<f32>) -> DatasetResult<()> {
        let (h, w, channels) = image.dim();
        if channels < 3 {
            return Err(DatasetError::Precondition(format!(
                "channel means need 3 channels, image has {channels}"
            )));
        }
        if h == 0 || w == 0 {
            return Err(DatasetError::Precondition("cannot average an empty image".into()));
        }
        let pixels = (h * w) as f64;
        for (c, sum) in self.sums.iter_mut().enumerate() {
            let total: f64 = image
                .index_axis(Axis(2), c)
                .iter()
                .map(|v| f64::from(*v))
                .sum();
            *sum += total / pixels;
        }
        self.images += 1;
        Ok(())
    }

    /// Fold another accumulator in; used when images are averaged on several threads.
    pub fn merge(&mut self, other: &ChannelMeanAccumulator) {
        for (a, b) in self.sums.iter_mut().zip(other.sums) {
            *a += b;
        }
        self.images += other.images;
    }

    pub fn images(&self) -> usize {
        self.images
    }

    pub fn finish(&self) -> DatasetResult<ChannelMeans> {
        if self.images == 0 {
            return Err(DatasetError::Precondition(
                "no images observed for channel means".into(),
            ));
        }
        let n = self.images as f64;
        Ok(ChannelMeans::new(
            self.sums[0] / n,
            self.sums[1] / n,
            self.sums[2] / n,
        ))
    }
}
