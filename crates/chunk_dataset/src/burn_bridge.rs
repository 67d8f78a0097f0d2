//! Conversion of generated batches into Burn tensors.

use crate::generator::{Batch, BatchLabels};
use crate::preprocess::Layout;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

pub enum BurnLabels<B: Backend> {
    Indices(Tensor<B, 1, Int>),
    OneHot(Tensor<B, 2>),
}

pub struct BurnBatch<B: Backend> {
    /// NCHW regardless of the batch layout.
    pub images: Tensor<B, 4>,
    pub labels: BurnLabels<B>,
}

impl Batch {
    pub fn to_burn<B: Backend>(&self, device: &B::Device) -> BurnBatch<B> {
        let nchw = match self.layout {
            Layout::ChannelsFirst => self.images.as_standard_layout().into_owned(),
            Layout::ChannelsLast => self
                .images
                .view()
                .permuted_axes([0, 3, 1, 2])
                .as_standard_layout()
                .into_owned(),
        };
        let shape = nchw.shape().to_vec();
        let (values, _) = nchw.into_raw_vec_and_offset();
        let images = Tensor::<B, 4>::from_data(TensorData::new(values, shape), device);
        let labels = match &self.labels {
            BatchLabels::Indices(v) => {
                let ids: Vec<i64> = v.iter().map(|l| i64::from(*l)).collect();
                let n = ids.len();
                BurnLabels::Indices(Tensor::<B, 1, Int>::from_data(
                    TensorData::new(ids, [n]),
                    device,
                ))
            }
            BatchLabels::OneHot(m) => {
                let (rows, cols) = m.dim();
                let values: Vec<f32> = m.iter().copied().collect();
                BurnLabels::OneHot(Tensor::<B, 2>::from_data(
                    TensorData::new(values, [rows, cols]),
                    device,
                ))
            }
        };
        BurnBatch { images, labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use ndarray::Array4;

    type TestBackend = NdArray<f32>;

    #[test]
    fn channels_last_batches_become_nchw() {
        let images = Array4::from_shape_fn((2, 3, 4, 3), |(n, y, x, c)| {
            (n * 1000 + y * 100 + x * 10 + c) as f32
        });
        let batch = Batch {
            images: images.clone(),
            labels: BatchLabels::Indices(vec![1, 0]),
            layout: Layout::ChannelsLast,
        };
        let device = Default::default();
        let out = batch.to_burn::<TestBackend>(&device);
        assert_eq!(out.images.dims(), [2, 3, 3, 4]);
        let values = out.images.into_data().to_vec::<f32>().unwrap();
        // [n=1, c=2, y=1, x=3]
        let idx = ((3 + 2) * 3 + 1) * 4 + 3;
        assert_eq!(values[idx], images[[1, 1, 3, 2]]);
        match out.labels {
            BurnLabels::Indices(t) => assert_eq!(t.dims(), [2]),
            BurnLabels::OneHot(_) => panic!("expected index labels"),
        }
    }
}
