//! Image preprocessors and ordered preprocessing chains.
//!
//! Images are `Array3<f32>` in HWC order (channel 0 = red) until a
//! [`Preprocessor::LayoutConvert`] step reorders them for a model.

use crate::types::{DatasetError, DatasetResult};
use data_contracts::ChannelMeans;
use image::imageops::FilterType;
use image::{ImageBuffer, Luma};
use ndarray::{s, Array3, ArrayView3, Axis};
use rand::{Rng, RngCore};

pub type Image = Array3<f32>;

/// Memory layout expected by the consumer of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Height × width × channels.
    #[default]
    ChannelsLast,
    /// Channels × height × width.
    ChannelsFirst,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Preprocessor {
    /// Resize the shorter side to fit, center-crop the longer side, then resize exactly.
    AspectResize { width: usize, height: usize },
    /// Resize to the target ignoring aspect ratio.
    Resize { width: usize, height: usize },
    /// Subtract per-channel means from the first three channels.
    MeanSubtract { r: f32, g: f32, b: f32 },
    /// Uniformly random window of the target size.
    RandomPatch { width: usize, height: usize },
    /// Four corners plus center, optionally followed by their horizontal mirrors.
    MultiCrop {
        width: usize,
        height: usize,
        mirror: bool,
    },
    /// Reorder dimensions; must be the last step of a chain.
    LayoutConvert(Layout),
}

impl Preprocessor {
    pub fn mean_subtract(means: &ChannelMeans) -> Self {
        Preprocessor::MeanSubtract {
            r: means.r as f32,
            g: means.g as f32,
            b: means.b as f32,
        }
    }

    /// True when the step maps one image to several.
    pub fn is_expanding(&self) -> bool {
        matches!(self, Preprocessor::MultiCrop { .. })
    }

    /// Apply a one-to-one step. Expanding steps are rejected; use [`Preprocessor::expand`].
    pub fn apply(&self, image: Image, rng: &mut dyn RngCore) -> DatasetResult<Image> {
        match self {
            Preprocessor::AspectResize { width, height } => {
                aspect_resize(&image.view(), *width, *height)
            }
            Preprocessor::Resize { width, height } => resize(&image.view(), *width, *height),
            Preprocessor::MeanSubtract { r, g, b } => subtract_mean(image, [*r, *g, *b]),
            Preprocessor::RandomPatch { width, height } => {
                random_patch(&image.view(), *width, *height, rng)
            }
            Preprocessor::MultiCrop { .. } => Err(DatasetError::Schema(
                "multi-crop produces several images; apply it with expand".into(),
            )),
            Preprocessor::LayoutConvert(layout) => Ok(to_layout(image, *layout)),
        }
    }

    pub fn expand(&self, image: Image, rng: &mut dyn RngCore) -> DatasetResult<Vec<Image>> {
        match self {
            Preprocessor::MultiCrop {
                width,
                height,
                mirror,
            } => multi_crop(&image.view(), *width, *height, *mirror),
            other => Ok(vec![other.apply(image, rng)?]),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Preprocessor::AspectResize { width, height } => format!("aspect_resize({width}x{height})"),
            Preprocessor::Resize { width, height } => format!("resize({width}x{height})"),
            Preprocessor::MeanSubtract { r, g, b } => {
                format!("mean_subtract(r={r:.3},g={g:.3},b={b:.3})")
            }
            Preprocessor::RandomPatch { width, height } => format!("random_patch({width}x{height})"),
            Preprocessor::MultiCrop {
                width,
                height,
                mirror,
            } => format!("multi_crop({width}x{height},mirror={mirror})"),
            Preprocessor::LayoutConvert(layout) => format!("layout({layout:?})"),
        }
    }
}

/// Ordered list of preprocessors applied left to right.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessorChain {
    steps: Vec<Preprocessor>,
}

impl PreprocessorChain {
    pub fn new(steps: Vec<Preprocessor>) -> DatasetResult<Self> {
        let last = steps.len().saturating_sub(1);
        for (i, step) in steps.iter().enumerate() {
            if matches!(step, Preprocessor::LayoutConvert(_)) && i != last {
                return Err(DatasetError::Schema(format!(
                    "layout conversion must be the last step (found at position {i} of {})",
                    steps.len()
                )));
            }
        }
        Ok(Self { steps })
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn builder() -> PreprocessorChainBuilder {
        PreprocessorChainBuilder::default()
    }

    pub fn steps(&self) -> &[Preprocessor] {
        &self.steps
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn expands(&self) -> bool {
        self.steps.iter().any(Preprocessor::is_expanding)
    }

    pub fn output_layout(&self) -> Layout {
        match self.steps.last() {
            Some(Preprocessor::LayoutConvert(layout)) => *layout,
            _ => Layout::ChannelsLast,
        }
    }

    pub fn apply(&self, image: Image, rng: &mut dyn RngCore) -> DatasetResult<Image> {
        self.steps
            .iter()
            .try_fold(image, |img, step| step.apply(img, rng))
    }

    /// Apply the chain where some steps may fan one image out to many; later steps
    /// run over every derived image in order.
    pub fn apply_expanded(&self, image: Image, rng: &mut dyn RngCore) -> DatasetResult<Vec<Image>> {
        let mut images = vec![image];
        for step in &self.steps {
            let mut next = Vec::with_capacity(images.len());
            for img in images {
                next.extend(step.expand(img, rng)?);
            }
            images = next;
        }
        Ok(images)
    }

    pub fn describe(&self) -> String {
        if self.steps.is_empty() {
            return "identity".to_string();
        }
        self.steps
            .iter()
            .map(Preprocessor::describe)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreprocessorChainBuilder {
    steps: Vec<Preprocessor>,
}

impl PreprocessorChainBuilder {
    pub fn aspect_resize(mut self, width: usize, height: usize) -> Self {
        self.steps.push(Preprocessor::AspectResize { width, height });
        self
    }
    pub fn resize(mut self, width: usize, height: usize) -> Self {
        self.steps.push(Preprocessor::Resize { width, height });
        self
    }
    pub fn mean_subtract(mut self, means: &ChannelMeans) -> Self {
        self.steps.push(Preprocessor::mean_subtract(means));
        self
    }
    pub fn random_patch(mut self, width: usize, height: usize) -> Self {
        self.steps.push(Preprocessor::RandomPatch { width, height });
        self
    }
    pub fn multi_crop(mut self, width: usize, height: usize, mirror: bool) -> Self {
        self.steps.push(Preprocessor::MultiCrop {
            width,
            height,
            mirror,
        });
        self
    }
    pub fn layout(mut self, layout: Layout) -> Self {
        self.steps.push(Preprocessor::LayoutConvert(layout));
        self
    }
    pub fn build(self) -> DatasetResult<PreprocessorChain> {
        PreprocessorChain::new(self.steps)
    }
}

/// Resize each channel plane independently with a triangle filter.
///
/// Planes are mapped into `[0, 1]` around the resize so intensities outside that
/// range (raw 0..255 pixels, mean-subtracted values) survive the filter's clamp.
pub fn resize(image: &ArrayView3<f32>, width: usize, height: usize) -> DatasetResult<Image> {
    if width == 0 || height == 0 {
        return Err(DatasetError::Precondition(
            "target dimensions must be greater than zero".into(),
        ));
    }
    let (h, w, channels) = image.dim();
    if h == 0 || w == 0 {
        return Err(DatasetError::Precondition("cannot resize an empty image".into()));
    }
    if (h, w) == (height, width) {
        return Ok(image.to_owned());
    }
    let mut out = Array3::<f32>::zeros((height, width, channels));
    for c in 0..channels {
        let plane = image.index_axis(Axis(2), c);
        let (lo, hi) = plane
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let span = if hi > lo { hi - lo } else { 1.0 };
        let normalized: Vec<f32> = plane.iter().map(|v| (v - lo) / span).collect();
        let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(w as u32, h as u32, normalized)
            .ok_or_else(|| DatasetError::Schema("failed to create resize buffer".into()))?;
        let resized =
            image::imageops::resize(&buffer, width as u32, height as u32, FilterType::Triangle);
        for (x, y, px) in resized.enumerate_pixels() {
            out[[y as usize, x as usize, c]] = px[0] * span + lo;
        }
    }
    Ok(out)
}

pub fn aspect_resize(image: &ArrayView3<f32>, width: usize, height: usize) -> DatasetResult<Image> {
    let (h, w, _) = image.dim();
    if h == 0 || w == 0 {
        return Err(DatasetError::Precondition("cannot resize an empty image".into()));
    }
    let (resized, d_w, d_h) = if w < h {
        let new_h = (h * width / w).max(1);
        let resized = resize(image, width, new_h)?;
        (resized, 0, new_h.saturating_sub(height) / 2)
    } else {
        let new_w = (w * height / h).max(1);
        let resized = resize(image, new_w, height)?;
        (resized, new_w.saturating_sub(width) / 2, 0)
    };
    let (rh, rw, _) = resized.dim();
    let cropped = resized.slice(s![d_h..rh - d_h, d_w..rw - d_w, ..]);
    resize(&cropped, width, height)
}

pub fn subtract_mean(mut image: Image, means: [f32; 3]) -> DatasetResult<Image> {
    let channels = image.dim().2;
    if channels < 3 {
        return Err(DatasetError::Precondition(format!(
            "mean subtraction needs 3 channels, image has {channels}"
        )));
    }
    for (c, mean) in means.iter().enumerate() {
        image.index_axis_mut(Axis(2), c).mapv_inplace(|v| v - mean);
    }
    Ok(image)
}

pub fn random_patch(
    image: &ArrayView3<f32>,
    width: usize,
    height: usize,
    rng: &mut dyn RngCore,
) -> DatasetResult<Image> {
    let (h, w, _) = image.dim();
    if h < height || w < width {
        return Err(DatasetError::Precondition(format!(
            "patch {width}x{height} larger than source {w}x{h}"
        )));
    }
    let x = rng.random_range(0..=w - width);
    let y = rng.random_range(0..=h - height);
    Ok(image.slice(s![y..y + height, x..x + width, ..]).to_owned())
}

/// Ten-crop expansion: top-left, top-right, bottom-right, bottom-left, center,
/// then the horizontal mirror of each in the same order.
pub fn multi_crop(
    image: &ArrayView3<f32>,
    width: usize,
    height: usize,
    mirror: bool,
) -> DatasetResult<Vec<Image>> {
    let (h, w, _) = image.dim();
    if h <= height || w <= width {
        return Err(DatasetError::Precondition(format!(
            "multi-crop {width}x{height} needs a strictly larger source, got {w}x{h}"
        )));
    }
    let d_w = (w - width) / 2;
    let d_h = (h - height) / 2;
    let origins = [
        (0, 0),
        (w - width, 0),
        (w - width, h - height),
        (0, h - height),
        (d_w, d_h),
    ];
    let mut crops: Vec<Image> = origins
        .iter()
        .map(|&(x, y)| image.slice(s![y..y + height, x..x + width, ..]).to_owned())
        .collect();
    if mirror {
        let mirrors: Vec<Image> = crops.iter().map(|c| flip_horizontal(&c.view())).collect();
        crops.extend(mirrors);
    }
    Ok(crops)
}

pub fn flip_horizontal(image: &ArrayView3<f32>) -> Image {
    image.slice(s![.., ..;-1, ..]).to_owned()
}

pub fn to_layout(image: Image, layout: Layout) -> Image {
    match layout {
        Layout::ChannelsLast => image,
        Layout::ChannelsFirst => image
            .permuted_axes([2, 0, 1])
            .as_standard_layout()
            .into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient(h: usize, w: usize, c: usize) -> Image {
        Array3::from_shape_fn((h, w, c), |(y, x, ch)| (y * 1000 + x * 10 + ch) as f32)
    }

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(7)
    }

    #[test]
    fn aspect_resize_hits_exact_target() {
        let img = Array3::<f32>::from_elem((100, 200, 3), 40.0);
        let out = aspect_resize(&img.view(), 50, 50).unwrap();
        assert_eq!(out.dim(), (50, 50, 3));

        let tall = gradient(200, 100, 3);
        assert_eq!(aspect_resize(&tall.view(), 50, 50).unwrap().dim(), (50, 50, 3));
        let odd = gradient(37, 91, 3);
        assert_eq!(aspect_resize(&odd.view(), 30, 20).unwrap().dim(), (20, 30, 3));
    }

    #[test]
    fn resize_preserves_uniform_values_exactly() {
        let img = Array3::<f32>::from_elem((9, 13, 3), 173.0);
        let out = resize(&img.view(), 5, 4).unwrap();
        assert_eq!(out.dim(), (4, 5, 3));
        assert!(out.iter().all(|v| *v == 173.0));
    }

    #[test]
    fn resize_keeps_values_outside_unit_range() {
        let img = Array3::from_shape_fn((4, 4, 1), |(y, _, _)| if y < 2 { -50.0 } else { 200.0 });
        let out = resize(&img.view(), 8, 8).unwrap();
        assert!(out.iter().all(|v| (-50.0..=200.0).contains(v)));
        assert!(out[[0, 0, 0]] < 0.0);
        assert!(out[[7, 7, 0]] > 100.0);
    }

    #[test]
    fn resize_rejects_zero_target() {
        let img = gradient(4, 4, 3);
        assert!(matches!(
            resize(&img.view(), 0, 4),
            Err(DatasetError::Precondition(_))
        ));
    }

    #[test]
    fn mean_subtract_needs_three_channels() {
        let gray = Array3::<f32>::zeros((2, 2, 1));
        assert!(matches!(
            subtract_mean(gray, [1.0, 2.0, 3.0]),
            Err(DatasetError::Precondition(_))
        ));
        let rgb = Array3::<f32>::from_elem((2, 2, 3), 10.0);
        let out = subtract_mean(rgb, [1.0, 2.0, 3.0]).unwrap();
        assert_eq!(out[[1, 1, 0]], 9.0);
        assert_eq!(out[[1, 1, 1]], 8.0);
        assert_eq!(out[[1, 1, 2]], 7.0);
    }

    #[test]
    fn random_patch_stays_inside_source() {
        let img = gradient(10, 12, 3);
        let mut rng = rng();
        for _ in 0..20 {
            let patch = random_patch(&img.view(), 4, 5, &mut rng).unwrap();
            assert_eq!(patch.dim(), (5, 4, 3));
            let y = (patch[[0, 0, 0]] as usize) / 1000;
            let x = ((patch[[0, 0, 0]] as usize) % 1000) / 10;
            assert!(y + 5 <= 10 && x + 4 <= 12);
        }
        let same = random_patch(&img.view(), 12, 10, &mut rng).unwrap();
        assert_eq!(same, img);
        assert!(matches!(
            random_patch(&img.view(), 13, 2, &mut rng),
            Err(DatasetError::Precondition(_))
        ));
    }

    #[test]
    fn multi_crop_yields_corners_center_and_mirrors() {
        let img = gradient(6, 8, 3);
        let crops = multi_crop(&img.view(), 4, 4, true).unwrap();
        assert_eq!(crops.len(), 10);
        assert!(crops.iter().all(|c| c.dim() == (4, 4, 3)));
        assert_eq!(crops[0][[0, 0, 0]], img[[0, 0, 0]]);
        assert_eq!(crops[1][[0, 0, 0]], img[[0, 4, 0]]);
        assert_eq!(crops[2][[0, 0, 0]], img[[2, 4, 0]]);
        assert_eq!(crops[3][[0, 0, 0]], img[[2, 0, 0]]);
        assert_eq!(crops[4][[0, 0, 0]], img[[1, 2, 0]]);
        for i in 0..5 {
            assert_eq!(crops[i + 5], flip_horizontal(&crops[i].view()));
        }
        assert_eq!(multi_crop(&img.view(), 4, 4, false).unwrap().len(), 5);
    }

    #[test]
    fn multi_crop_requires_strictly_larger_source() {
        let img = gradient(4, 8, 3);
        assert!(matches!(
            multi_crop(&img.view(), 4, 4, true),
            Err(DatasetError::Precondition(_))
        ));
    }

    #[test]
    fn channels_first_layout_moves_channel_axis() {
        let img = gradient(2, 3, 3);
        let chw = to_layout(img.clone(), Layout::ChannelsFirst);
        assert_eq!(chw.dim(), (3, 2, 3));
        assert_eq!(chw[[2, 1, 0]], img[[1, 0, 2]]);
        assert!(chw.is_standard_layout());
    }

    #[test]
    fn layout_must_be_last() {
        let err = PreprocessorChain::builder()
            .layout(Layout::ChannelsFirst)
            .resize(4, 4)
            .build()
            .unwrap_err();
        assert!(matches!(err, DatasetError::Schema(_)));
    }

    #[test]
    fn chain_folds_left_to_right() {
        let means = ChannelMeans::new(1.0, 1.0, 1.0);
        let chain = PreprocessorChain::builder()
            .resize(4, 4)
            .mean_subtract(&means)
            .layout(Layout::ChannelsFirst)
            .build()
            .unwrap();
        let img = Array3::<f32>::from_elem((8, 8, 3), 5.0);
        let out = chain.apply(img, &mut rng()).unwrap();
        assert_eq!(out.dim(), (3, 4, 4));
        assert!(out.iter().all(|v| *v == 4.0));
        assert_eq!(chain.output_layout(), Layout::ChannelsFirst);
        assert!(chain.describe().starts_with("resize(4x4) -> mean_subtract"));
    }

    #[test]
    fn expanding_chain_requires_apply_expanded() {
        let chain = PreprocessorChain::builder()
            .multi_crop(2, 2, true)
            .layout(Layout::ChannelsFirst)
            .build()
            .unwrap();
        let img = gradient(4, 4, 3);
        assert!(chain.apply(img.clone(), &mut rng()).is_err());
        let out = chain.apply_expanded(img, &mut rng()).unwrap();
        assert_eq!(out.len(), 10);
        assert!(out.iter().all(|c| c.dim() == (3, 2, 2)));
    }
}
