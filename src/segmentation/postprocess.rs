use crate::error::{Result, SegmentError};
use crate::mask::SegmentationMask;
use ndarray::{ArrayViewD, Ix2, Ix3, Ix4};

/// Turn raw model output into a label mask
///
/// Rank-4 outputs are logits; the class axis is whichever of axis 1 (NCHW) or
/// axis 3 (NHWC) has `num_classes` entries, NCHW winning when both do. Each
/// cell takes the highest scoring class, ties going to the lower index.
/// Rank-3 `[1, H, W]` and rank-2 `[H, W]` outputs are label maps already.
pub fn labels_from_output(output: ArrayViewD<'_, f32>, num_classes: usize) -> Result<SegmentationMask> {
    let _span = tracing::debug_span!("postprocess").entered();

    match output.ndim() {
        4 => argmax_logits(output, num_classes),
        3 => {
            let view = output.into_dimensionality::<Ix3>()?;
            if view.shape()[0] != 1 {
                return Err(SegmentError::Inference(format!(
                    "expected a single label map, got batch of {}",
                    view.shape()[0]
                )));
            }
            let (h, w) = (view.shape()[1], view.shape()[2]);
            let labels = view.iter().map(|&v| to_label(v, num_classes)).collect();
            mask_from_labels(w, h, labels)
        }
        2 => {
            let view = output.into_dimensionality::<Ix2>()?;
            let (h, w) = (view.shape()[0], view.shape()[1]);
            let labels = view.iter().map(|&v| to_label(v, num_classes)).collect();
            mask_from_labels(w, h, labels)
        }
        n => Err(SegmentError::Inference(format!(
            "unsupported output rank {} (shape {:?})",
            n,
            output.shape()
        ))),
    }
}

fn argmax_logits(output: ArrayViewD<'_, f32>, num_classes: usize) -> Result<SegmentationMask> {
    let view = output.into_dimensionality::<Ix4>()?;
    let shape = view.shape();

    if shape[0] != 1 {
        return Err(SegmentError::Inference(format!(
            "expected batch of 1, got {}",
            shape[0]
        )));
    }

    let nchw = if shape[1] == num_classes {
        true
    } else if shape[3] == num_classes {
        false
    } else {
        return Err(SegmentError::Inference(format!(
            "no axis of output shape {:?} matches {} classes",
            shape, num_classes
        )));
    };

    let (h, w) = if nchw {
        (shape[2], shape[3])
    } else {
        (shape[1], shape[2])
    };

    let mut labels = Vec::with_capacity(h * w);
    for y in 0..h {
        for x in 0..w {
            let mut best = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..num_classes {
                let score = if nchw {
                    view[[0, c, y, x]]
                } else {
                    view[[0, y, x, c]]
                };
                // NaN never compares greater, so it cannot win
                if score > best_score {
                    best = c;
                    best_score = score;
                }
            }
            labels.push(best as u8);
        }
    }

    mask_from_labels(w, h, labels)
}

fn to_label(value: f32, num_classes: usize) -> u8 {
    let max = (num_classes.saturating_sub(1)).min(u8::MAX as usize) as f32;
    value.round().clamp(0.0, max) as u8
}

fn mask_from_labels(width: usize, height: usize, labels: Vec<u8>) -> Result<SegmentationMask> {
    let w = u32::try_from(width)
        .map_err(|_| SegmentError::Inference(format!("mask width {} too large", width)))?;
    let h = u32::try_from(height)
        .map_err(|_| SegmentError::Inference(format!("mask height {} too large", height)))?;
    SegmentationMask::new(w, h, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3, Array4, ArrayD};

    #[test]
    fn argmax_nchw() {
        // 3 classes over a 2x1 grid
        let mut logits = Array4::<f32>::zeros((1, 3, 1, 2));
        logits[[0, 2, 0, 0]] = 5.0;
        logits[[0, 1, 0, 1]] = 3.0;

        let mask = labels_from_output(logits.view().into_dyn(), 3).unwrap();
        assert_eq!(mask.dimensions(), (2, 1));
        assert_eq!(mask.as_bytes(), &[2, 1]);
    }

    #[test]
    fn argmax_nhwc() {
        let mut logits = Array4::<f32>::zeros((1, 2, 1, 4));
        logits[[0, 0, 0, 3]] = 1.0;
        logits[[0, 1, 0, 1]] = 1.0;

        let mask = labels_from_output(logits.view().into_dyn(), 4).unwrap();
        assert_eq!(mask.dimensions(), (1, 2));
        assert_eq!(mask.as_bytes(), &[3, 1]);
    }

    #[test]
    fn ties_go_to_lowest_class() {
        let logits = Array4::<f32>::from_elem((1, 21, 2, 2), 0.5);
        let mask = labels_from_output(logits.view().into_dyn(), 21).unwrap();
        assert!(mask.as_bytes().iter().all(|&l| l == 0));
    }

    #[test]
    fn nan_scores_never_win() {
        let mut logits = Array4::<f32>::zeros((1, 3, 1, 1));
        logits[[0, 0, 0, 0]] = f32::NAN;
        logits[[0, 1, 0, 0]] = -1.0;
        logits[[0, 2, 0, 0]] = -2.0;

        let mask = labels_from_output(logits.view().into_dyn(), 3).unwrap();
        assert_eq!(mask.as_bytes(), &[1]);
    }

    #[test]
    fn label_maps_pass_through() {
        let map = Array3::<f32>::from_shape_vec((1, 1, 3), vec![0.0, 15.0, 40.0]).unwrap();
        let mask = labels_from_output(map.view().into_dyn(), 21).unwrap();
        assert_eq!(mask.as_bytes(), &[0, 15, 20]);

        let map = Array2::<f32>::from_shape_vec((2, 1), vec![1.0, 2.0]).unwrap();
        let mask = labels_from_output(map.view().into_dyn(), 21).unwrap();
        assert_eq!(mask.dimensions(), (1, 2));
    }

    #[test]
    fn mismatched_class_count_is_an_error() {
        let logits = Array4::<f32>::zeros((1, 5, 4, 4));
        let err = labels_from_output(logits.view().into_dyn(), 21).unwrap_err();
        assert!(matches!(err, SegmentError::Inference(_)));
    }

    #[test]
    fn unsupported_rank_is_an_error() {
        let output = ArrayD::<f32>::zeros(vec![1, 1, 1, 1, 1]);
        assert!(labels_from_output(output.view(), 1).is_err());
    }
}
