mod capture;
mod output;

use anyhow::{Context, Result};
use capture::{CaptureSource, WebcamCapture};
use clap::{Parser, ValueEnum};
use image::imageops;
use output::{OutputSink, V4L2Output};
use segmentation_live::{
    composite, Accelerator, DeepLabSegmenter, MaskResolution, ModelSource, Palette, PixelBuffer,
    SegmentationMask, SegmenterConfig, PASCAL_VOC_CLASSES,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the DeepLab ONNX model
    /// Falls back to models/deeplabv3_257.onnx next to the binary or in the working directory
    #[arg(long, env = "SEGMENTATION_LIVE_MODEL")]
    model: Option<PathBuf>,

    /// Segment a single image instead of the webcam
    #[arg(long)]
    image: Option<PathBuf>,

    /// Where to write the result of --image
    #[arg(long, default_value = "segmentation.png")]
    output_image: PathBuf,

    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Mirror the output (user-facing camera)
    #[arg(long)]
    mirror: bool,

    /// Emit the coloured mask alone instead of blending it over the frame
    #[arg(long)]
    mask_only: bool,

    /// Overlay opacity for non-background classes
    #[arg(long, default_value_t = 160)]
    alpha: u8,

    /// Resolution of produced masks
    #[arg(long, value_enum, default_value_t = MaskSize::Model)]
    mask_resolution: MaskSize,

    /// Segmentation time budget per frame; the frame after an overrun reuses the previous mask
    #[arg(long)]
    frame_budget_ms: Option<u64>,

    /// ONNX Runtime execution provider
    #[arg(long, value_enum, default_value_t = Provider::Cpu)]
    accelerator: Provider,

    /// ONNX Runtime intra-op threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MaskSize {
    Model,
    Frame,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Provider {
    Cpu,
    Cuda,
    Tensorrt,
}

impl Args {
    fn segmenter_config(&self) -> SegmenterConfig {
        let model = match &self.model {
            Some(path) => ModelSource::File(path.clone()),
            None => ModelSource::bundled(),
        };

        SegmenterConfig {
            model,
            mask_resolution: match self.mask_resolution {
                MaskSize::Model => MaskResolution::Model,
                MaskSize::Frame => MaskResolution::Frame,
            },
            accelerator: match self.accelerator {
                Provider::Cpu => Accelerator::Cpu,
                Provider::Cuda => Accelerator::Cuda,
                Provider::Tensorrt => Accelerator::TensorRt,
            },
            intra_threads: self.threads,
            frame_budget: self.frame_budget_ms.map(Duration::from_millis),
            ..SegmenterConfig::default()
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("segmentation-live starting");

    let mut segmenter = DeepLabSegmenter::new(args.segmenter_config())
        .context("Invalid segmenter configuration")?;
    segmenter
        .try_load_model()
        .context("Can't load segmentation model")?;

    let palette = Palette::pascal_voc(args.alpha);

    if let Some(path) = &args.image {
        return segment_image(&mut segmenter, &palette, path, &args);
    }

    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Target FPS: {}", args.fps);

    let mut capture = WebcamCapture::new(
        args.input_device,
        args.capture_width,
        args.capture_height,
        args.mirror,
    )
    .context("Failed to initialize webcam capture")?;

    let (width, height) = capture.resolution();
    let mut output = V4L2Output::new(&args.output_device, width, height)
        .context("Failed to initialize v4l2loopback output")?;

    run_pipeline(
        &mut capture,
        &mut output,
        &mut segmenter,
        &palette,
        args.fps,
        args.mask_only,
    )
}

fn segment_image(
    segmenter: &mut DeepLabSegmenter,
    palette: &Palette,
    path: &Path,
    args: &Args,
) -> Result<()> {
    let frame = image::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .to_rgb8();
    let buffer = PixelBuffer::from_rgb_image(&frame)?;

    let mask = segmenter
        .process(&buffer)
        .context("Failed to segment image")?;
    log_classes(&mask);

    let rendered = render(&frame, &mask, palette, args.mirror, args.mask_only);
    rendered
        .save(&args.output_image)
        .with_context(|| format!("Failed to write {}", args.output_image.display()))?;

    tracing::info!(
        "Wrote {}x{} mask result to {}",
        mask.width(),
        mask.height(),
        args.output_image.display()
    );
    Ok(())
}

fn render(
    frame: &image::RgbImage,
    mask: &SegmentationMask,
    palette: &Palette,
    mirror: bool,
    mask_only: bool,
) -> image::RgbImage {
    let overlay = mask.to_overlay(palette, mirror);
    if mask_only {
        let (width, height) = frame.dimensions();
        let blank = image::RgbImage::new(width, height);
        return composite(&blank, &overlay);
    }

    if mirror {
        composite(&imageops::flip_horizontal(frame), &overlay)
    } else {
        composite(frame, &overlay)
    }
}

fn log_classes(mask: &SegmentationMask) {
    let counts = mask.class_counts();
    for (class, name) in PASCAL_VOC_CLASSES.iter().enumerate().skip(1) {
        if counts[class] > 0 {
            tracing::info!(
                "{}: {:.1}%",
                name,
                100.0 * counts[class] as f64 / mask.len() as f64
            );
        }
    }
}

fn run_pipeline<C, O>(
    capture: &mut C,
    output: &mut O,
    segmenter: &mut DeepLabSegmenter,
    palette: &Palette,
    target_fps: u32,
    mask_only: bool,
) -> Result<()>
where
    C: CaptureSource,
    O: OutputSink,
{
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let mut frame_count = 0u64;
    let mut dropped = 0u64;
    let mut total_capture_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;
    let mut last_mask: Option<SegmentationMask> = None;
    let mut reused_last = false;

    let (out_w, out_h) = output.resolution();
    tracing::info!("Starting main pipeline loop, output {}x{}", out_w, out_h);
    tracing::info!("Press Ctrl+C to stop");

    loop {
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let frame = capture
            .capture_frame()
            .context("Failed to capture frame")?;
        total_capture_time += capture_start.elapsed();

        // After an over-budget frame, skip one inference and reuse the last mask
        let late = segmenter.stats().last_over_budget;
        let mask = match last_mask.take() {
            Some(previous) if late && !reused_last => {
                dropped += 1;
                reused_last = true;
                previous
            }
            _ => {
                reused_last = false;
                let buffer = PixelBuffer::from_rgb_image(&frame)?;
                segmenter
                    .process(&buffer)
                    .context("Failed to segment frame")?
            }
        };

        let rendered = render(&frame, &mask, palette, capture.mirrored(), mask_only);
        last_mask = Some(mask);

        let output_start = Instant::now();
        output
            .write_frame(&rendered)
            .context("Failed to write frame")?;
        total_output_time += output_start.elapsed();

        frame_count += 1;

        // Log stats every 30 frames
        if frame_count % 30 == 0 {
            let stats = segmenter.stats();
            let avg_capture_ms = total_capture_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let avg_segment_ms = stats.average_time().as_secs_f64() * 1000.0;
            let avg_output_ms = total_output_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let total_ms = avg_capture_ms + avg_segment_ms + avg_output_ms;

            tracing::info!(
                "Frame {}: capture={:.1}ms, segment={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}, dropped={}",
                frame_count,
                avg_capture_ms,
                avg_segment_ms,
                avg_output_ms,
                total_ms,
                1000.0 / total_ms,
                dropped
            );
        }

        // Frame rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}
