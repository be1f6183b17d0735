//! Admission and serialization of classification requests.
//!
//! Callers go through [`PredictionService`]; a single dispatch thread owns
//! the model and scores admitted images strictly in arrival order.

pub mod dispatch;
pub mod error;
pub mod handle;
pub mod preprocess;
pub mod queue;
pub mod scorer;
pub mod service;
#[cfg(feature = "torch")]
pub mod torch;

pub use error::PredictionError;
pub use preprocess::ValidationError;
pub use scorer::{ClassifierModel, ModelLoader, ScoreError};
pub use service::{DispatchHandle, PredictionService};

#[cfg(test)]
pub(crate) mod testing {
    use image::{ImageFormat, Rgb, RgbImage};
    use shared::LeafClass;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Condvar, Mutex};
    use strum::EnumCount;
    use tokio::sync::mpsc;

    use super::preprocess::Tensor;
    use super::scorer::{ClassifierModel, ModelLoader, ScoreError};

    pub fn loader<M: ClassifierModel + Send + 'static>(model: M) -> ModelLoader {
        Box::new(move || Ok(Box::new(model) as Box<dyn ClassifierModel>))
    }

    pub fn failing_loader(message: &'static str) -> ModelLoader {
        Box::new(move || Err(ScoreError::Load(message.to_string())))
    }

    pub fn one_hot(label: LeafClass) -> Vec<f32> {
        let mut probs = vec![0.0; LeafClass::COUNT];
        probs[label as usize] = 1.0;
        probs
    }

    pub fn encode_image(width: u32, height: u32, rgb: [u8; 3], format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(rgb));
        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, format)
            .expect("in-memory encode");
        bytes.into_inner()
    }

    pub fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        encode_image(width, height, rgb, ImageFormat::Png)
    }

    /// Uniform PNG whose pixel value identifies the request.
    pub fn tagged_png(tag: u8) -> Vec<u8> {
        solid_png(8, 8, [tag, tag, tag])
    }

    fn tag_of(input: &Tensor) -> u8 {
        (input[[0, 0, 0]] * 255.0).round() as u8
    }

    /// Always predicts the same class and counts invocations.
    pub struct FixedModel {
        label: LeafClass,
        calls: Arc<AtomicUsize>,
    }

    impl FixedModel {
        pub fn new(label: LeafClass, calls: Arc<AtomicUsize>) -> Self {
            Self { label, calls }
        }
    }

    impl ClassifierModel for FixedModel {
        fn predict(&mut self, _input: &Tensor) -> Result<Vec<f32>, ScoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut probs = vec![0.02; LeafClass::COUNT];
            probs[self.label as usize] = 0.88;
            Ok(probs)
        }
    }

    #[derive(Default)]
    pub struct Gate {
        open: Mutex<bool>,
        changed: Condvar,
    }

    impl Gate {
        pub fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.changed.notify_all();
        }

        fn wait(&self) {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.changed.wait(open).unwrap();
            }
        }
    }

    /// Records the tag of every scored image, announces it, then blocks
    /// until the gate opens. The warm-up call passes straight through.
    pub struct GatedModel {
        gate: Arc<Gate>,
        seen: Arc<Mutex<Vec<u8>>>,
        entered: mpsc::UnboundedSender<u8>,
        warmed: bool,
    }

    impl GatedModel {
        /// Above any tag a test submits as ordinary traffic.
        pub const PANIC_TAG: u8 = 255;

        pub fn new(
            gate: Arc<Gate>,
            seen: Arc<Mutex<Vec<u8>>>,
            entered: mpsc::UnboundedSender<u8>,
        ) -> Self {
            Self {
                gate,
                seen,
                entered,
                warmed: false,
            }
        }
    }

    impl ClassifierModel for GatedModel {
        fn predict(&mut self, input: &Tensor) -> Result<Vec<f32>, ScoreError> {
            if !self.warmed {
                self.warmed = true;
                return Ok(one_hot(LeafClass::HealthyLeaf));
            }

            let tag = tag_of(input);
            if tag == Self::PANIC_TAG {
                panic!("model blew up on tag {tag}");
            }
            self.seen.lock().unwrap().push(tag);
            let _ = self.entered.send(tag);
            self.gate.wait();
            Ok(one_hot(LeafClass::HealthyLeaf))
        }
    }
}
