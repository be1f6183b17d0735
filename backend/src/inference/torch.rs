use std::path::Path;
use tch::{CModule, Device, Kind, Tensor as TorchTensor};

use super::preprocess::Tensor;
use super::scorer::{ClassifierModel, ScoreError};

/// TorchScript classifier. Expects NCHW float input and emits one logit
/// per leaf class.
pub struct TorchModel {
    module: CModule,
    device: Device,
}

impl TorchModel {
    pub fn load(model_path: &Path) -> Result<Self, ScoreError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(model_path, device)
            .map_err(|e| ScoreError::Load(format!("{}: {}", model_path.display(), e)))?;
        log::info!("Loaded TorchScript model {} on {:?}", model_path.display(), device);
        Ok(Self { module, device })
    }
}

impl ClassifierModel for TorchModel {
    fn predict(&mut self, input: &Tensor) -> Result<Vec<f32>, ScoreError> {
        let (height, width, channels) = input.dim();
        let contiguous = input.as_standard_layout();
        let values = contiguous
            .as_slice()
            .ok_or_else(|| ScoreError::Inference("input tensor is not contiguous".into()))?;

        let batch = TorchTensor::from_slice(values)
            .view([1, height as i64, width as i64, channels as i64])
            .permute([0, 3, 1, 2])
            .to_device(self.device);

        let output = tch::no_grad(|| self.module.forward_ts(&[batch]))
            .map_err(|e| ScoreError::Inference(e.to_string()))?;
        let output = output.softmax(-1, Kind::Float);
        let output_flat = output.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}
