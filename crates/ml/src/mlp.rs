use burn::module::{Module, Param};
use burn::nn::Linear;
use burn::tensor::activation::{sigmoid, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

use crate::network::Layer;

/// Bag-of-words input, sigmoid hidden layer, one logit per intent.
///
/// Built from the serializable [`Layer`] records of a snapshot and written back into
/// fresh records after training, so published snapshots never share tensors.
#[derive(Module, Debug)]
pub struct IntentMlp<B: Backend> {
    hidden: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> IntentMlp<B> {
    pub fn from_layers(hidden: &Layer, output: &Layer, device: &B::Device) -> Self {
        Self {
            hidden: linear(hidden, device),
            output: linear(output, device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let hidden = sigmoid(self.hidden.forward(input));
        self.output.forward(hidden)
    }

    pub fn probabilities(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.forward(input), 1)
    }

    /// Current parameters as `(hidden, output)` records.
    pub fn to_layers(&self) -> (Layer, Layer) {
        (export(&self.hidden), export(&self.output))
    }
}

/// One row per query vector.
pub fn input_batch<B: Backend>(rows: &[&[f32]], width: usize, device: &B::Device) -> Tensor<B, 2> {
    let values = rows
        .iter()
        .flat_map(|row| row.iter().copied())
        .collect::<Vec<_>>();
    Tensor::from_data(TensorData::new(values, [rows.len(), width]), device)
}

pub fn target_batch<B: Backend>(targets: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values = targets.iter().map(|target| *target as i64).collect::<Vec<_>>();
    Tensor::from_data(TensorData::new(values, [targets.len()]), device)
}

fn linear<B: Backend>(layer: &Layer, device: &B::Device) -> Linear<B> {
    Linear {
        weight: Param::from_data(
            TensorData::new(layer.weights.clone(), [layer.inputs, layer.outputs]),
            device,
        ),
        bias: Some(Param::from_data(
            TensorData::new(layer.bias.clone(), [layer.outputs]),
            device,
        )),
    }
}

fn export<B: Backend>(linear: &Linear<B>) -> Layer {
    let [inputs, outputs] = linear.weight.val().dims();
    let weights = linear.weight.val().into_data().iter::<f32>().collect();
    let bias = match &linear.bias {
        Some(bias) => bias.val().into_data().iter::<f32>().collect(),
        None => vec![0.0; outputs],
    };

    Layer {
        inputs,
        outputs,
        weights,
        bias,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    fn layers() -> (Layer, Layer) {
        let hidden = Layer {
            inputs: 3,
            outputs: 2,
            weights: vec![0.5, -0.5, 1.0, 0.0, -1.0, 0.25],
            bias: vec![0.1, -0.1],
        };
        let output = Layer {
            inputs: 2,
            outputs: 2,
            weights: vec![2.0, -2.0, -1.0, 1.0],
            bias: vec![0.0, 0.0],
        };
        (hidden, output)
    }

    #[test]
    fn parameters_survive_the_trip_through_tensors() {
        let (hidden, output) = layers();
        let mlp = IntentMlp::<NdArray>::from_layers(&hidden, &output, &NdArrayDevice::Cpu);
        let (hidden_back, output_back) = mlp.to_layers();
        assert_eq!(hidden_back, hidden);
        assert_eq!(output_back, output);
    }

    #[test]
    fn probabilities_are_a_distribution_per_row() {
        let (hidden, output) = layers();
        let device = NdArrayDevice::Cpu;
        let mlp = IntentMlp::<NdArray>::from_layers(&hidden, &output, &device);

        let rows: [&[f32]; 2] = [&[1.0, 0.0, 0.0], &[0.0, 1.0, 1.0]];
        let probs = mlp.probabilities(input_batch(&rows, 3, &device));
        assert_eq!(probs.dims(), [2, 2]);

        let values = probs.into_data().iter::<f32>().collect::<Vec<_>>();
        for row in values.chunks(2) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }
}
