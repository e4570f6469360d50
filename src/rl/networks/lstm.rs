//! LSTM layer
//!
//! A single recurrent layer whose four gates come from one fused matrix
//! applied to the concatenated `[input, hidden]` vector. Row blocks of the
//! matrix are, in order: forget, input, candidate, output.

use super::linear::Linear;
use crate::error::{EngineError, Result};
use crate::rl::core::action::sigmoid;

/// Recurrent state carried between time steps
#[derive(Debug, Clone, PartialEq)]
pub struct LstmState {
    pub hidden: Vec<f64>,
    pub cell: Vec<f64>,
}

impl LstmState {
    pub fn zeros(hidden_size: usize) -> Self {
        Self {
            hidden: vec![0.0; hidden_size],
            cell: vec![0.0; hidden_size],
        }
    }
}

/// One time step: returns the next state
pub fn lstm_step(gates: &Linear, input: &[f64], state: &LstmState) -> LstmState {
    let h = state.hidden.len();
    let mut joined = Vec::with_capacity(input.len() + h);
    joined.extend_from_slice(input);
    joined.extend_from_slice(&state.hidden);

    let z = gates.forward(&joined);
    let (forget, rest) = z.split_at(h);
    let (input_gate, rest) = rest.split_at(h);
    let (candidate, output) = rest.split_at(h);

    let mut next = LstmState::zeros(h);
    for j in 0..h {
        let f = sigmoid(forget[j]);
        let i = sigmoid(input_gate[j]);
        let g = candidate[j].tanh();
        let o = sigmoid(output[j]);
        next.cell[j] = f * state.cell[j] + i * g;
        next.hidden[j] = o * next.cell[j].tanh();
    }
    next
}

/// Run the layer over a whole window from a zero state and return the final
/// hidden vector.
pub fn lstm_forward(gates: &Linear, hidden_size: usize, sequence: &[Vec<f64>]) -> Result<Vec<f64>> {
    let feature_size = gates.cols.saturating_sub(hidden_size);
    if gates.rows != 4 * hidden_size {
        return Err(EngineError::ShapeMismatch {
            what: "lstm gate rows".into(),
            expected: 4 * hidden_size,
            actual: gates.rows,
        });
    }
    if sequence.is_empty() {
        return Err(EngineError::Validation("empty input sequence".into()));
    }

    let mut state = LstmState::zeros(hidden_size);
    for row in sequence {
        if row.len() != feature_size {
            return Err(EngineError::ShapeMismatch {
                what: "observation row".into(),
                expected: feature_size,
                actual: row.len(),
            });
        }
        state = lstm_step(gates, row, &state);
    }
    Ok(state.hidden)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_gates_keep_half_cell() {
        // all pre-activations zero: f = i = o = 0.5, g = 0
        let gates = Linear::zeros(8, 3 + 2);
        let state = LstmState {
            hidden: vec![0.0, 0.0],
            cell: vec![1.0, -1.0],
        };
        let next = lstm_step(&gates, &[1.0, 2.0, 3.0], &state);
        assert!((next.cell[0] - 0.5).abs() < 1e-12);
        assert!((next.cell[1] + 0.5).abs() < 1e-12);
        assert!((next.hidden[0] - 0.5 * 0.5f64.tanh()).abs() < 1e-12);
    }

    #[test]
    fn test_forward_rejects_bad_rows() {
        let gates = Linear::zeros(8, 5);
        let err = lstm_forward(&gates, 2, &[vec![0.0; 4]]).unwrap_err();
        assert!(err.is_validation());
        assert!(lstm_forward(&gates, 2, &[]).is_err());
        assert_eq!(lstm_forward(&gates, 2, &[vec![0.0; 3]]).unwrap().len(), 2);
    }

    #[test]
    fn test_hidden_is_bounded() {
        let mut gates = Linear::zeros(8, 5);
        gates.weights.iter_mut().for_each(|w| *w = 3.0);
        let seq = vec![vec![10.0; 3]; 20];
        let h = lstm_forward(&gates, 2, &seq).unwrap();
        assert!(h.iter().all(|v| v.abs() <= 1.0));
    }
}
