use log::debug;
use tch::{Kind, Tensor};
use pose3d_utils::tensor::scalar_value;
use crate::summary::SummarySink;

pub mod discriminator;
pub mod encoder;

/// One named contribution to the encoder loss.
#[derive(Debug)]
pub struct LossTerm {
    pub name: &'static str,
    /// Summary family the term is logged under
    pub family: &'static str,
    /// Scaled loss before capping
    pub value: Tensor,
    /// Upper bound applied before the term is accumulated
    pub cap: Option<f64>,
}

impl LossTerm {
    pub fn new(name: &'static str, value: Tensor) -> Self {
        Self { name, family: "losses", value, cap: None }
    }

    pub fn capped(mut self, cap: Option<f64>) -> Self {
        self.cap = cap;
        self
    }

    /// What the term adds to the total: `min(value, cap)`.
    pub fn contribution(&self) -> Tensor {
        match self.cap {
            Some(cap) => self.value.clamp_max(cap),
            None => self.value.shallow_clone(),
        }
    }
}

/// All active loss terms of one step, in accumulation order.
#[derive(Debug, Default)]
pub struct LossBreakdown {
    terms: Vec<LossTerm>,
}

impl LossBreakdown {
    pub fn push(&mut self, term: LossTerm) {
        debug!("{}: {:.6}", term.name, scalar_value(&term.value));
        self.terms.push(term);
    }

    pub fn terms(&self) -> &[LossTerm] {
        &self.terms
    }

    pub fn get(&self, name: &str) -> Option<&LossTerm> {
        self.terms.iter().find(|t| t.name == name)
    }

    /// Sum of every term's capped contribution. Empty breakdowns sum to zero.
    pub fn total(&self) -> Tensor {
        self.terms
            .iter()
            .map(LossTerm::contribution)
            .reduce(|acc, t| acc + t)
            .unwrap_or_else(|| Tensor::from(0.0f32))
    }

    /// Writes every term (uncapped, as computed) to the sink.
    pub fn write_summaries(&self, sink: &mut dyn SummarySink, step: i64) {
        for term in &self.terms {
            sink.scalar(term.family, term.name, scalar_value(&term.value), step);
        }
    }
}

/// Mean softmax cross-entropy of `logits` `[N, K]` against one-hot `labels` `[N, K]`.
pub(crate) fn softmax_cross_entropy(logits: &Tensor, labels: &Tensor) -> Tensor {
    -(labels * logits.log_softmax(-1, Kind::Float))
        .sum_dim_intlist(&[-1i64][..], false, Kind::Float)
        .mean(Kind::Float)
}
